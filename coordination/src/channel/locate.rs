//! Ordered locator search over an automation surface.

use std::time::Duration;

use tracing::trace;

use super::{ElementRef, Surface};
use crate::error::{CrossfireError, CrossfireResult};

/// Find an affordance by an ordered list of locators.
///
/// Every locator is tried once immediately and the first hit wins. Failing
/// that, each locator in turn is awaited for up to `wait`.
pub async fn locate(
    surface: &dyn Surface,
    locators: &[&str],
    description: &str,
    wait: Duration,
) -> CrossfireResult<ElementRef> {
    for locator in locators {
        if let Some(element) = surface.find_first(locator).await? {
            return Ok(element);
        }
    }

    for locator in locators {
        trace!(locator, description, "Waiting for element");
        match tokio::time::timeout(wait, wait_for(surface, locator)).await {
            Ok(found) => return found,
            Err(_) => continue,
        }
    }

    Err(CrossfireError::InputTargetNotFound {
        description: description.to_string(),
    })
}

async fn wait_for(surface: &dyn Surface, locator: &str) -> CrossfireResult<ElementRef> {
    loop {
        if let Some(element) = surface.find_first(locator).await? {
            return Ok(element);
        }
        surface.next_change().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::InsertMethod;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Surface whose elements appear on a schedule of `find_all` calls.
    struct Appearing {
        calls: Mutex<u32>,
        locator: &'static str,
        after: u32,
    }

    #[async_trait]
    impl Surface for Appearing {
        async fn find_all(&self, locator: &str) -> CrossfireResult<Vec<ElementRef>> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if locator == self.locator && *calls > self.after {
                Ok(vec![ElementRef::new("hit")])
            } else {
                Ok(vec![])
            }
        }
        async fn find_within(&self, _: &ElementRef, _: &str) -> CrossfireResult<Option<ElementRef>> {
            Ok(None)
        }
        async fn text(&self, _: &ElementRef) -> CrossfireResult<String> {
            Ok(String::new())
        }
        async fn attribute(&self, _: &ElementRef, _: &str) -> CrossfireResult<Option<String>> {
            Ok(None)
        }
        async fn insert_text(&self, _: &ElementRef, _: &str, _: InsertMethod) -> CrossfireResult<()> {
            Ok(())
        }
        async fn click(&self, _: &ElementRef) -> CrossfireResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_match_on_later_locator() {
        let surface = Appearing {
            calls: Mutex::new(0),
            locator: "#second",
            after: 0,
        };
        let found = locate(&surface, &["#first", "#second"], "input", Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(found.as_str(), "hit");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_late_element() {
        let surface = Appearing {
            calls: Mutex::new(0),
            locator: "#only",
            after: 5,
        };
        let found = locate(&surface, &["#only"], "input", Duration::from_secs(3)).await;
        assert!(found.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_element_names_description() {
        let surface = Appearing {
            calls: Mutex::new(0),
            locator: "#never",
            after: u32::MAX,
        };
        let err = locate(&surface, &["#a", "#b"], "Claude send button", Duration::from_secs(3))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Claude send button not found");
    }
}
