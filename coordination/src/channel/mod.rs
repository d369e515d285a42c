//! Agent channels: the capability set used to drive one chat provider
//! through an automation surface.
//!
//! A [`Surface`] is the raw page (find, read, type, click). An
//! [`AgentChannel`] layers one provider's UI conventions on top of it. The
//! three provider variants differ only in their [`ProviderProfile`], which
//! is resolved once when the session is created.

pub mod locate;
pub mod providers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ProviderKind, TimingConfig};
use crate::error::CrossfireResult;

pub use locate::locate;
pub use providers::{profile, CompletionSignal, GeneratingIndicator, ProviderProfile, WebAgentChannel};

/// Default wait used by [`Surface::next_change`] when a backend has no
/// native change notification.
pub const OBSERVE_INTERVAL: Duration = Duration::from_millis(100);

/// Opaque handle to an element on a surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// How text is put into an input affordance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMethod {
    /// Synthetic clipboard paste into a rich-text editor
    Paste,
    /// Editing-command text insertion at the caret
    InsertText,
}

/// Low-level access to one live session.
#[async_trait]
pub trait Surface: Send + Sync {
    /// All elements matching a locator, in document order
    async fn find_all(&self, locator: &str) -> CrossfireResult<Vec<ElementRef>>;

    /// First descendant of `scope` matching a locator
    async fn find_within(&self, scope: &ElementRef, locator: &str)
        -> CrossfireResult<Option<ElementRef>>;

    /// Trimmed text content of an element
    async fn text(&self, element: &ElementRef) -> CrossfireResult<String>;

    async fn attribute(&self, element: &ElementRef, name: &str) -> CrossfireResult<Option<String>>;

    async fn insert_text(
        &self,
        element: &ElementRef,
        text: &str,
        method: InsertMethod,
    ) -> CrossfireResult<()>;

    async fn click(&self, element: &ElementRef) -> CrossfireResult<()>;

    /// Set the page's visible label (window title)
    async fn set_label(&self, _label: &str) -> CrossfireResult<()> {
        Ok(())
    }

    /// Resolve after the page may have changed
    async fn next_change(&self) {
        tokio::time::sleep(OBSERVE_INTERVAL).await;
    }

    async fn find_first(&self, locator: &str) -> CrossfireResult<Option<ElementRef>> {
        Ok(self.find_all(locator).await?.into_iter().next())
    }
}

/// Provider-specific driver for one agent session.
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Provider this channel drives
    fn provider(&self) -> ProviderKind;

    /// Type `text` into the input affordance and press send
    async fn submit_input(&self, text: &str) -> CrossfireResult<()>;

    /// Whether the provider currently shows a "still generating" state
    async fn is_generating(&self) -> bool;

    /// Provider completion heuristic for the submission just made
    async fn await_completion(&self, timeout: Duration) -> CrossfireResult<()>;

    /// Trimmed text of the most recent output turn
    async fn read_latest_output(&self) -> CrossfireResult<String>;

    /// Label the session so a human can tell which agent owns it
    async fn set_label(&self, label: &str) -> CrossfireResult<()>;
}

/// Resolve the channel for a provider over the given surface.
pub fn channel_for(
    kind: ProviderKind,
    surface: Arc<dyn Surface>,
    timing: &TimingConfig,
) -> Arc<dyn AgentChannel> {
    Arc::new(WebAgentChannel::new(profile(kind), surface, timing.locate_timeout))
}
