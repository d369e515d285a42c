//! In-process automation backend.
//!
//! [`SimulatedHost`] hosts pages that emulate a provider's chat UI closely
//! enough for the real channels and watchers to drive them: each page
//! answers the locators of its provider profile, streams a scripted reply
//! in chunks and toggles the provider's generating indicator. Used by the
//! test suites and by `--backend simulated` dry runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::broker::{LoadStatus, SessionHost, SessionId, SessionInfo};
use crate::channel::{profile, ElementRef, GeneratingIndicator, InsertMethod, ProviderProfile, Surface};
use crate::config::{url_matches, ProviderKind};
use crate::error::{CrossfireError, CrossfireResult};
use crate::watcher::LABEL_PREFIX;

const INPUT: &str = "input";
const SEND: &str = "send";
const BUSY: &str = "busy";
const STREAM_FLAG: &str = "stream-flag";

/// What a page is asked to answer.
#[derive(Debug, Clone, Copy)]
pub struct Prompted<'a> {
    pub provider: ProviderKind,
    /// Page label without the `[Crossfire]` prefix
    pub name: &'a str,
    pub prompt: &'a str,
}

/// Scripted reaction to a submitted prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Stream `text` in `chunks` pieces, one every `chunk_delay`
    Stream {
        text: String,
        chunks: usize,
        chunk_delay: Duration,
    },
    /// Never answer and never show the generating indicator
    Silent,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Stream {
            text: text.into(),
            chunks: 4,
            chunk_delay: Duration::from_millis(300),
        }
    }
}

pub type Responder = Arc<dyn Fn(&Prompted<'_>) -> Reply + Send + Sync>;

/// Responder for dry runs: every participant answers briefly and passes,
/// and ranks itself first when asked for rankings.
pub fn default_responder(pass_keyword: &str) -> Responder {
    let pass_keyword = pass_keyword.to_string();
    Arc::new(move |p: &Prompted<'_>| {
        if p.prompt.contains("\"rankings\"") {
            Reply::text(format!(
                "```json\n{{\"rankings\": [{{\"modelId\": \"{}\", \"rank\": 1, \"reason\": \"simulated\"}}]}}\n```",
                p.name
            ))
        } else {
            Reply::text(format!(
                "{} ({}) simulated answer. {}",
                p.name, p.provider, pass_keyword
            ))
        }
    })
}

#[derive(Debug, Default)]
struct PageState {
    label: String,
    input: String,
    outputs: Vec<String>,
    prompts: Vec<String>,
    generating: bool,
    input_available: bool,
    closed: bool,
}

/// One emulated chat page.
pub struct SimulatedPage {
    id: SessionId,
    url: String,
    profile: &'static ProviderProfile,
    ready_at: Instant,
    responder: Responder,
    state: Arc<Mutex<PageState>>,
}

impl SimulatedPage {
    fn lock(&self) -> std::sync::MutexGuard<'_, PageState> {
        lock_state(&self.state)
    }

    fn open(&self) -> CrossfireResult<std::sync::MutexGuard<'_, PageState>> {
        let state = self.lock();
        if state.closed {
            return Err(CrossfireError::Automation(format!("page {} is closed", self.id)));
        }
        Ok(state)
    }

    fn loaded(&self) -> bool {
        Instant::now() >= self.ready_at
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> ProviderKind {
        self.profile.kind
    }

    pub fn label(&self) -> String {
        self.lock().label.clone()
    }

    /// Prompts submitted so far, oldest first
    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    pub fn outputs(&self) -> Vec<String> {
        self.lock().outputs.clone()
    }

    /// Hide or show the input affordance
    pub fn set_input_available(&self, available: bool) {
        self.lock().input_available = available;
    }

    fn element_text(&self, state: &PageState, element: &str) -> Option<String> {
        let (index, inner) = match element.strip_prefix("out-")?.split_once('/') {
            Some((index, inner)) => (index, Some(inner)),
            None => (element.strip_prefix("out-")?, None),
        };
        let text = state.outputs.get(index.parse::<usize>().ok()?)?;
        match (self.profile.output_inner_locator, inner) {
            // Full container also shows the thinking row
            (Some(_), None) => Some(format!("Thinking...\n{}", text)),
            _ => Some(text.clone()),
        }
    }

    fn submit(&self) {
        let prompt = {
            let mut state = self.lock();
            if state.input.is_empty() {
                return;
            }
            let prompt = std::mem::take(&mut state.input);
            state.prompts.push(prompt.clone());
            prompt
        };

        let name = self.label();
        let name = name
            .strip_prefix(LABEL_PREFIX)
            .map(str::trim)
            .unwrap_or(&name)
            .to_string();
        let reply = (self.responder)(&Prompted {
            provider: self.profile.kind,
            name: &name,
            prompt: &prompt,
        });

        let (text, chunks, chunk_delay) = match reply {
            Reply::Silent => return,
            Reply::Stream {
                text,
                chunks,
                chunk_delay,
            } => (text, chunks.max(1), chunk_delay),
        };

        self.lock().generating = true;
        let state = self.state.clone();
        let page_id = self.id.clone();
        tokio::spawn(async move {
            let chars: Vec<char> = text.chars().collect();
            let mut index = None;
            for chunk in 1..=chunks {
                tokio::time::sleep(chunk_delay).await;
                let end = chars.len() * chunk / chunks;
                let partial: String = chars[..end].iter().collect();
                let mut page = lock_state(&state);
                if page.closed {
                    return;
                }
                match index {
                    None => {
                        page.outputs.push(partial);
                        index = Some(page.outputs.len() - 1);
                    }
                    Some(i) => page.outputs[i] = partial,
                }
            }
            lock_state(&state).generating = false;
            debug!(page = %page_id, chars = chars.len(), "Simulated reply finished");
        });
    }
}

#[async_trait]
impl Surface for SimulatedPage {
    async fn find_all(&self, locator: &str) -> CrossfireResult<Vec<ElementRef>> {
        let state = self.open()?;
        if !self.loaded() {
            return Ok(vec![]);
        }
        let profile = self.profile;

        let found = if profile.input_locators.contains(&locator) {
            if state.input_available {
                vec![ElementRef::new(INPUT)]
            } else {
                vec![]
            }
        } else if profile.send_locators.contains(&locator) {
            vec![ElementRef::new(SEND)]
        } else if locator == profile.output_locator {
            (0..state.outputs.len())
                .map(|i| ElementRef::new(format!("out-{}", i)))
                .collect()
        } else {
            match profile.generating {
                GeneratingIndicator::AnyPresent(locators)
                    if locators.contains(&locator) && state.generating =>
                {
                    vec![ElementRef::new(BUSY)]
                }
                GeneratingIndicator::Attribute { locator: flag, .. }
                    if flag == locator && (state.generating || !state.outputs.is_empty()) =>
                {
                    vec![ElementRef::new(STREAM_FLAG)]
                }
                _ => vec![],
            }
        };
        Ok(found)
    }

    async fn find_within(
        &self,
        scope: &ElementRef,
        locator: &str,
    ) -> CrossfireResult<Option<ElementRef>> {
        let state = self.open()?;
        if self.profile.output_inner_locator == Some(locator)
            && self.element_text(&state, scope.as_str()).is_some()
        {
            return Ok(Some(ElementRef::new(format!("{}/answer", scope.as_str()))));
        }
        Ok(None)
    }

    async fn text(&self, element: &ElementRef) -> CrossfireResult<String> {
        let state = self.open()?;
        match element.as_str() {
            INPUT => Ok(state.input.clone()),
            SEND | BUSY | STREAM_FLAG => Ok(String::new()),
            other => self
                .element_text(&state, other)
                .map(|t| t.trim().to_string())
                .ok_or_else(|| CrossfireError::Automation(format!("stale element {}", other))),
        }
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> CrossfireResult<Option<String>> {
        let state = self.open()?;
        match (element.as_str(), self.profile.generating) {
            (STREAM_FLAG, GeneratingIndicator::Attribute { attribute, .. }) if attribute == name => {
                Ok(Some(state.generating.to_string()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_text(
        &self,
        element: &ElementRef,
        text: &str,
        method: InsertMethod,
    ) -> CrossfireResult<()> {
        let mut state = self.open()?;
        if element.as_str() != INPUT {
            return Err(CrossfireError::Automation("not an input".into()));
        }
        if method != self.profile.insert_method {
            debug!(page = %self.id, ?method, "Unexpected insert method");
        }
        state.input.push_str(text);
        Ok(())
    }

    async fn click(&self, element: &ElementRef) -> CrossfireResult<()> {
        drop(self.open()?);
        if element.as_str() == SEND {
            self.submit();
        }
        Ok(())
    }

    async fn set_label(&self, label: &str) -> CrossfireResult<()> {
        self.open()?.label = label.to_string();
        Ok(())
    }
}

fn lock_state(state: &Mutex<PageState>) -> std::sync::MutexGuard<'_, PageState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// [`SessionHost`] over simulated pages.
pub struct SimulatedHost {
    pages: Mutex<BTreeMap<SessionId, Arc<SimulatedPage>>>,
    next_id: AtomicU64,
    responder: Responder,
    load_delay: Duration,
}

impl SimulatedHost {
    pub fn new(responder: Responder) -> Self {
        Self {
            pages: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            responder,
            load_delay: Duration::from_millis(500),
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn pages(&self) -> std::sync::MutexGuard<'_, BTreeMap<SessionId, Arc<SimulatedPage>>> {
        self.pages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn create(&self, provider: ProviderKind, url: &str, loaded: bool) -> Arc<SimulatedPage> {
        let id = format!("sim-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let ready_at = if loaded {
            Instant::now()
        } else {
            Instant::now() + self.load_delay
        };
        let page = Arc::new(SimulatedPage {
            id: id.clone(),
            url: url.to_string(),
            profile: profile(provider),
            ready_at,
            responder: self.responder.clone(),
            state: Arc::new(Mutex::new(PageState {
                input_available: true,
                ..Default::default()
            })),
        });
        self.pages().insert(id, page.clone());
        page
    }

    /// Add an already loaded page for a provider, as if a user had it open
    pub fn seed(&self, provider: ProviderKind) -> SessionId {
        self.create(provider, provider.site().url, true).id.clone()
    }

    /// Close a page behind the broker's back
    pub fn destroy(&self, id: &str) {
        if let Some(page) = self.pages().remove(id) {
            page.lock().closed = true;
        }
    }

    pub fn page(&self, id: &str) -> Option<Arc<SimulatedPage>> {
        self.pages().get(id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.pages().len()
    }

    fn info(page: &SimulatedPage) -> SessionInfo {
        SessionInfo {
            id: page.id.clone(),
            url: page.url.clone(),
            status: if page.loaded() {
                LoadStatus::Loaded
            } else {
                LoadStatus::Loading
            },
        }
    }
}

#[async_trait]
impl SessionHost for SimulatedHost {
    async fn list_sessions(&self, url_pattern: &str) -> CrossfireResult<Vec<SessionInfo>> {
        Ok(self
            .pages()
            .values()
            .filter(|p| url_matches(url_pattern, &p.url))
            .map(|p| Self::info(p))
            .collect())
    }

    async fn session_info(&self, id: &str) -> CrossfireResult<Option<SessionInfo>> {
        Ok(self.pages().get(id).map(|p| Self::info(p)))
    }

    async fn open_session(&self, url: &str) -> CrossfireResult<SessionInfo> {
        let provider = ProviderKind::all()
            .iter()
            .copied()
            .find(|k| k.matches_url(url))
            .ok_or_else(|| CrossfireError::Automation(format!("no simulated site for {}", url)))?;
        let page = self.create(provider, url, self.load_delay.is_zero());
        Ok(Self::info(&page))
    }

    async fn close_session(&self, id: &str) -> CrossfireResult<()> {
        match self.pages().remove(id) {
            Some(page) => {
                page.lock().closed = true;
                Ok(())
            }
            None => Err(CrossfireError::Automation(format!("no page {}", id))),
        }
    }

    async fn surface(&self, id: &str) -> CrossfireResult<Arc<dyn Surface>> {
        let page = self
            .page(id)
            .ok_or_else(|| CrossfireError::Automation(format!("no page {}", id)))?;
        Ok(page as Arc<dyn Surface>)
    }
}
