//! Provider profiles and the profile-driven channel implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{locate, AgentChannel, ElementRef, InsertMethod, Surface};
use crate::config::ProviderKind;
use crate::error::{CrossfireError, CrossfireResult};

/// How a provider shows that it is still producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratingIndicator {
    /// Generating while any of these elements is present
    AnyPresent(&'static [&'static str]),
    /// Generating while the first element matching `locator` has
    /// `attribute` equal to `value`
    Attribute {
        locator: &'static str,
        attribute: &'static str,
        value: &'static str,
    },
}

/// Provider completion heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSignal {
    /// A new output turn appears, then the page stays unchanged for
    /// `stabilize` while not generating
    OutputCountSettles { stabilize: Duration },
    /// The generating indicator is observed on, then observed off
    IndicatorCycle,
}

/// Everything that distinguishes one provider's UI from another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderProfile {
    pub kind: ProviderKind,
    pub input_locators: &'static [&'static str],
    pub input_description: &'static str,
    pub insert_method: InsertMethod,
    pub send_locators: &'static [&'static str],
    pub send_description: &'static str,
    /// Pause between inserting text and pressing send
    pub pre_send_delay: Duration,
    /// One element per output turn
    pub output_locator: &'static str,
    /// Preferred child of an output turn holding the answer proper
    pub output_inner_locator: Option<&'static str>,
    pub generating: GeneratingIndicator,
    pub completion: CompletionSignal,
}

pub static CHATGPT: ProviderProfile = ProviderProfile {
    kind: ProviderKind::Chatgpt,
    input_locators: &[
        "#prompt-textarea",
        "div[contenteditable=\"true\"][id=\"prompt-textarea\"]",
    ],
    input_description: "ChatGPT input field",
    insert_method: InsertMethod::Paste,
    send_locators: &[
        "[data-testid=\"send-button\"]",
        "button[aria-label=\"Send prompt\"]",
    ],
    send_description: "ChatGPT send button",
    pre_send_delay: Duration::from_millis(100),
    output_locator: "[data-message-author-role=\"assistant\"]",
    output_inner_locator: None,
    generating: GeneratingIndicator::AnyPresent(&[
        "[data-testid=\"stop-button\"]",
        "button[aria-label=\"Stop generating\"]",
    ]),
    completion: CompletionSignal::OutputCountSettles {
        stabilize: Duration::from_secs(2),
    },
};

pub static GEMINI: ProviderProfile = ProviderProfile {
    kind: ProviderKind::Gemini,
    input_locators: &[
        "div.ql-editor[contenteditable=\"true\"]",
        "rich-textarea div[contenteditable=\"true\"]",
        "div[contenteditable=\"true\"]",
    ],
    input_description: "Gemini input field",
    insert_method: InsertMethod::InsertText,
    send_locators: &["button.send-button", "button[aria-label=\"Send message\"]"],
    send_description: "Gemini send button",
    pre_send_delay: Duration::from_millis(100),
    output_locator: ".markdown.markdown-main-panel",
    output_inner_locator: None,
    generating: GeneratingIndicator::AnyPresent(&[
        ".markdown.markdown-main-panel[aria-busy=\"true\"]",
    ]),
    completion: CompletionSignal::IndicatorCycle,
};

pub static CLAUDE: ProviderProfile = ProviderProfile {
    kind: ProviderKind::Claude,
    input_locators: &["div.ProseMirror[contenteditable=\"true\"]"],
    input_description: "Claude input field",
    insert_method: InsertMethod::Paste,
    send_locators: &[
        "button[aria-label=\"Send Message\"]",
        "button[aria-label=\"Send message\"]",
    ],
    send_description: "Claude send button",
    pre_send_delay: Duration::ZERO,
    output_locator: ".font-claude-response",
    // row 1 holds extended thinking, row 2 the answer
    output_inner_locator: Some(".row-start-2"),
    generating: GeneratingIndicator::Attribute {
        locator: "[data-is-streaming]",
        attribute: "data-is-streaming",
        value: "true",
    },
    completion: CompletionSignal::IndicatorCycle,
};

/// Look up the profile registered for a provider
pub fn profile(kind: ProviderKind) -> &'static ProviderProfile {
    match kind {
        ProviderKind::Chatgpt => &CHATGPT,
        ProviderKind::Gemini => &GEMINI,
        ProviderKind::Claude => &CLAUDE,
    }
}

/// [`AgentChannel`] driven entirely by a [`ProviderProfile`].
///
/// Holds no state between calls; everything is re-read from the surface.
pub struct WebAgentChannel {
    profile: &'static ProviderProfile,
    surface: Arc<dyn Surface>,
    locate_timeout: Duration,
}

impl WebAgentChannel {
    pub fn new(
        profile: &'static ProviderProfile,
        surface: Arc<dyn Surface>,
        locate_timeout: Duration,
    ) -> Self {
        Self {
            profile,
            surface,
            locate_timeout,
        }
    }

    async fn output_turns(&self) -> CrossfireResult<Vec<ElementRef>> {
        self.surface.find_all(self.profile.output_locator).await
    }

    async fn check_generating(&self) -> CrossfireResult<bool> {
        match self.profile.generating {
            GeneratingIndicator::AnyPresent(locators) => {
                for locator in locators {
                    if self.surface.find_first(locator).await?.is_some() {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            GeneratingIndicator::Attribute {
                locator,
                attribute,
                value,
            } => match self.surface.find_first(locator).await? {
                Some(element) => Ok(self
                    .surface
                    .attribute(&element, attribute)
                    .await?
                    .is_some_and(|v| v == value)),
                None => Ok(false),
            },
        }
    }

    async fn wait_output_settles(&self, stabilize: Duration) -> CrossfireResult<()> {
        let initial = self.output_turns().await?.len();
        let mut snapshot: Option<String> = None;
        let mut unchanged_since = Instant::now();

        loop {
            if self.output_turns().await?.len() > initial {
                let current = self.read_latest_output().await.ok();
                if current != snapshot {
                    snapshot = current;
                    unchanged_since = Instant::now();
                } else if unchanged_since.elapsed() >= stabilize && !self.check_generating().await? {
                    return Ok(());
                }
            }
            self.surface.next_change().await;
        }
    }

    async fn wait_indicator_cycle(&self) -> CrossfireResult<()> {
        let mut started = false;
        loop {
            let generating = self.check_generating().await?;
            if !started && generating {
                trace!(provider = %self.profile.kind, "Generation started");
                started = true;
            } else if started && !generating {
                return Ok(());
            }
            self.surface.next_change().await;
        }
    }
}

#[async_trait]
impl AgentChannel for WebAgentChannel {
    fn provider(&self) -> ProviderKind {
        self.profile.kind
    }

    async fn submit_input(&self, text: &str) -> CrossfireResult<()> {
        let surface = self.surface.as_ref();
        let input = locate(
            surface,
            self.profile.input_locators,
            self.profile.input_description,
            self.locate_timeout,
        )
        .await?;
        surface
            .insert_text(&input, text, self.profile.insert_method)
            .await?;

        if !self.profile.pre_send_delay.is_zero() {
            tokio::time::sleep(self.profile.pre_send_delay).await;
        }

        let send = locate(
            surface,
            self.profile.send_locators,
            self.profile.send_description,
            self.locate_timeout,
        )
        .await?;
        surface.click(&send).await?;
        debug!(provider = %self.profile.kind, chars = text.len(), "Input submitted");
        Ok(())
    }

    async fn is_generating(&self) -> bool {
        match self.check_generating().await {
            Ok(generating) => generating,
            Err(e) => {
                debug!(provider = %self.profile.kind, error = %e, "Generating check failed");
                false
            }
        }
    }

    async fn await_completion(&self, timeout: Duration) -> CrossfireResult<()> {
        let wait = async {
            match self.profile.completion {
                CompletionSignal::OutputCountSettles { stabilize } => {
                    self.wait_output_settles(stabilize).await
                }
                CompletionSignal::IndicatorCycle => self.wait_indicator_cycle().await,
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| CrossfireError::ResponseTimeout(timeout))?
    }

    async fn read_latest_output(&self) -> CrossfireResult<String> {
        let last = self
            .output_turns()
            .await?
            .pop()
            .ok_or(CrossfireError::NoOutputFound)?;

        if let Some(inner) = self.profile.output_inner_locator {
            if let Some(row) = self.surface.find_within(&last, inner).await? {
                return Ok(self.surface.text(&row).await?.trim().to_string());
            }
        }
        Ok(self.surface.text(&last).await?.trim().to_string())
    }

    async fn set_label(&self, label: &str) -> CrossfireResult<()> {
        self.surface.set_label(label).await
    }
}
