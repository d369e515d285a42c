//! Debate configuration: participants, prompt templates, pass keyword,
//! and the timing constants that drive coordination.

pub mod provider;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub use provider::{url_matches, ProviderKind, ProviderSite};
pub use store::{AgentUpdate, ConfigStore};

/// Logical identifier of a debate participant.
pub type AgentId = String;

/// Shared, read-mostly view of the debate configuration.
pub type SharedConfig = Arc<RwLock<DebateConfig>>;

pub const DEFAULT_INITIAL_PROMPT_TEMPLATE: &str = r#"You are playing the role of "{{modelName}}".
{{systemPrompt}}

The following participants are in this debate: {{participantList}}

Debate rules:
- If you have nothing more to add, output "{{passKeyword}}".
- You may agree with, rebut, or supplement other participants' opinions.

---

Question: {{question}}"#;

pub const DEFAULT_FINAL_RANKING_PROMPT_TEMPLATE: &str = r#"The debate has concluded. Based on the discussion so far, please evaluate and rank each participant's contributions (including yourself).

Respond only in the following JSON format:
{
  "rankings": [
    { "modelId": "modelID", "rank": 1, "reason": "reason" },
    { "modelId": "modelID", "rank": 2, "reason": "reason" }
  ]
}"#;

pub const DEFAULT_PASS_KEYWORD: &str = "[PASS]";

/// One configured participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub id: AgentId,
    pub name: String,
    pub provider: ProviderKind,
    pub color: String,
    pub system_prompt: String,
}

/// The persisted configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebateConfig {
    #[serde(default, alias = "models")]
    pub agents: Vec<AgentDescriptor>,
    #[serde(default = "default_initial_template")]
    pub initial_prompt_template: String,
    #[serde(default = "default_ranking_template")]
    pub final_ranking_prompt_template: String,
    #[serde(default = "default_pass_keyword")]
    pub pass_keyword: String,
}

fn default_initial_template() -> String {
    DEFAULT_INITIAL_PROMPT_TEMPLATE.to_string()
}

fn default_ranking_template() -> String {
    DEFAULT_FINAL_RANKING_PROMPT_TEMPLATE.to_string()
}

fn default_pass_keyword() -> String {
    DEFAULT_PASS_KEYWORD.to_string()
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            initial_prompt_template: default_initial_template(),
            final_ranking_prompt_template: default_ranking_template(),
            pass_keyword: default_pass_keyword(),
        }
    }
}

impl DebateConfig {
    pub fn agent(&self, id: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Display name for an agent, falling back to its id.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.agent(id).map(|a| a.name.as_str()).unwrap_or(id)
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

/// Timing constants for sessions, watchers and the debate driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    /// Ceiling for a new session to report "loaded".
    pub load_timeout: Duration,
    /// How often the broker re-reads a loading session's status.
    pub load_poll_interval: Duration,
    /// Pause after load before the input affordance is used.
    pub settle_delay: Duration,
    /// Ceiling for one submission to produce its final output.
    pub response_timeout: Duration,
    /// Generic polling heuristic interval.
    pub poll_interval: Duration,
    /// Consecutive unchanged polls before output is considered final.
    pub stable_threshold: u32,
    /// Per-locator wait when an affordance is not immediately present.
    pub locate_timeout: Duration,
    /// Liveness ping round-trip ceiling.
    pub ping_timeout: Duration,
    /// Delay before an automatic phase transition dispatches its round.
    pub auto_advance_delay: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(30),
            load_poll_interval: Duration::from_millis(250),
            settle_delay: Duration::from_millis(500),
            response_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
            stable_threshold: 8,
            locate_timeout: Duration::from_secs(3),
            ping_timeout: Duration::from_secs(2),
            auto_advance_delay: Duration::from_millis(500),
        }
    }
}

impl TimingConfig {
    /// Longest a whole round may reasonably take before the driver gives up.
    pub fn round_ceiling(&self) -> Duration {
        self.load_timeout + self.settle_delay + self.response_timeout + Duration::from_secs(30)
    }
}
