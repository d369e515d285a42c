//! Error taxonomy for agent coordination.
//!
//! Every variant here is scoped to a single agent within a single round.
//! The round coordinator converts them into `ERROR` events; none of them
//! aborts sibling agents or the process.

use std::time::Duration;

use thiserror::Error;

use crate::config::AgentId;

/// Result alias used throughout the coordination crate.
pub type CrossfireResult<T> = Result<T, CrossfireError>;

/// Errors raised while driving an agent through its automation channel.
#[derive(Debug, Clone, Error)]
pub enum CrossfireError {
    /// None of the provider's locators for an input affordance matched.
    #[error("{description} not found")]
    InputTargetNotFound { description: String },

    /// The agent has not produced any output turn yet.
    #[error("no agent response found")]
    NoOutputFound,

    /// A freshly opened session never reported "loaded".
    #[error("session load timed out ({}s)", .0.as_secs())]
    SessionLoadTimeout(Duration),

    /// The submission produced no final output before the ceiling.
    #[error("response timed out ({}s)", .0.as_secs())]
    ResponseTimeout(Duration),

    /// The session backing an agent vanished.
    #[error("session not found for agent {0}")]
    SessionNotFound(AgentId),

    /// Ranking output could not be parsed. Never fatal.
    #[error("could not parse rankings: {0}")]
    RankingParseFailure(String),

    /// The agent id is not in the participant configuration.
    #[error("agent config not found: {0}")]
    AgentConfigMissing(AgentId),

    /// A round was dispatched without a prompt for this agent.
    #[error("no prompt for agent {0}")]
    PromptMissing(AgentId),

    /// The agent's watcher task has stopped.
    #[error("watcher for agent {0} is gone")]
    WatcherGone(AgentId),

    /// Transport failure in the automation backend.
    #[error("automation error: {0}")]
    Automation(String),

    /// Reading or writing the configuration store failed.
    #[error("config error: {0}")]
    Config(String),
}

impl CrossfireError {
    pub fn automation(err: impl std::fmt::Display) -> Self {
        Self::Automation(err.to_string())
    }

    /// Whether the error means the session itself is unusable and its
    /// cached handle should be dropped.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_) | Self::SessionLoadTimeout(_) | Self::WatcherGone(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_messages_carry_seconds() {
        let err = CrossfireError::ResponseTimeout(Duration::from_secs(120));
        assert_eq!(err.to_string(), "response timed out (120s)");

        let err = CrossfireError::SessionLoadTimeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "session load timed out (30s)");
    }

    #[test]
    fn test_input_target_message() {
        let err = CrossfireError::InputTargetNotFound {
            description: "ChatGPT input field".to_string(),
        };
        assert_eq!(err.to_string(), "ChatGPT input field not found");
    }

    #[test]
    fn test_invalidates_session() {
        assert!(CrossfireError::SessionNotFound("a".into()).invalidates_session());
        assert!(CrossfireError::WatcherGone("a".into()).invalidates_session());
        assert!(!CrossfireError::NoOutputFound.invalidates_session());
        assert!(!CrossfireError::ResponseTimeout(Duration::from_secs(1)).invalidates_session());
    }
}
