//! Message protocol shared by the presentation layer, the orchestrator and
//! the per-agent watchers.
//!
//! Every message serialises as `{"type": "...", "payload": {...}}` with
//! camelCase payload fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::AgentId;

/// Round identifier, assigned by the round coordinator.
pub type RoundId = u64;

/// Per-agent stream status shown by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Thinking,
    Streaming,
    Complete,
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Thinking => write!(f, "thinking"),
            Self::Streaming => write!(f, "streaming"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Per-agent connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Unknown,
    Checking,
    Connected,
    Disconnected,
}

/// One collected response of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub agent_id: AgentId,
    pub text: String,
}

/// All protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Message {
    StartQuery {
        question: String,
        agent_ids: Vec<AgentId>,
    },
    StartDebateRound {
        prompts: BTreeMap<AgentId, String>,
        agent_ids: Vec<AgentId>,
    },
    OpenTab {
        agent_id: AgentId,
    },
    CheckConnection {
        agent_ids: Vec<AgentId>,
    },
    ResetAll {
        agent_ids: Vec<AgentId>,
    },
    ResetAllComplete,
    SetModelContext {
        agent_id: AgentId,
        name: String,
    },
    InjectPrompt {
        prompt: String,
        agent_id: AgentId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        round_id: Option<RoundId>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        pong: bool,
    },
    StreamingUpdate {
        agent_id: AgentId,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        round_id: Option<RoundId>,
    },
    ModelStatus {
        agent_id: AgentId,
        status: AgentStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        round_id: Option<RoundId>,
    },
    ResponseReady {
        agent_id: AgentId,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        round_id: Option<RoundId>,
    },
    QueryComplete {
        results: Vec<AgentResponse>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        round_id: Option<RoundId>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<AgentId>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        round_id: Option<RoundId>,
    },
    ConnectionStatus {
        agent_id: AgentId,
        connected: bool,
    },
}

impl Message {
    /// Error event scoped to one agent within one round.
    pub fn agent_error(agent_id: &str, message: impl Into<String>, round_id: Option<RoundId>) -> Self {
        Self::Error {
            agent_id: Some(agent_id.to_string()),
            message: message.into(),
            round_id,
        }
    }

    pub fn status(agent_id: &str, status: AgentStatus, round_id: Option<RoundId>) -> Self {
        Self::ModelStatus {
            agent_id: agent_id.to_string(),
            status,
            round_id,
        }
    }

    /// Get the wire type tag of this message
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StartQuery { .. } => "START_QUERY",
            Self::StartDebateRound { .. } => "START_DEBATE_ROUND",
            Self::OpenTab { .. } => "OPEN_TAB",
            Self::CheckConnection { .. } => "CHECK_CONNECTION",
            Self::ResetAll { .. } => "RESET_ALL",
            Self::ResetAllComplete => "RESET_ALL_COMPLETE",
            Self::SetModelContext { .. } => "SET_MODEL_CONTEXT",
            Self::InjectPrompt { .. } => "INJECT_PROMPT",
            Self::Ping { .. } => "PING",
            Self::StreamingUpdate { .. } => "STREAMING_UPDATE",
            Self::ModelStatus { .. } => "MODEL_STATUS",
            Self::ResponseReady { .. } => "RESPONSE_READY",
            Self::QueryComplete { .. } => "QUERY_COMPLETE",
            Self::Error { .. } => "ERROR",
            Self::ConnectionStatus { .. } => "CONNECTION_STATUS",
        }
    }

    /// Round id tag, if the message carries one
    pub fn round_id(&self) -> Option<RoundId> {
        match self {
            Self::InjectPrompt { round_id, .. }
            | Self::StreamingUpdate { round_id, .. }
            | Self::ModelStatus { round_id, .. }
            | Self::ResponseReady { round_id, .. }
            | Self::QueryComplete { round_id, .. }
            | Self::Error { round_id, .. } => *round_id,
            _ => None,
        }
    }

    /// Agent the message concerns, if any
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::OpenTab { agent_id }
            | Self::SetModelContext { agent_id, .. }
            | Self::InjectPrompt { agent_id, .. }
            | Self::StreamingUpdate { agent_id, .. }
            | Self::ModelStatus { agent_id, .. }
            | Self::ResponseReady { agent_id, .. }
            | Self::ConnectionStatus { agent_id, .. } => Some(agent_id),
            Self::Error { agent_id, .. } => agent_id.as_deref(),
            _ => None,
        }
    }
}
