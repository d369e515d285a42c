//! Crossfire coordination library
//!
//! This library provides:
//! - A session broker that keeps one live chat session per debate agent
//! - Per-session response watchers that inject prompts and stream replies
//! - A round coordinator with monotonic round ids and exactly-once completion
//! - The debate phase machine: consensus detection, peer ranking, conclusion
//!
//! # Layers
//!
//! ```text
//! DebateDriver ─► Orchestrator ─► RoundCoordinator ─► SessionBroker ─► SessionHost
//!      ▲                                 │                  │
//!      └──────────── EventBus ◄──────────┘◄── watchers ◄────┘
//! ```
//!
//! Automation backends implement [`SessionHost`] and [`Surface`]; the
//! [`simulation`] module ships an in-process backend for tests and dry runs.

#![allow(clippy::uninlined_format_args)]

pub mod broker;
pub mod channel;
pub mod config;
pub mod debate;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod round;
pub mod simulation;
pub mod watcher;

// Re-export error types
pub use error::{CrossfireError, CrossfireResult};

// Re-export configuration types
pub use config::{
    AgentDescriptor, AgentId, AgentUpdate, ConfigStore, DebateConfig, ProviderKind, SharedConfig,
    TimingConfig,
};

// Re-export event types
pub use events::{
    AgentResponse, AgentStatus, ConnectionState, EventBus, EventFilter, Message,
    RoundId, SharedEventBus,
};

// Re-export automation seams
pub use broker::{LoadStatus, SessionBroker, SessionHost, SessionId, SessionInfo};
pub use channel::{AgentChannel, ElementRef, InsertMethod, Surface};

// Re-export coordination types
pub use orchestrator::Orchestrator;
pub use round::{RoundCoordinator, RoundRequest};

// Re-export debate types
pub use debate::{
    Conclusion, DebateDriver, DebateError, DebateMode, DebatePhase, DebateSession, RoundOutcome,
    Turn, TurnKind,
};
