//! Message protocol and event bus
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐  mpsc   ┌──────────────┐ broadcast ┌──────────────┐
//! │   Watchers   │────────▶│    Round     │──────────▶│  Subscribers │
//! │ (per agent)  │         │ Coordinator  │           │ (driver, UI) │
//! └──────────────┘         └──────────────┘           └──────────────┘
//! ```
//!
//! Watchers push [`Message`]s over an unbounded mpsc channel into the round
//! coordinator, which drops stale ones and republishes the rest on the
//! [`EventBus`].

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventFilter, SharedEventBus};
pub use types::{AgentResponse, AgentStatus, ConnectionState, Message, RoundId};
