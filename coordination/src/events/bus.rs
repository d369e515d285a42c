//! Event bus for the presentation side of the protocol
//!
//! Pub/sub over a Tokio broadcast channel. The round coordinator and the
//! orchestrator publish; the debate driver and any front end subscribe.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::{Message, RoundId};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 1024;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast event bus
pub struct EventBus {
    sender: broadcast::Sender<Message>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers, returning how many received it
    pub fn publish(&self, event: Message) -> usize {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "Event published");
                count
            }
            Err(_) => {
                debug!(event_type, "Event published (no receivers)");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective consumption
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub round_id: Option<RoundId>,
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round(mut self, round_id: RoundId) -> Self {
        self.round_id = Some(round_id);
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter. Events without a round id
    /// pass the round check.
    pub fn matches(&self, event: &Message) -> bool {
        if let Some(rid) = self.round_id {
            if let Some(event_rid) = event.round_id() {
                if event_rid != rid {
                    return false;
                }
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::AgentStatus;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        let delivered = bus.publish(Message::ResetAllComplete);
        assert_eq!(delivered, 1);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "RESET_ALL_COMPLETE");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(Message::status("a1", AgentStatus::Thinking, Some(1)));

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1, e2);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(Message::ResetAllComplete), 0);
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::new()
            .round(2)
            .types(vec!["RESPONSE_READY", "ERROR"]);

        let matching = Message::ResponseReady {
            agent_id: "a1".into(),
            text: "done".into(),
            round_id: Some(2),
        };
        let stale = Message::ResponseReady {
            agent_id: "a1".into(),
            text: "done".into(),
            round_id: Some(1),
        };
        let untagged = Message::Error {
            agent_id: None,
            message: "bus".into(),
            round_id: None,
        };
        let other_type = Message::status("a1", AgentStatus::Complete, Some(2));

        assert!(filter.matches(&matching));
        assert!(filter.matches(&untagged));
        assert!(!filter.matches(&stale));
        assert!(!filter.matches(&other_type));
    }
}
