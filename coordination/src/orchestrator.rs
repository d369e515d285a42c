//! Orchestrator: routes presentation requests to the broker and the round
//! coordinator, and wires the watcher event pump.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::broker::{SessionBroker, SessionHost};
use crate::config::{SharedConfig, TimingConfig};
use crate::events::{EventBus, Message, RoundId, SharedEventBus};
use crate::round::{RoundCoordinator, RoundRequest};

pub struct Orchestrator {
    broker: Arc<SessionBroker>,
    coordinator: Arc<RoundCoordinator>,
    bus: SharedEventBus,
    config: SharedConfig,
    timing: TimingConfig,
}

impl Orchestrator {
    /// Build the component graph over an automation backend. Must be
    /// called inside a Tokio runtime.
    pub fn new(host: Arc<dyn SessionHost>, config: SharedConfig, timing: TimingConfig) -> Self {
        let bus = EventBus::new().shared();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let broker = Arc::new(SessionBroker::new(
            host,
            config.clone(),
            timing.clone(),
            events_tx,
        ));
        let coordinator = Arc::new(RoundCoordinator::new(broker.clone(), bus.clone()));
        coordinator.spawn_event_pump(events_rx);

        Self {
            broker,
            coordinator,
            bus,
            config,
            timing,
        }
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.bus
    }

    pub fn coordinator(&self) -> &Arc<RoundCoordinator> {
        &self.coordinator
    }

    pub fn broker(&self) -> &Arc<SessionBroker> {
        &self.broker
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Handle one presentation→orchestrator request. Returns the round id
    /// when the request started a round; every other outcome is published
    /// on the bus.
    pub async fn handle(&self, message: Message) -> Option<RoundId> {
        match message {
            Message::StartQuery {
                question,
                agent_ids,
            } => Some(self.coordinator.start_query(&question, &agent_ids)),
            Message::StartDebateRound { prompts, agent_ids } => {
                Some(self.coordinator.start_round(RoundRequest { agent_ids, prompts }))
            }
            Message::OpenTab { agent_id } => {
                let connected = match self.broker.open_fresh(&agent_id).await {
                    Ok(alive) => alive,
                    Err(e) => {
                        warn!(agent_id = %agent_id, error = %e, "Failed to open session");
                        self.bus
                            .publish(Message::agent_error(&agent_id, e.to_string(), None));
                        false
                    }
                };
                self.bus.publish(Message::ConnectionStatus {
                    agent_id,
                    connected,
                });
                None
            }
            Message::CheckConnection { agent_ids } => {
                let checks = agent_ids.iter().map(|id| self.broker.liveness(id));
                let states = join_all(checks).await;
                for (agent_id, connected) in agent_ids.into_iter().zip(states) {
                    self.bus.publish(Message::ConnectionStatus {
                        agent_id,
                        connected,
                    });
                }
                None
            }
            Message::ResetAll { agent_ids } => {
                self.broker.reset_all(&agent_ids).await;
                self.bus.publish(Message::ResetAllComplete);
                None
            }
            other => {
                warn!(event_type = other.event_type(), "Ignoring message not addressed to the orchestrator");
                None
            }
        }
    }

    /// Stop every watcher. Sessions are left open.
    pub async fn shutdown(&self) {
        self.broker.release_all().await;
        info!("Orchestrator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentDescriptor, DebateConfig, ProviderKind};
    use crate::simulation::{Reply, SimulatedHost};

    fn orchestrator() -> Orchestrator {
        let host = SimulatedHost::new(Arc::new(|_| Reply::text("fine"))).shared();
        let config = DebateConfig {
            agents: vec![AgentDescriptor {
                id: "g".into(),
                name: "Gemini".into(),
                provider: ProviderKind::Gemini,
                color: "#4285F4".into(),
                system_prompt: String::new(),
            }],
            ..Default::default()
        };
        Orchestrator::new(host, config.shared(), TimingConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_connection_before_and_after_open() {
        let orch = orchestrator();
        let mut rx = orch.bus().subscribe();

        orch.handle(Message::CheckConnection {
            agent_ids: vec!["g".into()],
        })
        .await;
        assert_eq!(
            rx.recv().await.unwrap(),
            Message::ConnectionStatus {
                agent_id: "g".into(),
                connected: false,
            }
        );

        orch.handle(Message::OpenTab {
            agent_id: "g".into(),
        })
        .await;
        assert_eq!(
            rx.recv().await.unwrap(),
            Message::ConnectionStatus {
                agent_id: "g".into(),
                connected: true,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_unknown_agent_reports_error() {
        let orch = orchestrator();
        let mut rx = orch.bus().subscribe();
        orch.handle(Message::OpenTab {
            agent_id: "nope".into(),
        })
        .await;
        assert_eq!(rx.recv().await.unwrap().event_type(), "ERROR");
        assert_eq!(
            rx.recv().await.unwrap(),
            Message::ConnectionStatus {
                agent_id: "nope".into(),
                connected: false,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_all_announces_completion() {
        let orch = orchestrator();
        let mut rx = orch.bus().subscribe();
        orch.handle(Message::ResetAll {
            agent_ids: vec!["g".into()],
        })
        .await;
        assert_eq!(rx.recv().await.unwrap(), Message::ResetAllComplete);
        assert_eq!(orch.broker().active_agents().await, vec!["g".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_query_runs_a_round() {
        let orch = orchestrator();
        let mut rx = orch.bus().subscribe();
        let round = orch
            .handle(Message::StartQuery {
                question: "why?".into(),
                agent_ids: vec!["g".into()],
            })
            .await
            .unwrap();

        loop {
            let event = rx.recv().await.unwrap();
            if let Message::QueryComplete { results, round_id } = event {
                assert_eq!(round_id, Some(round));
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].text, "fine");
                break;
            }
        }
    }
}
