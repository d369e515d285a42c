//! Debate driver: runs the phase machine against a live orchestrator.
//!
//! Each user operation dispatches one round, applies bus events to the
//! machine until that round's `QUERY_COMPLETE` arrives, then keeps
//! dispatching whatever the machine schedules on its own.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use super::state::{DebateError, DebateMode, DebateSession, NextRound};
use crate::config::{AgentId, DebateConfig};
use crate::events::{EventFilter, Message, RoundId};
use crate::orchestrator::Orchestrator;
use crate::round::RoundRequest;

/// How a driven round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Completed,
    /// The round ceiling elapsed and the round was cancelled locally.
    TimedOut,
    /// The event bus closed underneath the driver.
    Disconnected,
}

pub struct DebateDriver {
    orchestrator: Arc<Orchestrator>,
    session: DebateSession,
    events: broadcast::Receiver<Message>,
}

impl DebateDriver {
    pub fn new(orchestrator: Arc<Orchestrator>, participants: Vec<AgentId>, mode: DebateMode) -> Self {
        let events = orchestrator.bus().subscribe();
        Self {
            orchestrator,
            session: DebateSession::new(participants, mode),
            events,
        }
    }

    pub fn session(&self) -> &DebateSession {
        &self.session
    }

    pub fn set_mode(&mut self, mode: DebateMode) {
        self.session.mode = mode;
    }

    async fn config(&self) -> DebateConfig {
        self.orchestrator.config().read().await.clone()
    }

    /// Ask the opening question and follow the debate as far as it goes
    /// without user input.
    pub async fn start_debate(&mut self, question: &str) -> Result<RoundOutcome, DebateError> {
        let config = self.config().await;
        let request = self.session.start_query(&config, question)?;
        self.run_with_schedule(debate_round(request)).await
    }

    pub async fn follow_up(&mut self, text: &str) -> Result<RoundOutcome, DebateError> {
        let request = self.session.send_follow_up(text)?;
        let message = Message::StartQuery {
            question: text.to_string(),
            agent_ids: request.agent_ids,
        };
        self.run_with_schedule(message).await
    }

    pub async fn cross_debate(&mut self) -> Result<RoundOutcome, DebateError> {
        let config = self.config().await;
        let request = self.session.cross_debate(&config)?;
        self.run_with_schedule(debate_round(request)).await
    }

    pub async fn start_ranking(&mut self) -> Result<RoundOutcome, DebateError> {
        let config = self.config().await;
        let request = self.session.start_ranking_round(&config)?;
        self.run_with_schedule(debate_round(request)).await
    }

    /// Reset the debate and open fresh sessions for every participant.
    pub async fn reset_all(&mut self) {
        let message = self.session.reset_all();
        self.orchestrator.handle(message).await;
        self.drain_ready().await;
    }

    pub async fn check_connections(&mut self) {
        let message = self.session.check_connections();
        self.orchestrator.handle(message).await;
        self.drain_ready().await;
    }

    pub async fn open(&mut self, agent_id: &str) {
        self.orchestrator
            .handle(Message::OpenTab {
                agent_id: agent_id.to_string(),
            })
            .await;
        self.drain_ready().await;
    }

    /// Apply events already buffered on the bus.
    async fn drain_ready(&mut self) {
        let config = self.config().await;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.session.apply_event(&config, &event);
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Debate driver lagged behind the event bus");
                }
                Err(_) => break,
            }
        }
    }

    async fn run_with_schedule(&mut self, message: Message) -> Result<RoundOutcome, DebateError> {
        let (mut outcome, mut next) = self.run_round(message).await;

        while let (RoundOutcome::Completed, Some(scheduled)) = (outcome, next) {
            tokio::time::sleep(self.orchestrator.timing().auto_advance_delay).await;
            let config = self.config().await;
            let request = match self.session.prepare(scheduled, &config) {
                Ok(request) => request,
                Err(e) => {
                    warn!(next = ?scheduled, error = %e, "Scheduled round not started");
                    break;
                }
            };
            info!(next = ?scheduled, phase = %self.session.phase, "Advancing debate automatically");
            (outcome, next) = self.run_round(debate_round(request)).await;
        }
        Ok(outcome)
    }

    /// Dispatch one round and wait for its completion under the round
    /// ceiling.
    async fn run_round(&mut self, message: Message) -> (RoundOutcome, Option<NextRound>) {
        let Some(round_id) = self.orchestrator.handle(message).await else {
            return (RoundOutcome::Completed, None);
        };
        let ceiling = self.orchestrator.timing().round_ceiling();

        match tokio::time::timeout(ceiling, self.wait_for_completion(round_id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(round_id, ceiling_secs = ceiling.as_secs(), "Round ceiling elapsed");
                self.session.cancel_round();
                (RoundOutcome::TimedOut, None)
            }
        }
    }

    async fn wait_for_completion(&mut self, round_id: RoundId) -> (RoundOutcome, Option<NextRound>) {
        let config = self.config().await;
        let filter = EventFilter::new().round(round_id);
        loop {
            let event = match self.events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(round_id, skipped, "Debate driver lagged behind the event bus");
                    continue;
                }
                Err(RecvError::Closed) => return (RoundOutcome::Disconnected, None),
            };

            if !filter.matches(&event) {
                debug!(round_id, event_type = event.event_type(), "Skipping event from another round");
                continue;
            }

            let is_completion = matches!(event, Message::QueryComplete { .. });
            let next = self.session.apply_event(&config, &event);
            if is_completion {
                return (RoundOutcome::Completed, next);
            }
        }
    }
}

fn debate_round(request: RoundRequest) -> Message {
    Message::StartDebateRound {
        prompts: request.prompts,
        agent_ids: request.agent_ids,
    }
}
