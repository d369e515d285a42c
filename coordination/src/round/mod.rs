//! Round coordinator.
//!
//! A round is one prompt per agent, dispatched concurrently. The
//! coordinator hands out strictly increasing round ids, tracks which agents
//! are still pending, drops events that belong to any other round, and
//! publishes `QUERY_COMPLETE` exactly once when the pending set drains.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::SessionBroker;
use crate::config::AgentId;
use crate::error::{CrossfireError, CrossfireResult};
use crate::events::{AgentResponse, Message, RoundId, SharedEventBus};

/// Agents to address and the prompt each of them receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundRequest {
    pub agent_ids: Vec<AgentId>,
    pub prompts: BTreeMap<AgentId, String>,
}

impl RoundRequest {
    /// Same prompt for every agent
    pub fn broadcast(agent_ids: &[AgentId], prompt: &str) -> Self {
        Self {
            agent_ids: agent_ids.to_vec(),
            prompts: agent_ids
                .iter()
                .map(|id| (id.clone(), prompt.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct RoundState {
    round_id: RoundId,
    pending: HashSet<AgentId>,
    results: Vec<AgentResponse>,
    completed: bool,
}

pub struct RoundCoordinator {
    broker: Arc<SessionBroker>,
    bus: SharedEventBus,
    state: Mutex<RoundState>,
}

impl RoundCoordinator {
    pub fn new(broker: Arc<SessionBroker>, bus: SharedEventBus) -> Self {
        Self {
            broker,
            bus,
            state: Mutex::new(RoundState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RoundState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Id of the most recently started round, 0 before the first
    pub fn current_round(&self) -> RoundId {
        self.lock().round_id
    }

    /// Agents of the current round that have not finished yet
    pub fn pending(&self) -> Vec<AgentId> {
        let mut pending: Vec<_> = self.lock().pending.iter().cloned().collect();
        pending.sort();
        pending
    }

    /// Results collected so far in the current round
    pub fn results(&self) -> Vec<AgentResponse> {
        self.lock().results.clone()
    }

    /// Start a new round, superseding any round in flight.
    pub fn start_round(self: &Arc<Self>, request: RoundRequest) -> RoundId {
        let round_id = self.begin(&request);
        info!(round_id, agents = request.agent_ids.len(), "Round started");

        if request.agent_ids.is_empty() {
            self.finish_if_drained();
            return round_id;
        }

        for agent_id in request.agent_ids {
            let prompt = request.prompts.get(&agent_id).cloned();
            let coordinator = self.clone();
            tokio::spawn(async move {
                if let Err(e) = coordinator.dispatch(&agent_id, prompt, round_id).await {
                    coordinator.dispatch_failed(&agent_id, round_id, e).await;
                }
            });
        }
        round_id
    }

    /// Follow-up question: one shared prompt for every agent.
    pub fn start_query(self: &Arc<Self>, question: &str, agent_ids: &[AgentId]) -> RoundId {
        self.start_round(RoundRequest::broadcast(agent_ids, question))
    }

    fn begin(&self, request: &RoundRequest) -> RoundId {
        let mut state = self.lock();
        state.round_id += 1;
        state.pending = request.agent_ids.iter().cloned().collect();
        state.results.clear();
        state.completed = false;
        state.round_id
    }

    async fn dispatch(
        &self,
        agent_id: &str,
        prompt: Option<String>,
        round_id: RoundId,
    ) -> CrossfireResult<()> {
        let prompt = prompt.ok_or_else(|| CrossfireError::PromptMissing(agent_id.to_string()))?;
        let handle = self.broker.acquire(agent_id).await?;
        let name = self
            .broker
            .config()
            .read()
            .await
            .display_name(agent_id)
            .to_string();

        handle
            .watcher
            .deliver(Message::SetModelContext {
                agent_id: agent_id.to_string(),
                name,
            })
            .await?;
        handle
            .watcher
            .deliver(Message::InjectPrompt {
                prompt,
                agent_id: agent_id.to_string(),
                round_id: Some(round_id),
            })
            .await?;
        debug!(agent_id, round_id, session_id = %handle.session_id, "Prompt injected");
        Ok(())
    }

    /// Report a failed dispatch as that agent's error for the round.
    async fn dispatch_failed(&self, agent_id: &str, round_id: RoundId, error: CrossfireError) {
        warn!(agent_id, round_id, error = %error, "Dispatch failed");
        if error.invalidates_session() {
            self.broker.invalidate(agent_id).await;
        }
        self.on_agent_event(Message::agent_error(agent_id, error.to_string(), Some(round_id)));
    }

    /// Apply one watcher event. Returns false if it was dropped as stale.
    ///
    /// The event and any completion are published under the state lock, so
    /// bus order matches the order in which events changed the round.
    pub fn on_agent_event(&self, event: Message) -> bool {
        let mut state = self.lock();
        if let Some(round_id) = event.round_id() {
            if round_id != state.round_id {
                debug!(
                    event_type = event.event_type(),
                    event_round = round_id,
                    current_round = state.round_id,
                    "Dropping stale event"
                );
                return false;
            }
        }

        match &event {
            Message::ResponseReady { agent_id, text, .. } => {
                if state.pending.remove(agent_id) {
                    state.results.push(AgentResponse {
                        agent_id: agent_id.clone(),
                        text: text.clone(),
                    });
                }
            }
            Message::Error {
                agent_id: Some(agent_id),
                ..
            } => {
                state.pending.remove(agent_id);
            }
            _ => {}
        }
        let completion = Self::take_completion(&mut state);

        self.bus.publish(event);
        if let Some(done) = completion {
            self.bus.publish(done);
        }
        true
    }

    fn finish_if_drained(&self) {
        let mut state = self.lock();
        if let Some(done) = Self::take_completion(&mut state) {
            self.bus.publish(done);
        }
    }

    fn take_completion(state: &mut RoundState) -> Option<Message> {
        if state.completed || !state.pending.is_empty() {
            return None;
        }
        state.completed = true;
        info!(
            round_id = state.round_id,
            results = state.results.len(),
            "Round complete"
        );
        Some(Message::QueryComplete {
            results: state.results.clone(),
            round_id: Some(state.round_id),
        })
    }

    /// Drain watcher events into [`Self::on_agent_event`].
    pub fn spawn_event_pump(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<Message>) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                coordinator.on_agent_event(event);
            }
            debug!("Event pump stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentDescriptor, DebateConfig, ProviderKind, TimingConfig};
    use crate::events::EventBus;
    use crate::simulation::{Reply, SimulatedHost};

    fn coordinator() -> (Arc<RoundCoordinator>, SharedEventBus) {
        let host = SimulatedHost::new(Arc::new(|_| Reply::text("ok"))).shared();
        let (tx, _) = mpsc::unbounded_channel();
        let config = DebateConfig {
            agents: vec![AgentDescriptor {
                id: "a".into(),
                name: "Alpha".into(),
                provider: ProviderKind::Claude,
                color: "#D97706".into(),
                system_prompt: String::new(),
            }],
            ..Default::default()
        };
        let broker = Arc::new(SessionBroker::new(
            host,
            config.shared(),
            TimingConfig::default(),
            tx,
        ));
        let bus = EventBus::new().shared();
        (Arc::new(RoundCoordinator::new(broker, bus.clone())), bus)
    }

    fn request(ids: &[&str]) -> RoundRequest {
        let ids: Vec<AgentId> = ids.iter().map(|s| s.to_string()).collect();
        RoundRequest::broadcast(&ids, "prompt")
    }

    fn ready(agent: &str, round: RoundId) -> Message {
        Message::ResponseReady {
            agent_id: agent.into(),
            text: format!("{} says hi", agent),
            round_id: Some(round),
        }
    }

    fn completions(rx: &mut tokio::sync::broadcast::Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if msg.event_type() == "QUERY_COMPLETE" {
                out.push(msg);
            }
        }
        out
    }

    #[test]
    fn test_round_ids_increase_by_one() {
        let (coord, _) = coordinator();
        assert_eq!(coord.current_round(), 0);
        assert_eq!(coord.begin(&request(&["a"])), 1);
        assert_eq!(coord.begin(&request(&["a"])), 2);
        assert_eq!(coord.begin(&request(&[])), 3);
    }

    #[test]
    fn test_stale_events_do_not_mutate_round() {
        let (coord, bus) = coordinator();
        let mut rx = bus.subscribe();

        let first = coord.begin(&request(&["a", "b"]));
        let second = coord.begin(&request(&["a", "b"]));
        assert!(!coord.on_agent_event(ready("a", first)));
        assert_eq!(coord.pending(), vec!["a".to_string(), "b".to_string()]);
        assert!(coord.results().is_empty());

        assert!(coord.on_agent_event(ready("a", second)));
        assert_eq!(coord.pending(), vec!["b".to_string()]);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_completion_fires_once() {
        let (coord, bus) = coordinator();
        let mut rx = bus.subscribe();
        let round = coord.begin(&request(&["a", "b"]));

        coord.on_agent_event(ready("a", round));
        coord.on_agent_event(Message::agent_error("b", "boom", Some(round)));
        // late duplicates after the round drained
        coord.on_agent_event(ready("b", round));
        coord.on_agent_event(ready("a", round));

        let done = completions(&mut rx);
        assert_eq!(done.len(), 1);
        match &done[0] {
            Message::QueryComplete { results, round_id } => {
                assert_eq!(*round_id, Some(round));
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].agent_id, "a");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_completions_publish_in_order() {
        let (coord, bus) = coordinator();
        for _ in 0..200 {
            let mut rx = bus.subscribe();
            let round = coord.begin(&request(&["a", "b"]));
            let barrier = std::sync::Barrier::new(2);

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    coord.on_agent_event(ready("a", round));
                });
                scope.spawn(|| {
                    barrier.wait();
                    coord.on_agent_event(Message::agent_error("b", "boom", Some(round)));
                });
            });

            let mut seen = Vec::new();
            while let Ok(msg) = rx.try_recv() {
                seen.push(msg.event_type());
            }
            assert_eq!(seen.len(), 3);
            assert_eq!(seen[2], "QUERY_COMPLETE");
            assert_eq!(seen.iter().filter(|t| **t == "QUERY_COMPLETE").count(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_error_drops_cached_handle() {
        let (coord, bus) = coordinator();
        let mut rx = bus.subscribe();
        let round = coord.begin(&request(&["a"]));
        let handle = coord.broker.acquire("a").await.unwrap();

        coord
            .dispatch_failed("a", round, CrossfireError::WatcherGone("a".into()))
            .await;

        assert!(handle.watcher.is_stopped());
        assert!(coord.broker.active_agents().await.is_empty());
        assert_eq!(rx.recv().await.unwrap().event_type(), "ERROR");
        assert_eq!(rx.recv().await.unwrap().event_type(), "QUERY_COMPLETE");
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_error_keeps_cached_handle() {
        let (coord, _) = coordinator();
        let round = coord.begin(&request(&["a"]));
        let handle = coord.broker.acquire("a").await.unwrap();

        coord
            .dispatch_failed("a", round, CrossfireError::PromptMissing("a".into()))
            .await;

        assert!(!handle.watcher.is_stopped());
        assert_eq!(coord.broker.active_agents().await, vec!["a".to_string()]);
    }

    #[test]
    fn test_untagged_events_are_forwarded() {
        let (coord, bus) = coordinator();
        let mut rx = bus.subscribe();
        coord.begin(&request(&["a"]));

        assert!(coord.on_agent_event(Message::StreamingUpdate {
            agent_id: "a".into(),
            text: "partial".into(),
            round_id: None,
        }));
        assert_eq!(rx.try_recv().unwrap().event_type(), "STREAMING_UPDATE");
        assert_eq!(coord.pending(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_round_completes_immediately() {
        let (coord, bus) = coordinator();
        let mut rx = bus.subscribe();
        let round = coord.start_round(RoundRequest::default());
        assert_eq!(
            rx.recv().await.unwrap(),
            Message::QueryComplete {
                results: vec![],
                round_id: Some(round),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_agent_becomes_error_event() {
        let (coord, bus) = coordinator();
        let mut rx = bus.subscribe();
        let round = coord.start_query("hello", &["ghost".to_string()]);

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            Message::agent_error("ghost", "agent config not found: ghost", Some(round))
        );
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event_type(), "QUERY_COMPLETE");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_prompt_is_isolated() {
        let (coord, bus) = coordinator();
        let mut rx = bus.subscribe();
        let round = coord.start_round(RoundRequest {
            agent_ids: vec!["a".into()],
            prompts: BTreeMap::new(),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            Message::agent_error("a", "no prompt for agent a", Some(round))
        );
    }
}
