//! Session broker: one live session per agent.
//!
//! The broker maps agent ids to [`SessionHandle`]s. Sessions are created
//! lazily, existing unassigned sessions of the right provider are reused,
//! and a handle whose session has gone away is evicted and recreated on the
//! next [`SessionBroker::acquire`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::channel::{channel_for, Surface};
use crate::config::{AgentDescriptor, AgentId, ProviderKind, SharedConfig, TimingConfig};
use crate::error::{CrossfireError, CrossfireResult};
use crate::events::Message;
use crate::watcher::{spawn_watcher, WatcherHandle};

/// Backend-assigned session identifier.
pub type SessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Loading,
    Loaded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub url: String,
    pub status: LoadStatus,
}

/// An automation backend able to host sessions (browser tabs).
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Sessions whose URL matches the pattern
    async fn list_sessions(&self, url_pattern: &str) -> CrossfireResult<Vec<SessionInfo>>;

    /// Current info for a session, `None` once it is gone
    async fn session_info(&self, id: &str) -> CrossfireResult<Option<SessionInfo>>;

    /// Open a new session at `url`
    async fn open_session(&self, url: &str) -> CrossfireResult<SessionInfo>;

    async fn close_session(&self, id: &str) -> CrossfireResult<()>;

    /// Automation surface of a session
    async fn surface(&self, id: &str) -> CrossfireResult<Arc<dyn Surface>>;
}

/// A live session bound to one agent, together with its watcher.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub agent_id: AgentId,
    pub session_id: SessionId,
    pub provider: ProviderKind,
    pub watcher: WatcherHandle,
}

type Slot = Arc<Mutex<Option<SessionHandle>>>;

pub struct SessionBroker {
    host: Arc<dyn SessionHost>,
    config: SharedConfig,
    timing: TimingConfig,
    events: mpsc::UnboundedSender<Message>,
    /// Per-agent slot, locked for the whole acquire of that agent
    slots: StdMutex<HashMap<AgentId, Slot>>,
    /// Sessions assigned to (or being set up for) some agent. Held across
    /// select-or-create so two agents never claim the same session.
    assigned: Mutex<HashSet<SessionId>>,
}

impl SessionBroker {
    pub fn new(
        host: Arc<dyn SessionHost>,
        config: SharedConfig,
        timing: TimingConfig,
        events: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            host,
            config,
            timing,
            events,
            slots: StdMutex::new(HashMap::new()),
            assigned: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Return a live handle for the agent, creating a session if needed.
    pub async fn acquire(&self, agent_id: &str) -> CrossfireResult<SessionHandle> {
        let descriptor = self.descriptor(agent_id).await?;
        let slot = self.slot(agent_id);
        let mut slot = slot.lock().await;

        if let Some(handle) = slot.take() {
            if self.reachable(&handle).await {
                *slot = Some(handle.clone());
                return Ok(handle);
            }
            info!(agent_id, session_id = %handle.session_id, "Evicting stale session");
            self.evict(&handle).await;
        }

        let info = self.claim_session(descriptor.provider).await?;
        let handle = self.attach_claimed(&descriptor, info).await?;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Whether the agent's cached session is loaded and its watcher answers.
    /// Any failure evicts the handle.
    pub async fn liveness(&self, agent_id: &str) -> bool {
        let slot = match self.existing_slot(agent_id) {
            Some(slot) => slot,
            None => return false,
        };
        let mut slot = slot.lock().await;
        let handle = match slot.take() {
            Some(handle) => handle,
            None => return false,
        };

        let loaded = matches!(
            self.host.session_info(&handle.session_id).await,
            Ok(Some(SessionInfo {
                status: LoadStatus::Loaded,
                ..
            }))
        );
        let alive = loaded && handle.watcher.ping(self.timing.ping_timeout).await;

        if alive {
            *slot = Some(handle);
        } else {
            debug!(agent_id, session_id = %handle.session_id, "Liveness check failed");
            self.evict(&handle).await;
        }
        alive
    }

    /// Drop the agent's cached handle so the next acquire starts over.
    pub async fn invalidate(&self, agent_id: &str) {
        let Some(slot) = self.existing_slot(agent_id) else {
            return;
        };
        if let Some(handle) = slot.lock().await.take() {
            info!(agent_id, session_id = %handle.session_id, "Session invalidated");
            self.evict(&handle).await;
        };
    }

    /// Always open a new session for the agent, label it and report whether
    /// it came up alive.
    pub async fn open_fresh(&self, agent_id: &str) -> CrossfireResult<bool> {
        let descriptor = self.descriptor(agent_id).await?;
        {
            let slot = self.slot(agent_id);
            let mut slot = slot.lock().await;
            if let Some(old) = slot.take() {
                self.evict(&old).await;
            }

            let info = {
                let mut assigned = self.assigned.lock().await;
                let info = self.host.open_session(descriptor.provider.site().url).await?;
                assigned.insert(info.id.clone());
                info
            };
            let handle = self.attach_claimed(&descriptor, info).await?;
            handle.watcher.set_context(&descriptor.name).await?;
            *slot = Some(handle);
        }
        Ok(self.liveness(agent_id).await)
    }

    /// Close every assigned session, then open a fresh one per agent.
    /// Agents whose setup fails are skipped.
    pub async fn reset_all(&self, agent_ids: &[AgentId]) {
        let slots: Vec<Slot> = self.lock_slots().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            if let Some(handle) = slot.lock().await.take() {
                handle.watcher.stop();
                if let Err(e) = self.host.close_session(&handle.session_id).await {
                    debug!(session_id = %handle.session_id, error = %e, "Close failed during reset");
                }
            }
        }
        self.assigned.lock().await.clear();

        for agent_id in agent_ids {
            match self.open_fresh(agent_id).await {
                Ok(alive) => debug!(agent_id = %agent_id, alive, "Session reset"),
                Err(e) => warn!(agent_id = %agent_id, error = %e, "Skipping agent during reset"),
            }
        }
        info!(agents = agent_ids.len(), "All sessions reset");
    }

    /// Stop every watcher and forget all handles. Sessions stay open.
    pub async fn release_all(&self) {
        let slots: Vec<Slot> = self.lock_slots().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            if let Some(handle) = slot.lock().await.take() {
                handle.watcher.stop();
            }
        }
        self.assigned.lock().await.clear();
    }

    /// Agent ids that currently hold a handle
    pub async fn active_agents(&self) -> Vec<AgentId> {
        let slots: Vec<(AgentId, Slot)> = self
            .lock_slots()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();
        let mut active = Vec::new();
        for (id, slot) in slots {
            if slot.lock().await.is_some() {
                active.push(id);
            }
        }
        active.sort();
        active
    }

    async fn descriptor(&self, agent_id: &str) -> CrossfireResult<AgentDescriptor> {
        self.config
            .read()
            .await
            .agent(agent_id)
            .cloned()
            .ok_or_else(|| CrossfireError::AgentConfigMissing(agent_id.to_string()))
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<AgentId, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, agent_id: &str) -> Slot {
        self.lock_slots()
            .entry(agent_id.to_string())
            .or_default()
            .clone()
    }

    fn existing_slot(&self, agent_id: &str) -> Option<Slot> {
        self.lock_slots().get(agent_id).cloned()
    }

    async fn reachable(&self, handle: &SessionHandle) -> bool {
        !handle.watcher.is_stopped()
            && matches!(self.host.session_info(&handle.session_id).await, Ok(Some(_)))
    }

    async fn evict(&self, handle: &SessionHandle) {
        handle.watcher.stop();
        self.assigned.lock().await.remove(&handle.session_id);
    }

    /// Pick an unassigned session of the provider or open a new one, and
    /// mark it assigned.
    async fn claim_session(&self, provider: ProviderKind) -> CrossfireResult<SessionInfo> {
        let site = provider.site();
        let mut assigned = self.assigned.lock().await;

        let existing = self
            .host
            .list_sessions(site.url_pattern)
            .await?
            .into_iter()
            .find(|s| !assigned.contains(&s.id));

        let info = match existing {
            Some(info) => {
                debug!(session_id = %info.id, %provider, "Reusing existing session");
                info
            }
            None => {
                let info = self.host.open_session(site.url).await?;
                info!(session_id = %info.id, %provider, "Opened new session");
                info
            }
        };
        assigned.insert(info.id.clone());
        Ok(info)
    }

    /// Finish setting up a claimed session, releasing the claim on failure.
    async fn attach_claimed(
        &self,
        descriptor: &AgentDescriptor,
        info: SessionInfo,
    ) -> CrossfireResult<SessionHandle> {
        match self.attach(descriptor, &info).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.assigned.lock().await.remove(&info.id);
                Err(e)
            }
        }
    }

    async fn attach(
        &self,
        descriptor: &AgentDescriptor,
        info: &SessionInfo,
    ) -> CrossfireResult<SessionHandle> {
        if info.status != LoadStatus::Loaded {
            self.wait_loaded(&descriptor.id, &info.id).await?;
            tokio::time::sleep(self.timing.settle_delay).await;
        }

        let surface = self.host.surface(&info.id).await?;
        let channel = channel_for(descriptor.provider, surface, &self.timing);
        let watcher = spawn_watcher(
            &descriptor.id,
            channel,
            self.timing.clone(),
            self.events.clone(),
        );

        info!(
            agent_id = %descriptor.id,
            session_id = %info.id,
            provider = %descriptor.provider,
            "Session attached"
        );
        Ok(SessionHandle {
            agent_id: descriptor.id.clone(),
            session_id: info.id.clone(),
            provider: descriptor.provider,
            watcher,
        })
    }

    async fn wait_loaded(&self, agent_id: &str, session_id: &str) -> CrossfireResult<()> {
        let wait = async {
            loop {
                match self.host.session_info(session_id).await? {
                    None => return Err(CrossfireError::SessionNotFound(agent_id.to_string())),
                    Some(info) if info.status == LoadStatus::Loaded => return Ok(()),
                    Some(_) => tokio::time::sleep(self.timing.load_poll_interval).await,
                }
            }
        };
        tokio::time::timeout(self.timing.load_timeout, wait)
            .await
            .map_err(|_| CrossfireError::SessionLoadTimeout(self.timing.load_timeout))?
    }
}

impl Drop for SessionBroker {
    fn drop(&mut self) {
        for slot in self.lock_slots().values() {
            if let Ok(guard) = slot.try_lock() {
                if let Some(handle) = guard.as_ref() {
                    handle.watcher.stop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DebateConfig;
    use crate::simulation::{Reply, SimulatedHost};
    use std::time::Duration;

    fn agent(id: &str, name: &str, provider: ProviderKind) -> AgentDescriptor {
        AgentDescriptor {
            id: id.into(),
            name: name.into(),
            provider,
            color: provider.site().default_color.into(),
            system_prompt: String::new(),
        }
    }

    fn broker_with(host: Arc<SimulatedHost>) -> SessionBroker {
        let config = DebateConfig {
            agents: vec![
                agent("gpt", "GPT-4", ProviderKind::Chatgpt),
                agent("gpt-b", "GPT-4 B", ProviderKind::Chatgpt),
                agent("claude", "Claude", ProviderKind::Claude),
            ],
            ..Default::default()
        };
        let (tx, _) = mpsc::unbounded_channel();
        SessionBroker::new(host, config.shared(), TimingConfig::default(), tx)
    }

    fn host() -> Arc<SimulatedHost> {
        SimulatedHost::new(Arc::new(|_| Reply::text("ok"))).shared()
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_reuses_handle() {
        let host = host();
        let broker = broker_with(host.clone());

        let first = broker.acquire("gpt").await.unwrap();
        let second = broker.acquire("gpt").await.unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(host.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroyed_session_is_replaced() {
        let host = host();
        let broker = broker_with(host.clone());

        let first = broker.acquire("gpt").await.unwrap();
        host.destroy(&first.session_id);

        let second = broker.acquire("gpt").await.unwrap();
        assert_ne!(first.session_id, second.session_id);
        assert!(first.watcher.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_unassigned_session_is_reused() {
        let host = host();
        let seeded = host.seed(ProviderKind::Chatgpt);
        let broker = broker_with(host.clone());

        let a = broker.acquire("gpt").await.unwrap();
        let b = broker.acquire("gpt-b").await.unwrap();
        assert_eq!(a.session_id, seeded);
        assert_ne!(b.session_id, seeded);
        assert_eq!(host.session_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_agent() {
        let broker = broker_with(host());
        let err = broker.acquire("nobody").await.unwrap_err();
        assert!(matches!(err, CrossfireError::AgentConfigMissing(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_timeout() {
        let host = SimulatedHost::new(Arc::new(|_| Reply::text("ok")))
            .with_load_delay(Duration::from_secs(60))
            .shared();
        let broker = broker_with(host);
        let err = broker.acquire("claude").await.unwrap_err();
        assert!(matches!(err, CrossfireError::SessionLoadTimeout(d) if d == Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_evicts_dead_session() {
        let host = host();
        let broker = broker_with(host.clone());

        assert!(!broker.liveness("gpt").await);
        let handle = broker.acquire("gpt").await.unwrap();
        assert!(broker.liveness("gpt").await);

        host.destroy(&handle.session_id);
        assert!(!broker.liveness("gpt").await);
        assert!(broker.active_agents().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_drops_cached_handle() {
        let host = host();
        let broker = broker_with(host.clone());

        let first = broker.acquire("gpt").await.unwrap();
        broker.invalidate("gpt").await;
        assert!(first.watcher.is_stopped());
        assert!(broker.active_agents().await.is_empty());

        // the session itself is still open and unassigned, so it is claimed again
        let second = broker.acquire("gpt").await.unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert!(!second.watcher.is_stopped());

        broker.invalidate("nobody").await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_fresh_labels_session() {
        let host = host();
        let broker = broker_with(host.clone());

        let old = broker.acquire("claude").await.unwrap();
        assert!(broker.open_fresh("claude").await.unwrap());
        let new = broker.acquire("claude").await.unwrap();
        assert_ne!(old.session_id, new.session_id);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let page = host.page(&new.session_id).unwrap();
        assert_eq!(page.label(), "[Crossfire] Claude");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_all_reopens_requested_agents() {
        let host = host();
        let broker = broker_with(host.clone());

        let old = broker.acquire("gpt").await.unwrap();
        broker.acquire("claude").await.unwrap();
        broker
            .reset_all(&["gpt".to_string(), "ghost".to_string()])
            .await;

        assert!(host.page(&old.session_id).is_none());
        assert_eq!(broker.active_agents().await, vec!["gpt".to_string()]);
        assert_eq!(host.session_count(), 1);
    }
}
