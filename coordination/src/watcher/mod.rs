//! Response watcher: one task per agent session.
//!
//! The watcher owns nothing but an [`AgentChannel`]. It receives commands
//! over an mpsc channel and reports progress as protocol [`Message`]s on an
//! unbounded event channel. Each injected prompt runs as its own task so
//! pings and context updates are answered while a response is streaming.
//!
//! Completion is detected by racing two heuristics:
//!
//! 1. the provider's own [`AgentChannel::await_completion`], whose failure
//!    only takes it out of the race;
//! 2. a generic poll of the latest output that declares the response final
//!    once it has been unchanged for `stable_threshold` polls while the
//!    provider is not generating.
//!
//! Both are bounded by the response timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::AgentChannel;
use crate::config::{AgentId, TimingConfig};
use crate::error::{CrossfireError, CrossfireResult};
use crate::events::{AgentStatus, Message, RoundId};

/// Prefix of the page label set by `SET_MODEL_CONTEXT`.
pub const LABEL_PREFIX: &str = "[Crossfire]";

const COMMAND_CAPACITY: usize = 32;

/// Commands understood by a watcher.
#[derive(Debug)]
pub enum WatcherCommand {
    SetContext {
        agent_id: AgentId,
        name: String,
    },
    Inject {
        prompt: String,
        agent_id: AgentId,
        round_id: Option<RoundId>,
    },
    Ping {
        reply: oneshot::Sender<Message>,
    },
}

/// Sending side of a running watcher.
#[derive(Debug, Clone)]
pub struct WatcherHandle {
    agent_id: AgentId,
    commands: mpsc::Sender<WatcherCommand>,
    cancel: CancellationToken,
}

impl WatcherHandle {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Deliver an orchestrator→watcher protocol message.
    pub async fn deliver(&self, message: Message) -> CrossfireResult<()> {
        let command = match message {
            Message::SetModelContext { agent_id, name } => WatcherCommand::SetContext { agent_id, name },
            Message::InjectPrompt {
                prompt,
                agent_id,
                round_id,
            } => WatcherCommand::Inject {
                prompt,
                agent_id,
                round_id,
            },
            other => {
                return Err(CrossfireError::Automation(format!(
                    "watcher cannot handle {}",
                    other.event_type()
                )))
            }
        };
        self.send(command).await
    }

    pub async fn set_context(&self, name: &str) -> CrossfireResult<()> {
        self.send(WatcherCommand::SetContext {
            agent_id: self.agent_id.clone(),
            name: name.to_string(),
        })
        .await
    }

    pub async fn inject(&self, prompt: &str, round_id: Option<RoundId>) -> CrossfireResult<()> {
        self.send(WatcherCommand::Inject {
            prompt: prompt.to_string(),
            agent_id: self.agent_id.clone(),
            round_id,
        })
        .await
    }

    /// Round-trip a ping. False on timeout or if the watcher is gone.
    pub async fn ping(&self, timeout: Duration) -> bool {
        let (reply, pong) = oneshot::channel();
        if self.send(WatcherCommand::Ping { reply }).await.is_err() {
            return false;
        }
        matches!(
            tokio::time::timeout(timeout, pong).await,
            Ok(Ok(Message::Ping { pong: true }))
        )
    }

    /// Stop the watcher and any submission it is running
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.commands.is_closed()
    }

    async fn send(&self, command: WatcherCommand) -> CrossfireResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CrossfireError::WatcherGone(self.agent_id.clone()));
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| CrossfireError::WatcherGone(self.agent_id.clone()))
    }
}

/// Start a watcher task for one agent session.
pub fn spawn_watcher(
    agent_id: &str,
    channel: Arc<dyn AgentChannel>,
    timing: TimingConfig,
    events: mpsc::UnboundedSender<Message>,
) -> WatcherHandle {
    let (tx, mut rx) = mpsc::channel(COMMAND_CAPACITY);
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let watcher_agent = agent_id.to_string();

    tokio::spawn(async move {
        debug!(agent_id = %watcher_agent, provider = %channel.provider(), "Watcher started");
        loop {
            let command = tokio::select! {
                _ = token.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                WatcherCommand::SetContext { agent_id, name } => {
                    let label = format!("{} {}", LABEL_PREFIX, name);
                    if let Err(e) = channel.set_label(&label).await {
                        warn!(agent_id = %agent_id, error = %e, "Failed to set session label");
                    }
                }
                WatcherCommand::Inject {
                    prompt,
                    agent_id,
                    round_id,
                } => {
                    let submission = Submission {
                        channel: channel.clone(),
                        timing: timing.clone(),
                        events: events.clone(),
                        agent_id,
                        round_id,
                    };
                    let cancel = token.child_token();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                debug!(agent_id = %submission.agent_id, "Submission abandoned");
                            }
                            _ = submission.run(&prompt) => {}
                        }
                    });
                }
                WatcherCommand::Ping { reply } => {
                    let _ = reply.send(Message::Ping { pong: true });
                }
            }
        }
        debug!(agent_id = %watcher_agent, "Watcher stopped");
    });

    WatcherHandle {
        agent_id: agent_id.to_string(),
        commands: tx,
        cancel,
    }
}

/// One prompt submission and the detection of its final output.
struct Submission {
    channel: Arc<dyn AgentChannel>,
    timing: TimingConfig,
    events: mpsc::UnboundedSender<Message>,
    agent_id: AgentId,
    round_id: Option<RoundId>,
}

impl Submission {
    fn emit(&self, message: Message) {
        // The receiver only disappears on shutdown.
        let _ = self.events.send(message);
    }

    fn emit_status(&self, status: AgentStatus) {
        self.emit(Message::status(&self.agent_id, status, self.round_id));
    }

    async fn run(&self, prompt: &str) {
        match self.submit_and_wait(prompt).await {
            Ok(text) => {
                info!(
                    agent_id = %self.agent_id,
                    round_id = ?self.round_id,
                    chars = text.len(),
                    "Response ready"
                );
                self.emit(Message::StreamingUpdate {
                    agent_id: self.agent_id.clone(),
                    text: text.clone(),
                    round_id: self.round_id,
                });
                self.emit_status(AgentStatus::Complete);
                self.emit(Message::ResponseReady {
                    agent_id: self.agent_id.clone(),
                    text,
                    round_id: self.round_id,
                });
            }
            Err(e) => {
                warn!(agent_id = %self.agent_id, round_id = ?self.round_id, error = %e, "Submission failed");
                self.emit_status(AgentStatus::Error);
                self.emit(Message::agent_error(&self.agent_id, e.to_string(), self.round_id));
            }
        }
    }

    async fn submit_and_wait(&self, prompt: &str) -> CrossfireResult<String> {
        let baseline = self.channel.read_latest_output().await.unwrap_or_default();

        self.channel.submit_input(prompt).await?;
        self.emit_status(AgentStatus::Thinking);

        let ceiling = self.timing.response_timeout;
        let provider = async {
            if let Err(e) = self.channel.await_completion(ceiling).await {
                debug!(agent_id = %self.agent_id, error = %e, "Provider completion heuristic gave up");
                std::future::pending::<()>().await;
            }
        };

        let finished = async {
            tokio::select! {
                _ = provider => {}
                _ = self.poll_until_stable(&baseline) => {}
            }
        };

        tokio::time::timeout(ceiling, finished)
            .await
            .map_err(|_| CrossfireError::ResponseTimeout(ceiling))?;

        self.channel.read_latest_output().await
    }

    async fn poll_until_stable(&self, baseline: &str) {
        let mut ticker = tokio::time::interval(self.timing.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut last = String::new();
        let mut streaming = false;
        let mut stable_polls = 0u32;

        loop {
            ticker.tick().await;

            let current = match self.channel.read_latest_output().await {
                Ok(text) => text,
                Err(_) => continue,
            };
            if current == baseline {
                continue;
            }

            if !streaming {
                streaming = true;
                self.emit_status(AgentStatus::Streaming);
            }

            if current != last {
                stable_polls = 0;
                self.emit(Message::StreamingUpdate {
                    agent_id: self.agent_id.clone(),
                    text: current.clone(),
                    round_id: self.round_id,
                });
                last = current;
            } else {
                stable_polls += 1;
                if stable_polls >= self.timing.stable_threshold && !self.channel.is_generating().await {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Channel whose output is set directly by the test.
    #[derive(Default)]
    struct ScriptedChannel {
        output: Mutex<Option<String>>,
        generating: Mutex<bool>,
        label: Mutex<String>,
        fail_submit: bool,
    }

    impl ScriptedChannel {
        fn set_output(&self, text: &str) {
            *self.output.lock().unwrap() = Some(text.to_string());
        }
    }

    #[async_trait]
    impl AgentChannel for ScriptedChannel {
        fn provider(&self) -> ProviderKind {
            ProviderKind::Claude
        }

        async fn submit_input(&self, _text: &str) -> CrossfireResult<()> {
            if self.fail_submit {
                return Err(CrossfireError::InputTargetNotFound {
                    description: "Claude input field".into(),
                });
            }
            Ok(())
        }

        async fn is_generating(&self) -> bool {
            *self.generating.lock().unwrap()
        }

        async fn await_completion(&self, _timeout: Duration) -> CrossfireResult<()> {
            Err(CrossfireError::Automation("no indicator".into()))
        }

        async fn read_latest_output(&self) -> CrossfireResult<String> {
            self.output
                .lock()
                .unwrap()
                .clone()
                .ok_or(CrossfireError::NoOutputFound)
        }

        async fn set_label(&self, label: &str) -> CrossfireResult<()> {
            *self.label.lock().unwrap() = label.to_string();
            Ok(())
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_detects_stable_output() {
        let channel = Arc::new(ScriptedChannel::default());
        channel.set_output("previous answer");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_watcher("a1", channel.clone(), TimingConfig::default(), tx);

        handle.inject("question", Some(4)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;
        channel.set_output("new");
        tokio::time::sleep(Duration::from_millis(1000)).await;
        channel.set_output("new answer");
        tokio::time::sleep(Duration::from_secs(10)).await;

        let events = drain(&mut rx);
        let types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types.first(), Some(&"MODEL_STATUS"));
        assert_eq!(types.last(), Some(&"RESPONSE_READY"));
        assert!(events.iter().all(|e| e.round_id() == Some(4)));
        assert!(events.contains(&Message::status("a1", AgentStatus::Streaming, Some(4))));
        assert_eq!(
            events.last(),
            Some(&Message::ResponseReady {
                agent_id: "a1".into(),
                text: "new answer".into(),
                round_id: Some(4),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_generating_blocks_finalisation() {
        let channel = Arc::new(ScriptedChannel::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_watcher("a1", channel.clone(), TimingConfig::default(), tx);

        handle.inject("question", Some(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        channel.set_output("partial");
        *channel.generating.lock().unwrap() = true;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| e.event_type() == "RESPONSE_READY"));

        *channel.generating.lock().unwrap() = false;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(drain(&mut rx)
            .iter()
            .any(|e| e.event_type() == "RESPONSE_READY"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_output_times_out() {
        let channel = Arc::new(ScriptedChannel::default());
        channel.set_output("same");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_watcher("a1", channel.clone(), TimingConfig::default(), tx);

        handle.inject("question", Some(2)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(119)).await;
        assert!(!drain(&mut rx).iter().any(|e| e.event_type() == "ERROR"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let events = drain(&mut rx);
        assert!(events.contains(&Message::status("a1", AgentStatus::Error, Some(2))));
        assert!(events.contains(&Message::agent_error(
            "a1",
            "response timed out (120s)",
            Some(2)
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_failure_reports_error() {
        let channel = Arc::new(ScriptedChannel {
            fail_submit: true,
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_watcher("a1", channel, TimingConfig::default(), tx);

        handle.inject("question", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                Message::status("a1", AgentStatus::Error, None),
                Message::agent_error("a1", "Claude input field not found", None),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_and_context() {
        let channel = Arc::new(ScriptedChannel::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = spawn_watcher("a1", channel.clone(), TimingConfig::default(), tx);

        assert!(handle.ping(Duration::from_secs(2)).await);
        handle
            .deliver(Message::SetModelContext {
                agent_id: "a1".into(),
                name: "Claude".into(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*channel.label.lock().unwrap(), "[Crossfire] Claude");

        handle.stop();
        assert!(handle.is_stopped());
        assert!(!handle.ping(Duration::from_secs(2)).await);
    }
}
