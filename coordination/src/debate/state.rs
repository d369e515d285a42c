//! Debate state machine: phases, turns, rankings and the conclusion.
//!
//! The machine is synchronous. Every operation that needs agents returns
//! the [`RoundRequest`] to dispatch; completing a turn may return the
//! [`NextRound`] that should follow automatically.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::prompts::{cross_debate_prompt, initial_prompts, CONCLUSION_PROMPT};
use super::ranking::{aggregate_scores, parse_rankings, select_winner, RankingEntry};
use crate::config::{AgentId, DebateConfig};
use crate::events::{AgentStatus, ConnectionState, Message};
use crate::round::RoundRequest;

/// Colour used for a conclusion whose author is no longer configured.
pub const FALLBACK_COLOR: &str = "#888888";

/// Phase of a debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebatePhase {
    /// No debate running.
    Idle,
    /// Initial, follow-up and cross-debate rounds.
    Debating,
    /// Every participant is ranking the others.
    Ranking,
    /// Rankings parsed, conclusion pending.
    Finished,
    /// The winner is writing the conclusion.
    Concluding,
    /// Conclusion recorded.
    Concluded,
}

impl DebatePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Concluded)
    }

    /// Valid transitions from this phase. Every phase may be reset to Idle.
    pub fn valid_transitions(self) -> &'static [DebatePhase] {
        match self {
            Self::Idle => &[Self::Debating],
            Self::Debating => &[Self::Ranking, Self::Idle],
            Self::Ranking => &[Self::Finished, Self::Idle],
            Self::Finished => &[Self::Concluding, Self::Idle],
            Self::Concluding => &[Self::Concluded, Self::Idle],
            Self::Concluded => &[Self::Idle],
        }
    }
}

impl std::fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Debating => write!(f, "debating"),
            Self::Ranking => write!(f, "ranking"),
            Self::Finished => write!(f, "finished"),
            Self::Concluding => write!(f, "concluding"),
            Self::Concluded => write!(f, "concluded"),
        }
    }
}

/// Whether cross-debate rounds continue on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateMode {
    Auto,
    #[default]
    Manual,
}

impl std::str::FromStr for DebateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown debate mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TurnKind {
    Initial,
    FollowUp,
    CrossDebate,
    Ranking,
    Conclusion,
}

impl std::fmt::Display for TurnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::FollowUp => write!(f, "follow-up"),
            Self::CrossDebate => write!(f, "cross-debate"),
            Self::Ranking => write!(f, "ranking"),
            Self::Conclusion => write!(f, "conclusion"),
        }
    }
}

/// One element of the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub kind: TurnKind,
    pub user_message: Option<String>,
    /// Latest text per agent. Keys are always among `participants`.
    pub responses: BTreeMap<AgentId, String>,
    /// Agents the turn was dispatched to.
    pub participants: Vec<AgentId>,
    pub started_at: DateTime<Utc>,
}

impl Turn {
    fn new(kind: TurnKind, user_message: Option<&str>, participants: &[AgentId]) -> Self {
        Self {
            kind,
            user_message: user_message.map(str::to_string),
            responses: BTreeMap::new(),
            participants: participants.to_vec(),
            started_at: Utc::now(),
        }
    }

    /// Agents of `order` with a non-empty response, in that order.
    pub fn respondents(&self, order: &[AgentId]) -> Vec<AgentId> {
        order
            .iter()
            .filter(|id| self.responses.get(*id).is_some_and(|r| !r.is_empty()))
            .cloned()
            .collect()
    }
}

/// Status of the round currently attached to the last turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    #[default]
    Idle,
    Loading,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conclusion {
    pub author_agent_id: AgentId,
    pub author_name: String,
    pub color: String,
    pub text: String,
}

/// Round the machine wants dispatched without user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRound {
    Ranking,
    CrossDebate,
    Conclusion,
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub reason: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for TransitionError {}

/// Misuse of the debate machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DebateError {
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("no participants selected")]
    NoParticipants,

    #[error("cross-debate needs at least two responses (got {0})")]
    NotEnoughRespondents(usize),

    #[error("no active turn")]
    NoActiveTurn,
}

/// A debate tracking phase, transcript and outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSession {
    pub id: String,
    pub phase: DebatePhase,
    pub mode: DebateMode,
    pub status: RoundStatus,
    /// Selected agents, in selection order.
    pub participants: Vec<AgentId>,
    pub turns: Vec<Turn>,
    /// Parsed rankings per rater.
    pub rankings: BTreeMap<AgentId, Vec<RankingEntry>>,
    /// Aggregated scores, in participant order.
    pub scores: Vec<(AgentId, i64)>,
    pub conclusion: Option<Conclusion>,
    pub agent_status: BTreeMap<AgentId, AgentStatus>,
    pub connection: BTreeMap<AgentId, ConnectionState>,
    pub last_error: Option<String>,
    pub transitions: Vec<PhaseTransition>,
    pub created_at: DateTime<Utc>,
}

impl DebateSession {
    pub fn new(participants: Vec<AgentId>, mode: DebateMode) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phase: DebatePhase::Idle,
            mode,
            status: RoundStatus::Idle,
            participants,
            turns: Vec::new(),
            rankings: BTreeMap::new(),
            scores: Vec::new(),
            conclusion: None,
            agent_status: BTreeMap::new(),
            connection: BTreeMap::new(),
            last_error: None,
            transitions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Transition to a new phase with a reason.
    pub fn transition(&mut self, to: DebatePhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.phase.valid_transitions()
                ),
            });
        }

        info!(debate_id = %self.id, from = %self.phase, %to, reason, "Debate phase transition");
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        Ok(())
    }

    pub fn current_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    fn require_participants(&self) -> Result<(), DebateError> {
        if self.participants.is_empty() {
            return Err(DebateError::NoParticipants);
        }
        Ok(())
    }

    fn begin_turn(&mut self, turn: Turn) {
        debug!(debate_id = %self.id, kind = %turn.kind, agents = turn.participants.len(), "Turn started");
        self.turns.push(turn);
        self.status = RoundStatus::Loading;
        self.agent_status.clear();
        self.last_error = None;
    }

    /// Start a new debate. A debate already under way is reset first.
    pub fn start_query(
        &mut self,
        config: &DebateConfig,
        question: &str,
    ) -> Result<RoundRequest, DebateError> {
        self.require_participants()?;
        if self.phase != DebatePhase::Idle {
            self.reset();
        }

        let prompts = initial_prompts(config, &self.participants, question);
        self.transition(DebatePhase::Debating, "question asked")?;
        let turn = Turn::new(TurnKind::Initial, Some(question), &self.participants);
        self.begin_turn(turn);

        Ok(RoundRequest {
            agent_ids: self.participants.clone(),
            prompts,
        })
    }

    /// Append a follow-up turn sending the raw text to every participant.
    pub fn send_follow_up(&mut self, text: &str) -> Result<RoundRequest, DebateError> {
        self.require_participants()?;
        let turn = Turn::new(TurnKind::FollowUp, Some(text), &self.participants);
        self.begin_turn(turn);
        Ok(RoundRequest::broadcast(&self.participants, text))
    }

    /// Show each respondent of the current turn what the others said.
    pub fn cross_debate(&mut self, config: &DebateConfig) -> Result<RoundRequest, DebateError> {
        if self.phase != DebatePhase::Debating {
            return Err(TransitionError {
                from: self.phase,
                to: DebatePhase::Debating,
                reason: "cross-debate needs a debate in progress".into(),
            }
            .into());
        }
        let current = self.current_turn().ok_or(DebateError::NoActiveTurn)?;
        let respondents = current.respondents(&self.participants);
        if respondents.len() < 2 {
            return Err(DebateError::NotEnoughRespondents(respondents.len()));
        }

        let prompts = respondents
            .iter()
            .map(|id| {
                let prompt = cross_debate_prompt(config, id, &respondents, &current.responses);
                (id.clone(), prompt)
            })
            .collect();

        self.begin_turn(Turn::new(TurnKind::CrossDebate, None, &respondents));
        Ok(RoundRequest {
            agent_ids: respondents,
            prompts,
        })
    }

    /// Ask every participant to rank the others.
    pub fn start_ranking_round(&mut self, config: &DebateConfig) -> Result<RoundRequest, DebateError> {
        self.require_participants()?;
        self.transition(DebatePhase::Ranking, "ranking requested")?;
        self.begin_turn(Turn::new(TurnKind::Ranking, None, &self.participants));
        Ok(RoundRequest::broadcast(
            &self.participants,
            &config.final_ranking_prompt_template,
        ))
    }

    /// Score the rankings and ask the winner for the conclusion.
    pub fn start_conclusion(&mut self, config: &DebateConfig) -> Result<RoundRequest, DebateError> {
        self.require_participants()?;
        self.transition(DebatePhase::Concluding, "conclusion requested")?;

        self.scores = aggregate_scores(&self.rankings, &self.participants, &config.agents);
        let winner = select_winner(&self.scores)
            .cloned()
            .ok_or(DebateError::NoParticipants)?;
        info!(debate_id = %self.id, winner = %winner, scores = ?self.scores, "Conclusion author selected");

        let authors = vec![winner];
        self.begin_turn(Turn::new(TurnKind::Conclusion, None, &authors));
        Ok(RoundRequest::broadcast(&authors, CONCLUSION_PROMPT))
    }

    /// Build the request for an automatic transition.
    pub fn prepare(&mut self, next: NextRound, config: &DebateConfig) -> Result<RoundRequest, DebateError> {
        match next {
            NextRound::Ranking => self.start_ranking_round(config),
            NextRound::CrossDebate => self.cross_debate(config),
            NextRound::Conclusion => self.start_conclusion(config),
        }
    }

    /// Apply one bus event. `QUERY_COMPLETE` completes the current turn.
    pub fn apply_event(&mut self, config: &DebateConfig, event: &Message) -> Option<NextRound> {
        match event {
            Message::StreamingUpdate { agent_id, text, .. }
            | Message::ResponseReady { agent_id, text, .. } => {
                if let Some(turn) = self.turns.last_mut() {
                    if turn.participants.contains(agent_id) {
                        turn.responses.insert(agent_id.clone(), text.clone());
                    }
                }
                None
            }
            Message::ModelStatus {
                agent_id, status, ..
            } => {
                self.agent_status.insert(agent_id.clone(), *status);
                None
            }
            Message::Error {
                agent_id, message, ..
            } => {
                if let Some(agent_id) = agent_id {
                    self.agent_status.insert(agent_id.clone(), AgentStatus::Error);
                }
                self.last_error = Some(message.clone());
                None
            }
            Message::ConnectionStatus {
                agent_id,
                connected,
            } => {
                let state = if *connected {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Disconnected
                };
                self.connection.insert(agent_id.clone(), state);
                None
            }
            Message::QueryComplete { .. } => self.complete_turn(config),
            _ => None,
        }
    }

    /// Close the current turn and decide what follows.
    pub fn complete_turn(&mut self, config: &DebateConfig) -> Option<NextRound> {
        self.status = RoundStatus::Complete;
        let turn = self.turns.last()?;

        match turn.kind {
            TurnKind::Conclusion => {
                self.conclusion = turn.responses.iter().next().map(|(id, text)| {
                    let author = config.agent(id);
                    Conclusion {
                        author_agent_id: id.clone(),
                        author_name: author.map(|a| a.name.clone()).unwrap_or_else(|| id.clone()),
                        color: author
                            .map(|a| a.color.clone())
                            .unwrap_or_else(|| FALLBACK_COLOR.to_string()),
                        text: text.clone(),
                    }
                });
                let _ = self.transition(DebatePhase::Concluded, "conclusion written");
                None
            }
            TurnKind::Ranking => {
                self.rankings = turn
                    .responses
                    .iter()
                    .map(|(rater, text)| (rater.clone(), parse_rankings(rater, text)))
                    .collect();
                if self.rankings.values().all(Vec::is_empty) {
                    self.last_error = Some("could not parse rankings".into());
                }
                self.transition(DebatePhase::Finished, "rankings collected")
                    .ok()
                    .map(|_| NextRound::Conclusion)
            }
            _ if self.phase != DebatePhase::Debating => None,
            kind => {
                let pass = config.pass_keyword.as_str();
                let all_passed = self.participants.iter().all(|id| {
                    turn.responses
                        .get(id)
                        .is_some_and(|r| !r.is_empty() && r.contains(pass))
                });
                if all_passed {
                    info!(debate_id = %self.id, "All participants passed");
                    return Some(NextRound::Ranking);
                }

                let someone_continues = self.participants.iter().any(|id| {
                    turn.responses
                        .get(id)
                        .is_some_and(|r| !r.is_empty() && !r.contains(pass))
                });
                if self.mode == DebateMode::Auto && kind == TurnKind::CrossDebate && someone_continues {
                    return Some(NextRound::CrossDebate);
                }
                None
            }
        }
    }

    /// Mark the current round complete locally. Agents keep generating.
    pub fn cancel_round(&mut self) {
        if self.status == RoundStatus::Loading {
            info!(debate_id = %self.id, "Round cancelled");
        }
        self.status = RoundStatus::Complete;
    }

    /// Clear the transcript and outcome and return to Idle.
    pub fn reset(&mut self) {
        if self.phase != DebatePhase::Idle {
            let _ = self.transition(DebatePhase::Idle, "reset");
        }
        self.turns.clear();
        self.rankings.clear();
        self.scores.clear();
        self.conclusion = None;
        self.agent_status.clear();
        self.last_error = None;
        self.status = RoundStatus::Idle;
    }

    /// Reset and request fresh sessions for every participant.
    pub fn reset_all(&mut self) -> Message {
        self.reset();
        for id in &self.participants {
            self.connection.insert(id.clone(), ConnectionState::Checking);
        }
        Message::ResetAll {
            agent_ids: self.participants.clone(),
        }
    }

    /// Request a liveness check for every participant.
    pub fn check_connections(&mut self) -> Message {
        for id in &self.participants {
            self.connection.insert(id.clone(), ConnectionState::Checking);
        }
        Message::CheckConnection {
            agent_ids: self.participants.clone(),
        }
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] {} mode | {} turns | {} participants | round {:?}",
            self.phase,
            match self.mode {
                DebateMode::Auto => "auto",
                DebateMode::Manual => "manual",
            },
            self.turns.len(),
            self.participants.len(),
            self.status
        )
    }
}
