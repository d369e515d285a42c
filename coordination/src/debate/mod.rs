//! Debate phase machine and driver.
//!
//! ```text
//! Idle ──start_query──► Debating ──all passed──► Ranking ──► Finished
//!                        │    ▲                                 │
//!            cross_debate│    │auto mode,                       │ winner
//!          / follow_up   └────┘someone continues                ▼
//!                                         Concluded ◄──── Concluding
//! ```
//!
//! [`DebateSession`] owns the transcript and decides transitions;
//! [`DebateDriver`] dispatches its rounds through the orchestrator.

pub mod driver;
pub mod prompts;
pub mod ranking;
pub mod state;

pub use driver::{DebateDriver, RoundOutcome};
pub use prompts::{cross_debate_prompt, initial_prompts, participant_list, CONCLUSION_PROMPT};
pub use ranking::{aggregate_scores, parse_rankings, resolve_identifier, select_winner, RankingEntry};
pub use state::{
    Conclusion, DebateError, DebateMode, DebatePhase, DebateSession, NextRound, PhaseTransition,
    RoundStatus, TransitionError, Turn, TurnKind,
};
