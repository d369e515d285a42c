//! Terminal presentation: transcript rendering and the manual-mode prompt.

use std::fmt::Write as _;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use coordination::debate::{DebateSession, Turn};
use coordination::{
    AgentStatus, DebateConfig, DebateDriver, DebatePhase, EventFilter, Message, SharedEventBus,
};

/// A manual-mode console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Cross,
    Rank,
    Follow(String),
    Status,
    Quit,
}

pub const HELP: &str = "commands: cross | rank | follow <text> | status | quit";

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match word.to_ascii_lowercase().as_str() {
        "cross" => Ok(ConsoleCommand::Cross),
        "rank" => Ok(ConsoleCommand::Rank),
        "status" => Ok(ConsoleCommand::Status),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        "follow" if !rest.trim().is_empty() => Ok(ConsoleCommand::Follow(rest.trim().to_string())),
        "follow" => Err("follow needs a message".into()),
        "" => Err(HELP.into()),
        other => Err(format!("unknown command: {} ({})", other, HELP)),
    }
}

pub fn render_turn(config: &DebateConfig, turn: &Turn) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== {} ===", turn.kind);
    if let Some(message) = &turn.user_message {
        let _ = writeln!(out, "> {}", message);
    }
    for agent_id in &turn.participants {
        let name = config.display_name(agent_id);
        match turn.responses.get(agent_id) {
            Some(text) => {
                let _ = writeln!(out, "\n[{}]\n{}", name, text);
            }
            None => {
                let _ = writeln!(out, "\n[{}] (no response)", name);
            }
        }
    }
    out
}

pub fn render_outcome(config: &DebateConfig, session: &DebateSession) -> String {
    let mut out = String::new();
    if !session.scores.is_empty() {
        let _ = writeln!(out, "=== scores ===");
        for (agent_id, score) in &session.scores {
            let _ = writeln!(out, "{:>4}  {}", score, config.display_name(agent_id));
        }
    }
    if let Some(conclusion) = &session.conclusion {
        let _ = writeln!(out, "\n=== conclusion by {} ===\n{}", conclusion.author_name, conclusion.text);
    }
    if let Some(error) = &session.last_error {
        let _ = writeln!(out, "\nlast error: {}", error);
    }
    out
}

/// Print every turn from `from` onwards. Returns the new turn count.
pub fn print_turns(config: &DebateConfig, session: &DebateSession, from: usize) -> usize {
    for turn in session.turns.iter().skip(from) {
        println!("{}", render_turn(config, turn));
    }
    session.turns.len()
}

/// Log per-agent progress from the event bus until it closes.
pub fn spawn_progress(bus: &SharedEventBus, config: DebateConfig) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    let filter = EventFilter::new().types(vec!["MODEL_STATUS", "ERROR"]);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) if !filter.matches(&event) => {}
                Ok(Message::ModelStatus {
                    agent_id, status, ..
                }) if status != AgentStatus::Streaming => {
                    info!(agent = config.display_name(&agent_id), %status, "Agent status");
                }
                Ok(Message::Error {
                    agent_id: Some(agent_id),
                    message,
                    ..
                }) => {
                    warn!(agent = config.display_name(&agent_id), %message, "Agent failed");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Read commands from stdin until the debate concludes or the user quits.
pub async fn run_manual(driver: &mut DebateDriver, config: &DebateConfig) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut shown = driver.session().turns.len();

    while !driver.session().phase.is_terminal() {
        stdout.write_all(b"crossfire> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let result = match parse_command(&line) {
            Ok(ConsoleCommand::Quit) => break,
            Ok(ConsoleCommand::Status) => {
                println!("{}", driver.session().status_line());
                continue;
            }
            Ok(ConsoleCommand::Cross) => driver.cross_debate().await,
            Ok(ConsoleCommand::Rank) => driver.start_ranking().await,
            Ok(ConsoleCommand::Follow(text)) => driver.follow_up(&text).await,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };

        match result {
            Ok(outcome) => info!(?outcome, phase = %driver.session().phase, "Round finished"),
            Err(e) => println!("cannot do that now: {}", e),
        }
        shown = print_turns(config, driver.session(), shown);
        if driver.session().phase == DebatePhase::Concluded {
            println!("{}", render_outcome(config, driver.session()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::debate::{DebateMode, TurnKind};
    use coordination::{AgentDescriptor, ProviderKind};

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command(" cross "), Ok(ConsoleCommand::Cross));
        assert_eq!(parse_command("RANK"), Ok(ConsoleCommand::Rank));
        assert_eq!(
            parse_command("follow what about   async?"),
            Ok(ConsoleCommand::Follow("what about   async?".into()))
        );
        assert_eq!(parse_command("exit"), Ok(ConsoleCommand::Quit));
        assert!(parse_command("follow   ").is_err());
        assert!(parse_command("").is_err());
        assert!(parse_command("dance").unwrap_err().contains("unknown command"));
    }

    #[test]
    fn test_render_turn_marks_missing_responses() {
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
        let mut session = DebateSession::new(vec!["a".into(), "b".into()], DebateMode::Manual);
        session.send_follow_up("hello?").unwrap();
        session.apply_event(
            &config,
            &Message::ResponseReady {
                agent_id: "a".into(),
                text: "hi".into(),
                round_id: None,
            },
        );

        let turn = session.current_turn().unwrap();
        assert_eq!(turn.kind, TurnKind::FollowUp);
        let rendered = render_turn(&config, turn);
        assert!(rendered.starts_with("=== follow-up ===\n> hello?"));
        assert!(rendered.contains("[Alpha]\nhi"));
        assert!(rendered.contains("[b] (no response)"));
    }
}
