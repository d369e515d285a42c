//! Console rendering of a debate driven over the simulated backend.

use std::sync::Arc;

use coordination::simulation::{default_responder, SimulatedHost};
use coordination::{ConfigStore, DebateDriver, DebateMode, Orchestrator, ProviderKind, TimingConfig};
use crossfire::console::{parse_command, render_outcome, render_turn, ConsoleCommand};

#[tokio::test(start_paused = true)]
async fn test_rendered_transcript_of_simulated_debate() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConfigStore::load(dir.path().join("crossfire.json")).unwrap();
    store
        .add_agent("Claude", ProviderKind::Claude, "", None)
        .unwrap();
    store
        .add_agent("Gemini", ProviderKind::Gemini, "", None)
        .unwrap();
    let config = store.config().clone();

    let host = SimulatedHost::new(default_responder(&config.pass_keyword)).shared();
    let orch = Arc::new(Orchestrator::new(
        host,
        config.clone().shared(),
        TimingConfig::default(),
    ));
    let participants = config.agents.iter().map(|a| a.id.clone()).collect();
    let mut driver = DebateDriver::new(orch.clone(), participants, DebateMode::Manual);

    driver.start_debate("Cats or dogs?").await.unwrap();

    let session = driver.session();
    let opening = render_turn(&config, &session.turns[0]);
    assert!(opening.starts_with("=== initial ===\n> Cats or dogs?"));
    assert!(opening.contains("[Claude]\nClaude (claude) simulated answer. [PASS]"));
    assert!(opening.contains("[Gemini]\nGemini (gemini) simulated answer. [PASS]"));

    let outcome = render_outcome(&config, session);
    assert!(outcome.contains("=== scores ==="));
    assert!(outcome.contains("=== conclusion by Claude ==="));
    assert!(!outcome.contains("last error"));

    orch.shutdown().await;
}

#[test]
fn test_console_commands_match_driver_operations() {
    assert_eq!(parse_command("cross"), Ok(ConsoleCommand::Cross));
    assert_eq!(parse_command("rank"), Ok(ConsoleCommand::Rank));
    assert_eq!(
        parse_command("follow and why?"),
        Ok(ConsoleCommand::Follow("and why?".into()))
    );
    assert_eq!(parse_command("quit"), Ok(ConsoleCommand::Quit));
}
