//! Round coordination over the simulated backend: staleness, exactly-once
//! completion, per-agent timeout isolation and session reuse.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use coordination::simulation::{Reply, Responder, SimulatedHost};
use coordination::{
    AgentDescriptor, DebateConfig, Message, Orchestrator, ProviderKind, RoundId, TimingConfig,
};

fn agent(id: &str, name: &str, provider: ProviderKind) -> AgentDescriptor {
    AgentDescriptor {
        id: id.into(),
        name: name.into(),
        provider,
        color: provider.site().default_color.into(),
        system_prompt: String::new(),
    }
}

fn setup(responder: Responder) -> (Arc<SimulatedHost>, Orchestrator) {
    let host = SimulatedHost::new(responder).shared();
    let config = DebateConfig {
        agents: vec![
            agent("a", "Alpha", ProviderKind::Chatgpt),
            agent("b", "Beta", ProviderKind::Claude),
        ],
        ..Default::default()
    };
    let orch = Orchestrator::new(host.clone(), config.shared(), TimingConfig::default());
    (host, orch)
}

fn start_query(question: &str) -> Message {
    Message::StartQuery {
        question: question.into(),
        agent_ids: vec!["a".into(), "b".into()],
    }
}

/// Collect events until the completion of `round`.
async fn until_complete(
    rx: &mut broadcast::Receiver<Message>,
    round: RoundId,
) -> (Vec<Message>, Message) {
    let mut seen = Vec::new();
    loop {
        let event = rx.recv().await.expect("bus closed");
        if matches!(event, Message::QueryComplete { round_id: Some(id), .. } if id == round) {
            return (seen, event);
        }
        seen.push(event);
    }
}

fn drain(rx: &mut broadcast::Receiver<Message>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_superseded_round_events_never_surface() {
    let (_host, orch) = setup(Arc::new(|p| Reply::text(format!("{} answers", p.name))));
    let mut rx = orch.bus().subscribe();

    let first = orch.handle(start_query("first")).await.unwrap();
    let second = orch.handle(start_query("second")).await.unwrap();
    assert_eq!(second, first + 1);

    let (seen, _) = until_complete(&mut rx, second).await;
    tokio::time::sleep(Duration::from_secs(300)).await;
    let late = drain(&mut rx);

    for event in seen.iter().chain(late.iter()) {
        if let Some(round) = event.round_id() {
            assert_eq!(round, second, "stale event surfaced: {:?}", event);
        }
    }
    let extra_completions = late
        .iter()
        .filter(|e| e.event_type() == "QUERY_COMPLETE")
        .count();
    assert_eq!(extra_completions, 0);
    assert!(orch.coordinator().pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_completion_carries_every_result_once() {
    let (_host, orch) = setup(Arc::new(|p| Reply::text(format!("{} answers", p.name))));
    let mut rx = orch.bus().subscribe();

    let round = orch.handle(start_query("q")).await.unwrap();
    let (seen, done) = until_complete(&mut rx, round).await;

    let Message::QueryComplete { results, .. } = done else {
        unreachable!()
    };
    let mut texts: Vec<_> = results.iter().map(|r| r.text.as_str()).collect();
    texts.sort();
    assert_eq!(texts, vec!["Alpha answers", "Beta answers"]);

    let ready = seen
        .iter()
        .filter(|e| e.event_type() == "RESPONSE_READY")
        .count();
    assert_eq!(ready, 2);
}

#[tokio::test(start_paused = true)]
async fn test_silent_agent_times_out_without_blocking_sibling() {
    let responder: Responder = Arc::new(|p| {
        if p.provider == ProviderKind::Claude {
            Reply::Silent
        } else {
            Reply::text("quick")
        }
    });
    let (_host, orch) = setup(responder);
    let mut rx = orch.bus().subscribe();

    let started = tokio::time::Instant::now();
    let round = orch.handle(start_query("q")).await.unwrap();
    let (seen, done) = until_complete(&mut rx, round).await;

    // Alpha's answer lands long before Beta gives up.
    let alpha_ready = seen
        .iter()
        .position(|e| e.event_type() == "RESPONSE_READY")
        .unwrap();
    let beta_error = seen
        .iter()
        .position(|e| matches!(e, Message::Error { agent_id: Some(id), .. } if id == "b"))
        .unwrap();
    assert!(alpha_ready < beta_error);
    assert!(started.elapsed() >= Duration::from_secs(120));

    assert_eq!(
        seen[beta_error],
        Message::agent_error("b", "response timed out (120s)", Some(round))
    );
    let Message::QueryComplete { results, .. } = done else {
        unreachable!()
    };
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].agent_id, "a");
}

#[tokio::test(start_paused = true)]
async fn test_sessions_are_reused_across_rounds() {
    let (host, orch) = setup(Arc::new(|_| Reply::text("same tab")));
    let mut rx = orch.bus().subscribe();

    let round = orch.handle(start_query("one")).await.unwrap();
    until_complete(&mut rx, round).await;
    assert_eq!(host.session_count(), 2);

    let round = orch.handle(start_query("two")).await.unwrap();
    until_complete(&mut rx, round).await;
    assert_eq!(host.session_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reset_all_opens_fresh_sessions() {
    let (host, orch) = setup(Arc::new(|_| Reply::text("hi")));
    let mut rx = orch.bus().subscribe();

    let round = orch.handle(start_query("one")).await.unwrap();
    until_complete(&mut rx, round).await;

    orch.handle(Message::ResetAll {
        agent_ids: vec!["a".into(), "b".into()],
    })
    .await;
    assert!(drain(&mut rx).contains(&Message::ResetAllComplete));
    // old pages closed, one fresh page per agent
    assert_eq!(host.session_count(), 2);
    assert!(host.page("sim-1").is_none());
    assert_eq!(
        orch.broker().active_agents().await,
        vec!["a".to_string(), "b".to_string()]
    );
}
