//! Ranking extraction and aggregation.
//!
//! Participants rank each other in free text that is expected to contain a
//! JSON object. Scoring is Borda-like: with `n` participants a rank `r`
//! is worth `n - r + 1` points.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{AgentDescriptor, AgentId};
use crate::error::{CrossfireError, CrossfireResult};

static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)```").expect("FENCED_BLOCK_RE regex should compile")
});

/// One rater's placement of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rater_agent_id: AgentId,
    /// Target as written by the rater, before resolution
    pub raw_target: String,
    pub rank: i64,
    pub reason: String,
}

/// Pull the JSON payload out of a free-text reply: the first fenced code
/// block if any, else the first balanced `{...}`.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(block) = FENCED_BLOCK_RE.captures(text).and_then(|c| c.get(1)) {
        return Some(block.as_str().trim());
    }

    let mut start = None;
    let mut depth = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '{' => {
                if start.is_none() {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if start.is_some() => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| &text[s..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a ranking reply, failing if no ranking list can be found.
pub fn try_parse_rankings(rater: &str, text: &str) -> CrossfireResult<Vec<RankingEntry>> {
    let json = extract_json(text)
        .ok_or_else(|| CrossfireError::RankingParseFailure(format!("{}: no JSON found", rater)))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| CrossfireError::RankingParseFailure(format!("{}: {}", rater, e)))?;

    let list = value
        .get("rankings")
        .and_then(Value::as_array)
        .or_else(|| value.as_array())
        .ok_or_else(|| CrossfireError::RankingParseFailure(format!("{}: no ranking list", rater)))?;

    Ok(list
        .iter()
        .filter_map(|entry| {
            let rank = numeric_rank(entry.get("rank")?)?;
            let raw_target = ["modelId", "model", "name", "id"]
                .iter()
                .find_map(|key| entry.get(*key).and_then(Value::as_str))
                .unwrap_or_default()
                .to_string();
            let reason = entry
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(RankingEntry {
                rater_agent_id: rater.to_string(),
                raw_target,
                rank,
                reason,
            })
        })
        .collect())
}

/// Parse a ranking reply. Unparseable output is logged and yields nothing.
pub fn parse_rankings(rater: &str, text: &str) -> Vec<RankingEntry> {
    match try_parse_rankings(rater, text) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(rater, error = %e, "Ignoring ranking reply");
            Vec::new()
        }
    }
}

fn numeric_rank(value: &Value) -> Option<i64> {
    let rank = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        })?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (rank >= 1).then_some(rank)
}

/// Map a rater-written identifier onto a configured agent.
///
/// Exact id first, then case-insensitive name or id, then case-insensitive
/// containment either way. The first agent in config order wins, so
/// overlapping names can resolve to the wrong agent.
pub fn resolve_identifier<'a>(raw: &str, agents: &'a [AgentDescriptor]) -> Option<&'a AgentId> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(agent) = agents.iter().find(|a| a.id == raw) {
        return Some(&agent.id);
    }

    let lower = raw.to_lowercase();
    if let Some(agent) = agents
        .iter()
        .find(|a| a.name.to_lowercase() == lower || a.id.to_lowercase() == lower)
    {
        return Some(&agent.id);
    }

    agents
        .iter()
        .find(|a| {
            [a.name.to_lowercase(), a.id.to_lowercase()]
                .iter()
                .filter(|key| !key.is_empty())
                .any(|key| key.contains(&lower) || lower.contains(key.as_str()))
        })
        .map(|a| &a.id)
}

/// Total score per participant, in participant order.
pub fn aggregate_scores(
    rankings: &BTreeMap<AgentId, Vec<RankingEntry>>,
    participants: &[AgentId],
    agents: &[AgentDescriptor],
) -> Vec<(AgentId, i64)> {
    let n = participants.len() as i64;
    let mut scores: Vec<(AgentId, i64)> = participants.iter().map(|id| (id.clone(), 0)).collect();

    for entry in rankings.values().flatten() {
        let Some(target) = resolve_identifier(&entry.raw_target, agents) else {
            debug!(raw = %entry.raw_target, "Unresolved ranking target");
            continue;
        };
        if let Some((_, score)) = scores.iter_mut().find(|(id, _)| id == target) {
            *score = score.saturating_add(n.saturating_sub(entry.rank).saturating_add(1));
        }
    }
    scores
}

/// Highest score wins; ties and an all-zero board go to the earliest
/// participant.
pub fn select_winner(scores: &[(AgentId, i64)]) -> Option<&AgentId> {
    let (first, first_score) = scores.first()?;
    let mut winner = first;
    let mut top = *first_score;
    for (id, score) in &scores[1..] {
        if *score > top {
            top = *score;
            winner = id;
        }
    }
    Some(winner)
}
