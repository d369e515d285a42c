//! Prompt construction for each kind of debate round.

use std::collections::BTreeMap;

use crate::config::{AgentDescriptor, AgentId, DebateConfig};

/// Sent to the winning participant to write the conclusion.
pub const CONCLUSION_PROMPT: &str = "Synthesize the debate so far into a final conclusion to the \
original question. Take every participant's opinion into account and write a balanced conclusion.";

/// Comma-joined names of the selected participants, in config order.
pub fn participant_list(config: &DebateConfig, participants: &[AgentId]) -> String {
    config
        .agents
        .iter()
        .filter(|a| participants.contains(&a.id))
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Fill the initial prompt template for one participant. Without a
/// descriptor the bare question is sent.
pub fn render_initial_prompt(
    template: &str,
    agent: Option<&AgentDescriptor>,
    participant_list: &str,
    pass_keyword: &str,
    question: &str,
) -> String {
    let Some(agent) = agent else {
        return question.to_string();
    };
    template
        .replace("{{modelName}}", &agent.name)
        .replace("{{systemPrompt}}", &agent.system_prompt)
        .replace("{{participantList}}", participant_list)
        .replace("{{passKeyword}}", pass_keyword)
        .replace("{{question}}", question)
}

/// Initial prompts for every participant.
pub fn initial_prompts(
    config: &DebateConfig,
    participants: &[AgentId],
    question: &str,
) -> BTreeMap<AgentId, String> {
    let list = participant_list(config, participants);
    participants
        .iter()
        .map(|id| {
            let prompt = render_initial_prompt(
                &config.initial_prompt_template,
                config.agent(id),
                &list,
                &config.pass_keyword,
                question,
            );
            (id.clone(), prompt)
        })
        .collect()
}

/// Prompt showing one respondent what every other respondent said.
pub fn cross_debate_prompt(
    config: &DebateConfig,
    agent_id: &str,
    respondents: &[AgentId],
    responses: &BTreeMap<AgentId, String>,
) -> String {
    let others = respondents
        .iter()
        .filter(|id| id.as_str() != agent_id)
        .map(|id| {
            let text = responses.get(id).map(String::as_str).unwrap_or_default();
            format!("[{}] {}", config.display_name(id), text)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Other participants' opinions:\n\n{}\n\nShare your view on the opinions above: agree, \
         rebut, or add to them. If you have nothing more to add, output \"{}\".",
        others, config.pass_keyword
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    fn config() -> DebateConfig {
        let agent = |id: &str, name: &str| AgentDescriptor {
            id: id.into(),
            name: name.into(),
            provider: ProviderKind::Chatgpt,
            color: "#000000".into(),
            system_prompt: format!("You are {}.", name),
        };
        DebateConfig {
            agents: vec![agent("a", "Alpha"), agent("b", "Beta"), agent("c", "Gamma")],
            ..Default::default()
        }
    }

    #[test]
    fn test_participant_list_follows_config_order() {
        let config = config();
        let list = participant_list(&config, &["c".to_string(), "a".to_string()]);
        assert_eq!(list, "Alpha, Gamma");
    }

    #[test]
    fn test_initial_prompt_fills_every_placeholder() {
        let config = config();
        let prompts = initial_prompts(&config, &["a".to_string(), "b".to_string()], "Is P = NP?");
        let alpha = &prompts["a"];
        assert!(alpha.contains("\"Alpha\""));
        assert!(alpha.contains("You are Alpha."));
        assert!(alpha.contains("Alpha, Beta"));
        assert!(alpha.contains("output \"[PASS]\""));
        assert!(alpha.ends_with("Question: Is P = NP?"));
        assert!(!alpha.contains("{{"));
    }

    #[test]
    fn test_unknown_agent_gets_bare_question() {
        let config = config();
        let prompts = initial_prompts(&config, &["zz".to_string()], "why?");
        assert_eq!(prompts["zz"], "why?");
    }

    #[test]
    fn test_cross_debate_prompt_excludes_self() {
        let config = config();
        let respondents = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let responses: BTreeMap<_, _> = [
            ("a".to_string(), "yes".to_string()),
            ("b".to_string(), "no".to_string()),
            ("c".to_string(), "maybe".to_string()),
        ]
        .into_iter()
        .collect();

        let prompt = cross_debate_prompt(&config, "b", &respondents, &responses);
        assert!(prompt.contains("[Alpha] yes\n\n[Gamma] maybe"));
        assert!(!prompt.contains("[Beta]"));
        assert!(prompt.contains("\"[PASS]\""));
    }
}
