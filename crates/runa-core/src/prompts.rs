// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use runa_config::{resolve_variables, Agent, VariableScope};

/// Fixed system prompt for the compaction summariser.
pub const SUMMARIZE_SYSTEM_PROMPT: &str = "\
You are a context compaction assistant. Summarise the conversation history \
below in a concise, information-dense way. You MUST preserve: every decision \
made and its rationale, every error encountered and how it was handled, the \
current state of the task, and any context critical for continuing the work \
(file paths, identifiers, pending items). The summary replaces the original \
history, so anything you drop is gone.";

/// Build the agent's system prompt from its instructions, with the path
/// variables resolved.  `${env:*}` placeholders survive untouched.
pub fn build_system_prompt(agent: &Agent, scope: &VariableScope) -> String {
    let mut prompt = resolve_variables(&agent.instructions, scope);
    if let Some(description) = &agent.description {
        // The description leads so a reader of the journal sees what the
        // agent is for before the full instructions.
        prompt = format!("{description}\n\n{prompt}");
    }
    prompt
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn scope() -> VariableScope {
        VariableScope {
            root: PathBuf::from("/proj"),
            agent_dir: PathBuf::from("/proj/agents"),
            tmp_dir: PathBuf::from("/tmp/run"),
        }
    }

    fn agent(instructions: &str, description: Option<&str>) -> Agent {
        Agent {
            name: "t".into(),
            description: description.map(Into::into),
            instructions: instructions.into(),
            config: Default::default(),
            file_path: None,
        }
    }

    #[test]
    fn variables_resolve_in_instructions() {
        let prompt = build_system_prompt(&agent("work in ${root}", None), &scope());
        assert_eq!(prompt, "work in /proj");
    }

    #[test]
    fn description_leads_when_present() {
        let prompt = build_system_prompt(&agent("body", Some("A probe agent")), &scope());
        assert!(prompt.starts_with("A probe agent\n\n"));
        assert!(prompt.ends_with("body"));
    }

    #[test]
    fn env_placeholders_survive() {
        let prompt = build_system_prompt(&agent("key: ${env:KEY}", None), &scope());
        assert!(prompt.contains("${env:KEY}"));
    }
}
