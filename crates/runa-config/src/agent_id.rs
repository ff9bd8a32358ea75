// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use crate::document::Agent;

/// Derive the stable agent identifier used for session and store naming.
///
/// The id is the agent file path relative to the project root, with the
/// `.agentuse` suffix stripped.  When the file path is unknown (agent
/// parsed from a string), the agent's display name is used instead.
pub fn derive_agent_id(agent: &Agent, project_root: &Path) -> String {
    match &agent.file_path {
        Some(path) => {
            let rel = path.strip_prefix(project_root).unwrap_or(path);
            let s = rel.to_string_lossy();
            s.trim_end_matches(".agentuse").to_string()
        }
        None => agent.name.clone(),
    }
}

/// Sanitise an agent id for use as a filesystem directory component.
///
/// Lowercases, replaces every character outside `[a-z0-9-_]` with `-`,
/// collapses runs of `-`, strips leading/trailing `-`.  An empty result
/// maps to `default`.
pub fn sanitize_agent_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    let mut last_dash = false;
    for ch in id.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            // Everything else becomes '-'; runs collapse to one.
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "default".to_string()
    } else {
        trimmed.to_string()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn agent_at(path: Option<&str>, name: &str) -> Agent {
        Agent {
            name: name.to_string(),
            description: None,
            instructions: "x".to_string(),
            config: Default::default(),
            file_path: path.map(PathBuf::from),
        }
    }

    // ── Derivation ────────────────────────────────────────────────────────────

    #[test]
    fn id_is_relative_path_without_suffix() {
        let a = agent_at(Some("/proj/agents/daily.agentuse"), "daily");
        assert_eq!(derive_agent_id(&a, Path::new("/proj")), "agents/daily");
    }

    #[test]
    fn id_outside_root_keeps_absolute_path() {
        let a = agent_at(Some("/elsewhere/bot.agentuse"), "bot");
        assert_eq!(derive_agent_id(&a, Path::new("/proj")), "/elsewhere/bot");
    }

    #[test]
    fn id_falls_back_to_name_without_path() {
        let a = agent_at(None, "inline-agent");
        assert_eq!(derive_agent_id(&a, Path::new("/proj")), "inline-agent");
    }

    // ── Sanitisation ──────────────────────────────────────────────────────────

    #[test]
    fn sanitize_lowercases_and_replaces() {
        assert_eq!(sanitize_agent_id("Agents/Daily Check"), "agents-daily-check");
    }

    #[test]
    fn sanitize_collapses_dash_runs() {
        assert_eq!(sanitize_agent_id("a//--b"), "a-b");
    }

    #[test]
    fn sanitize_strips_edge_dashes() {
        assert_eq!(sanitize_agent_id("/agents/x/"), "agents-x");
    }

    #[test]
    fn sanitize_keeps_underscore_and_digits() {
        assert_eq!(sanitize_agent_id("job_42"), "job_42");
    }

    #[test]
    fn sanitize_empty_maps_to_default() {
        assert_eq!(sanitize_agent_id("///"), "default");
        assert_eq!(sanitize_agent_id(""), "default");
    }
}
