// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent document parsing.
//!
//! An agent document is a text file with a YAML preamble and a markdown
//! body:
//!
//! ```markdown
//! ---
//! name: reporter
//! description: Summarises the day's commits
//! model: anthropic:claude-sonnet-4-5
//! maxSteps: 15
//! ---
//!
//! You are a release-notes assistant. Read the git log and ...
//! ```
//!
//! The preamble is full YAML (nested maps for `mcpServers`, lists for
//! `subagents`); the body becomes the agent's instructions verbatim.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::schema::AgentConfig;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("{path}: missing YAML preamble (expected a leading `---` block)")]
    MissingPreamble { path: String },
    #[error("{path}: preamble is not valid YAML: {source}")]
    InvalidPreamble {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path}: instructions body is empty")]
    EmptyBody { path: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A fully parsed agent document.  Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct Agent {
    pub name: String,
    pub description: Option<String>,
    /// The markdown body, before variable resolution.
    pub instructions: String,
    pub config: AgentConfig,
    /// Absolute path of the source file, when known.
    pub file_path: Option<PathBuf>,
}

/// Preamble fields that sit alongside the [`AgentConfig`] keys.
#[derive(Debug, Deserialize)]
struct Preamble {
    name: Option<String>,
    description: Option<String>,
    #[serde(flatten)]
    config: AgentConfig,
}

/// Parse an agent document from its raw text.
///
/// `origin` is used for diagnostics and for the name fallback; pass the
/// file path when available and any display label otherwise.
pub fn parse_agent(content: &str, origin: &str) -> Result<Agent, DocumentError> {
    let (yaml, body) = split_preamble(content).ok_or_else(|| DocumentError::MissingPreamble {
        path: origin.to_string(),
    })?;

    let preamble: Preamble =
        serde_yaml::from_str(yaml).map_err(|source| DocumentError::InvalidPreamble {
            path: origin.to_string(),
            source,
        })?;

    let body = body.trim();
    if body.is_empty() {
        return Err(DocumentError::EmptyBody {
            path: origin.to_string(),
        });
    }

    let name = preamble
        .name
        .unwrap_or_else(|| file_stem_of(origin).to_string());

    Ok(Agent {
        name,
        description: preamble.description,
        instructions: body.to_string(),
        config: preamble.config,
        file_path: None,
    })
}

/// Read and parse an agent document from disk.  The returned agent carries
/// the canonicalised file path, which the runtime uses for agent-id
/// derivation and sub-agent cycle detection.
pub fn parse_agent_file(path: &Path) -> Result<Agent, DocumentError> {
    let content = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut agent = parse_agent(&content, &path.display().to_string())?;
    agent.file_path = Some(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()));
    Ok(agent)
}

/// Split `---\n<yaml>\n---\n<body>` into `(yaml, body)`.
///
/// The preamble must start at the very first line; CRLF line endings are
/// accepted.  Returns `None` when either fence is missing.
fn split_preamble(content: &str) -> Option<(&str, &str)> {
    let header = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;

    let close_unix = header.find("\n---\n");
    let close_crlf = header.find("\n---\r\n");
    let (yaml_end, fence_len) = match (close_unix, close_crlf) {
        (Some(u), Some(c)) if u <= c => (u, "\n---\n".len()),
        (_, Some(c)) => (c, "\n---\r\n".len()),
        (Some(u), _) => (u, "\n---\n".len()),
        (None, None) => return None,
    };

    Some((&header[..yaml_end], &header[yaml_end + fence_len..]))
}

fn file_stem_of(origin: &str) -> &str {
    origin
        .rsplit('/')
        .next()
        .unwrap_or(origin)
        .trim_end_matches(".agentuse")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "---\n\
name: reporter\n\
description: Summarises commits\n\
model: openai:gpt-test\n\
maxSteps: 5\n\
---\n\
\n\
Summarise the day's commits.\n";

    // ── Happy path ────────────────────────────────────────────────────────────

    #[test]
    fn parses_name_description_and_body() {
        let agent = parse_agent(DOC, "reporter.agentuse").unwrap();
        assert_eq!(agent.name, "reporter");
        assert_eq!(agent.description.as_deref(), Some("Summarises commits"));
        assert_eq!(agent.instructions, "Summarise the day's commits.");
        assert_eq!(agent.config.max_steps, Some(5));
    }

    #[test]
    fn name_falls_back_to_file_stem() {
        let doc = "---\nmodel: openai:gpt-test\n---\nDo things.\n";
        let agent = parse_agent(doc, "agents/daily-check.agentuse").unwrap();
        assert_eq!(agent.name, "daily-check");
    }

    #[test]
    fn crlf_fences_are_accepted() {
        let doc = "---\r\nname: win\r\n---\r\nBody here.\r\n";
        let agent = parse_agent(doc, "win.agentuse").unwrap();
        assert_eq!(agent.name, "win");
        assert_eq!(agent.instructions, "Body here.");
    }

    #[test]
    fn nested_preamble_sections_parse() {
        let doc = "---\n\
name: parent\n\
subagents:\n\
  - path: ./child.agentuse\n\
mcpServers:\n\
  fs:\n\
    command: mcp-fs\n\
---\n\
Delegate everything.\n";
        let agent = parse_agent(doc, "parent.agentuse").unwrap();
        assert_eq!(agent.config.subagents.len(), 1);
        assert_eq!(agent.config.mcp_servers.len(), 1);
    }

    // ── Failure modes ─────────────────────────────────────────────────────────

    #[test]
    fn missing_preamble_is_an_error() {
        let err = parse_agent("just markdown, no fences", "x.agentuse").unwrap_err();
        assert!(matches!(err, DocumentError::MissingPreamble { .. }));
    }

    #[test]
    fn unterminated_preamble_is_an_error() {
        let err = parse_agent("---\nname: x\nno closing fence", "x.agentuse").unwrap_err();
        assert!(matches!(err, DocumentError::MissingPreamble { .. }));
    }

    #[test]
    fn invalid_yaml_reports_the_path() {
        let err = parse_agent("---\n: [unbalanced\n---\nbody\n", "bad.agentuse").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bad.agentuse"), "{msg}");
    }

    #[test]
    fn empty_body_is_an_error() {
        let err = parse_agent("---\nname: x\n---\n   \n", "x.agentuse").unwrap_err();
        assert!(matches!(err, DocumentError::EmptyBody { .. }));
    }

    // ── File loading ──────────────────────────────────────────────────────────

    #[test]
    fn parse_agent_file_sets_canonical_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.agentuse");
        std::fs::write(&path, DOC).unwrap();
        let agent = parse_agent_file(&path).unwrap();
        assert!(agent.file_path.as_ref().unwrap().is_absolute());
    }

    #[test]
    fn parse_agent_file_missing_is_io_error() {
        let err = parse_agent_file(Path::new("/nonexistent/agent.agentuse")).unwrap_err();
        assert!(matches!(err, DocumentError::Io { .. }));
    }
}
