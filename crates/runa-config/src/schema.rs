// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Declarative configuration block of an agent document.
///
/// All fields come from the YAML preamble of a `.agentuse` file.  Unknown
/// keys are ignored so older runtimes can read newer documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Model reference of the form `provider:model[:envSuffixOrVar]`.
    pub model: Option<String>,
    /// Per-run wall-clock timeout in seconds.
    pub timeout: Option<u64>,
    /// Maximum number of tool invocations ("steps") in one run.
    pub max_steps: Option<u32>,
    /// MCP servers this agent wants connected, keyed by server name.
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
    /// Built-in tool selection (allow / deny patterns).
    #[serde(default)]
    pub tools: ToolsSelection,
    /// Declared sub-agents, each callable as a `subagent__<name>` tool.
    #[serde(default)]
    pub subagents: Vec<SubagentRef>,
    /// Cron-style schedule expression (see runa-scheduler for the grammar).
    pub schedule: Option<String>,
    /// Persistent store: `true` for an agent-private store, or a string
    /// naming a store shared between agents.
    pub store: Option<StoreDecl>,
    /// Learning configuration (apply accumulated notes to the prompt).
    pub learning: Option<LearningConfig>,
    /// Agent kind; `manager` agents are expected to mostly delegate.
    #[serde(rename = "type")]
    pub kind: Option<AgentKind>,
}

/// One MCP server declaration.
///
/// Either a spawned process (`command` + `args`) or a remote endpoint
/// (`url`).  The transport itself lives behind the `McpServer` trait in
/// runa-tools; this struct only carries what the preamble can express.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub url: Option<String>,
}

/// Allow/deny selection over the built-in tool namespace.
///
/// Patterns use simple globs (`*` and `?`).  Deny wins over allow; an
/// empty allow list means "everything not denied".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsSelection {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Reference to a sub-agent document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentRef {
    /// Path to the sub-agent document, relative to the declaring document.
    pub path: String,
    /// Optional alias; defaults to the file stem of `path`.
    pub name: Option<String>,
}

impl SubagentRef {
    /// The tool-name component for this sub-agent: the explicit alias when
    /// given, otherwise the file stem of `path` (without `.agentuse`).
    pub fn tool_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let stem = self
            .path
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
            .trim_end_matches(".agentuse");
        stem.to_string()
    }
}

/// Store declaration: `store: true` or `store: <shared-name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreDecl {
    Enabled(bool),
    Named(String),
}

impl StoreDecl {
    /// Whether a store should be attached at all.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, StoreDecl::Enabled(false))
    }

    /// The store name: the shared name when given, otherwise the agent's
    /// own id (isolated store).
    pub fn store_name(&self, agent_id: &str) -> String {
        match self {
            StoreDecl::Named(name) => name.clone(),
            StoreDecl::Enabled(_) => agent_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningConfig {
    #[serde(default)]
    pub apply: bool,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Manager,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_parses_from_yaml() {
        let yaml = r#"
model: anthropic:claude-sonnet-4-5
timeout: 300
maxSteps: 20
subagents:
  - path: ./helper.agentuse
    name: helper
schedule: "every 5 minutes"
store: true
"#;
        let cfg: AgentConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.model.as_deref(), Some("anthropic:claude-sonnet-4-5"));
        assert_eq!(cfg.timeout, Some(300));
        assert_eq!(cfg.max_steps, Some(20));
        assert_eq!(cfg.subagents.len(), 1);
        assert_eq!(cfg.schedule.as_deref(), Some("every 5 minutes"));
        assert_eq!(cfg.store, Some(StoreDecl::Enabled(true)));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let yaml = "model: openai:gpt-test\nfutureKey: whatever\n";
        let cfg: AgentConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.model.as_deref(), Some("openai:gpt-test"));
    }

    #[test]
    fn store_named_form() {
        let cfg: AgentConfig = serde_yaml::from_str("store: shared-notes\n").unwrap();
        let store = cfg.store.unwrap();
        assert!(store.is_enabled());
        assert_eq!(store.store_name("my-agent"), "shared-notes");
    }

    #[test]
    fn store_true_uses_agent_id() {
        let store = StoreDecl::Enabled(true);
        assert_eq!(store.store_name("billing/reporter"), "billing/reporter");
    }

    #[test]
    fn store_false_is_disabled() {
        let store = StoreDecl::Enabled(false);
        assert!(!store.is_enabled());
    }

    #[test]
    fn subagent_tool_name_prefers_alias() {
        let r = SubagentRef {
            path: "./agents/research.agentuse".into(),
            name: Some("scout".into()),
        };
        assert_eq!(r.tool_name(), "scout");
    }

    #[test]
    fn subagent_tool_name_falls_back_to_stem() {
        let r = SubagentRef {
            path: "./agents/research.agentuse".into(),
            name: None,
        };
        assert_eq!(r.tool_name(), "research");
    }

    #[test]
    fn mcp_servers_parse_as_map() {
        let yaml = r#"
mcpServers:
  files:
    command: mcp-files
    args: ["--root", "."]
  remote:
    url: https://mcp.example.com
"#;
        let cfg: AgentConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.mcp_servers.len(), 2);
        assert_eq!(
            cfg.mcp_servers["files"].command.as_deref(),
            Some("mcp-files")
        );
        assert!(cfg.mcp_servers["remote"].url.is_some());
    }

    #[test]
    fn manager_kind_parses() {
        let cfg: AgentConfig = serde_yaml::from_str("type: manager\n").unwrap();
        assert_eq!(cfg.kind, Some(AgentKind::Manager));
    }
}
