// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use tracing::warn;

/// Runtime settings read from the environment once at startup.
///
/// Every field has a safe default; malformed values are logged and fall
/// back rather than failing the run.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    /// Fraction of the model context limit at which compaction triggers.
    pub compaction_threshold: f32,
    /// Number of most-recent messages preserved verbatim by compaction.
    pub compaction_keep_recent: usize,
    /// Global compaction on/off switch.
    pub context_compaction: bool,
    /// Maximum sub-agent nesting depth.
    pub max_subagent_depth: usize,
    /// Default step budget when the agent document does not set one.
    pub max_steps: u32,
    /// Per-tool timeout in seconds; 0 disables the timeout.
    pub mcp_tool_timeout: u64,
    /// Suppress interactive output (exported for front-ends).
    pub no_tty: bool,
    /// Debug logging requested via `DEBUG`.
    pub debug: bool,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            compaction_threshold: 0.7,
            compaction_keep_recent: 3,
            context_compaction: true,
            max_subagent_depth: 2,
            max_steps: 30,
            mcp_tool_timeout: 60,
            no_tty: false,
            debug: false,
        }
    }
}

impl EnvSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            compaction_threshold: parse_var("COMPACTION_THRESHOLD", d.compaction_threshold),
            compaction_keep_recent: parse_var("COMPACTION_KEEP_RECENT", d.compaction_keep_recent),
            context_compaction: flag_var("CONTEXT_COMPACTION", d.context_compaction),
            max_subagent_depth: parse_var("MAX_SUBAGENT_DEPTH", d.max_subagent_depth),
            max_steps: parse_var("MAX_STEPS", d.max_steps),
            mcp_tool_timeout: parse_var("MCP_TOOL_TIMEOUT", d.mcp_tool_timeout),
            no_tty: flag_var("NO_TTY", d.no_tty),
            debug: flag_var("DEBUG", d.debug),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(var = name, value = %raw, "ignoring unparseable environment variable");
                default
            }
        },
        Err(_) => default,
    }
}

/// Boolean flag: `0`, `false`, `off`, and the empty string are false,
/// everything else set is true.
fn flag_var(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => {
            let v = raw.trim().to_lowercase();
            !(v.is_empty() || v == "0" || v == "false" || v == "off")
        }
        Err(_) => default,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
