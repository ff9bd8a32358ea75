// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier from the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
///
/// `raw` carries whatever shape the tool produced — a plain string, an
/// `{output}` / `{result}` envelope, or an MCP-style content array.  The
/// engine normalises `raw` into the canonical string shown to the model
/// and persists the raw shape alongside it.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub raw: Value,
    /// Set when the tool itself failed (as opposed to a failure the engine
    /// infers from the raw shape).
    pub is_error: bool,
    /// Optional side-channel the engine inspects: `tokens_used` for
    /// sub-agent roll-up, `agent: true` to mark sub-agent calls,
    /// `exitCode` for process tools.
    pub metadata: Option<Value>,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            raw: Value::String(content.into()),
            is_error: false,
            metadata: None,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            raw: Value::String(msg.into()),
            is_error: true,
            metadata: None,
        }
    }

    /// Result carrying an arbitrary raw value (envelopes, arrays, ...).
    pub fn raw(call_id: impl Into<String>, raw: Value) -> Self {
        Self {
            call_id: call_id.into(),
            raw,
            is_error: false,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Trait every built-in, store, MCP-adapted and sub-agent tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Fully-qualified tool name as exposed to the model
    /// (`tools__read_file`, `mcp_files_read`, `subagent__helper`, ...).
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Execute the tool.  Failures should be wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_wraps_text_in_string_value() {
        let out = ToolOutput::ok("c1", "hello");
        assert!(!out.is_error);
        assert_eq!(out.raw, Value::String("hello".into()));
    }

    #[test]
    fn err_sets_error_flag() {
        let out = ToolOutput::err("c1", "boom");
        assert!(out.is_error);
    }

    #[test]
    fn metadata_is_attachable() {
        let out = ToolOutput::ok("c1", "x").with_metadata(serde_json::json!({"tokens_used": 42}));
        assert_eq!(out.metadata.unwrap()["tokens_used"], 42);
    }
}
