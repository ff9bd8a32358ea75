// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! MCP tool adaptation.
//!
//! The wire transport (stdio / HTTP) lives outside the runtime; whatever
//! speaks it implements [`McpServer`].  At prepare time each server's
//! tools are projected into the flat registry as `mcp_<server>_<tool>`.
//! MCP results arrive as content arrays; the engine's result
//! normalisation joins them into the canonical text string.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::registry::ToolRegistry;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// One tool as advertised by an MCP server.
#[derive(Debug, Clone)]
pub struct McpToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Fixed interface to an MCP server; the transport is the implementor's
/// problem.
#[async_trait]
pub trait McpServer: Send + Sync {
    fn name(&self) -> &str;
    async fn list_tools(&self) -> anyhow::Result<Vec<McpToolDef>>;
    /// Call a tool and return the raw MCP result value (typically
    /// `{"content": [{"type": "text", "text": ...}], "isError": bool}`).
    async fn call_tool(&self, tool: &str, args: Value) -> anyhow::Result<Value>;
}

/// List `server`'s tools and register each under the `mcp_` namespace.
pub async fn register_mcp_server(
    registry: &mut ToolRegistry,
    server: Arc<dyn McpServer>,
) -> anyhow::Result<()> {
    let defs = server.list_tools().await?;
    debug!(server = server.name(), tools = defs.len(), "registering MCP tools");
    for def in defs {
        let full_name = format!("mcp_{}_{}", server.name(), def.name);
        registry.register(McpTool {
            full_name,
            def,
            server: Arc::clone(&server),
        });
    }
    Ok(())
}

struct McpTool {
    full_name: String,
    def: McpToolDef,
    server: Arc<dyn McpServer>,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn description(&self) -> &str {
        &self.def.description
    }

    fn parameters_schema(&self) -> Value {
        self.def.input_schema.clone()
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self
            .server
            .call_tool(&self.def.name, call.args.clone())
            .await
        {
            Ok(raw) => {
                let is_error = raw
                    .get("isError")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                ToolOutput {
                    call_id: call.id.clone(),
                    raw,
                    is_error,
                    metadata: None,
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("mcp call failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
