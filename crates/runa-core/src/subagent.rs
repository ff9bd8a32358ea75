// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Sub-agent fan-out: every declared sub-agent becomes a tool named
//! `subagent__<name>` in the parent's registry.  Calling it parses the
//! child document and drives a full nested run (prepare → execute →
//! process) one depth level down, with the child session physically
//! nested under the parent's directory.
//!
//! The child's token total is volunteered back through `tokens_used`
//! metadata so the parent's accounting can roll it up.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use runa_config::{parse_agent_file, SubagentRef};
use runa_journal::Journal;
use runa_model::ProviderRegistry;
use runa_tools::{Tool, ToolCall, ToolOutput};

use crate::error::CoreError;
use crate::prepare::{ProjectContext, RunOptions};
use crate::run::run_agent;

/// Everything a nested run inherits from its parent.
#[derive(Clone)]
pub(crate) struct SubAgentContext {
    pub journal: Arc<Journal>,
    pub providers: Arc<ProviderRegistry>,
    pub project: ProjectContext,
    /// Parent's model override propagates into every child.
    pub model_override: Option<String>,
    pub parent_session_id: String,
    pub depth: usize,
    /// Call chain including the parent itself.
    pub call_chain: Vec<PathBuf>,
    pub cancel: CancellationToken,
}

pub(crate) struct SubAgentTool {
    name: String,
    description: String,
    resolved_path: PathBuf,
    ctx: SubAgentContext,
}

impl SubAgentTool {
    pub fn new(decl: SubagentRef, resolved_path: PathBuf, ctx: SubAgentContext) -> Self {
        Self {
            name: format!("subagent__{}", decl.tool_name()),
            description: format!(
                "Delegate a task to the `{}` sub-agent and return its final text. \
                 Provide a complete, self-contained task description — the \
                 sub-agent does not see this conversation.",
                decl.tool_name()
            ),
            resolved_path,
            ctx,
        }
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The task for the sub-agent"
                }
            },
            "required": ["task"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(task) = call.args.get("task").and_then(Value::as_str) else {
            return ToolOutput::err(&call.id, "missing 'task'");
        };

        let agent = match parse_agent_file(&self.resolved_path) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, format!("sub-agent load failed: {e}")),
        };

        debug!(
            subagent = %self.name,
            depth = self.ctx.depth + 1,
            "spawning sub-agent"
        );

        let opts = RunOptions {
            prompt: Some(task.to_string()),
            model_override: self.ctx.model_override.clone(),
            abort: Some(self.ctx.cancel.child_token()),
            depth: self.ctx.depth + 1,
            call_chain: self.ctx.call_chain.clone(),
            parent_session_id: Some(self.ctx.parent_session_id.clone()),
            mcp_servers: vec![],
        };

        // Recursion bottoms out here: the nested `run_agent` future goes
        // through this boxed trait object, so the type is finite.
        let result = run_agent(
            agent,
            self.ctx.project.clone(),
            Arc::clone(&self.ctx.providers),
            Arc::clone(&self.ctx.journal),
            opts,
        )
        .await;

        match result {
            Ok(run) => {
                let metadata = json!({
                    "tokens_used": run.tokens_used + run.sub_agent_tokens,
                    "agent": true,
                    "session_id": run.session_id,
                });
                if run.success {
                    let text = if run.final_text.is_empty() {
                        "(sub-agent produced no text output)".to_string()
                    } else {
                        run.final_text
                    };
                    ToolOutput::ok(&call.id, text).with_metadata(metadata)
                } else {
                    let (code, message) = run
                        .error
                        .map(|e| (e.code, e.message))
                        .unwrap_or_else(|| ("UNKNOWN".into(), "sub-agent failed".into()));
                    ToolOutput::err(&call.id, format!("sub-agent error [{code}]: {message}"))
                        .with_metadata(metadata)
                }
            }
            // Prepare-time failures: no child session exists.  Cycle and
            // depth violations must stay fatal in the parent, so they ship
            // as a pre-built envelope the engine recognises.
            Err(e @ (CoreError::CycleDetected(_) | CoreError::DepthExceeded(_))) => {
                let message = match &e {
                    CoreError::CycleDetected(chain) => chain.clone(),
                    other => other.to_string(),
                };
                ToolOutput {
                    call_id: call.id.clone(),
                    raw: json!({
                        "success": false,
                        "error": {
                            "type": e.code(),
                            "message": message,
                            "retryable": false,
                            "suggestions": [],
                        }
                    }),
                    is_error: true,
                    metadata: None,
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("sub-agent error: {e}")),
        }
    }
}
