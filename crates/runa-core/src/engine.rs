// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The execution engine: drives the step loop against one model and one
//! tool registry, translating provider stream events into the canonical
//! [`ExecEvent`] vocabulary.
//!
//! Within a run the loop is cooperative and sequential: one LLM segment
//! and at most one tool call are outstanding at any time.  A **step** is
//! one tool invocation, bounded by `max_steps`; at 90% of the budget a
//! warning is logged, at the budget the model gets one final tool-free
//! segment and the finish is annotated.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use runa_model::{
    CompletionRequest, FinishReason, Message, ModelProvider, ResponseEvent, Usage,
};
use runa_tools::{ToolCall, ToolOutput, ToolRegistry};

use crate::context::ContextManager;
use crate::doom::DoomLoopDetector;
use crate::error::{classify_tool_failure, failure_envelope, is_context_overflow, CoreError};
use crate::events::ExecEvent;

pub struct EngineConfig {
    pub max_steps: u32,
    /// Per-tool wall-clock cap; zero disables it.
    pub tool_timeout: Duration,
}

pub struct ExecutionEngine {
    model: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    context: ContextManager,
    doom: DoomLoopDetector,
    config: EngineConfig,
    cancel: CancellationToken,
    system_messages: Vec<String>,
}

/// Accumulates streamed tool-call chunks for one parallel-call index.
#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    /// Resolve to a dispatchable call.  Arguments always resolve to a JSON
    /// object — providers reject `null` inputs on the next request.
    fn finish(self, ordinal: usize) -> ToolCall {
        let args = if self.args_buf.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.args_buf).unwrap_or_else(|e| {
                warn!(
                    tool = %self.name,
                    error = %e,
                    "model sent invalid JSON arguments; substituting {{}}"
                );
                Value::Object(Default::default())
            })
        };
        let id = if self.id.is_empty() {
            // An empty id would violate providers' id constraints on the
            // next turn; synthesise one.
            format!("call_synthetic_{ordinal}")
        } else {
            self.id
        };
        ToolCall {
            id,
            name: self.name,
            args,
        }
    }
}

impl ExecutionEngine {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        context: ContextManager,
        doom: DoomLoopDetector,
        config: EngineConfig,
        cancel: CancellationToken,
        system_messages: Vec<String>,
    ) -> Self {
        Self {
            model,
            tools,
            context,
            doom,
            config,
            cancel,
            system_messages,
        }
    }

    /// Run the step loop to completion, emitting events into `tx`.
    ///
    /// All failures surface as events (`Error` is always the last event
    /// when one occurs); the returned future itself never errors.
    pub async fn run(mut self, user_message: String, tx: mpsc::Sender<ExecEvent>) {
        let run_start = Utc::now();
        let run_timer = std::time::Instant::now();
        let mut steps: u32 = 0;
        let mut first_token_sent = false;
        let mut usage_total = Usage::default();
        let mut saw_usage = false;
        let mut step_limit_hit = false;
        let mut llm_calls: u32 = 0;
        let warn_at = ((self.config.max_steps as f32) * 0.9).ceil() as u32;

        self.context.push(Message::user(user_message));

        loop {
            if self.cancel.is_cancelled() {
                let _ = tx.send(ExecEvent::Error { error: CoreError::UserInterrupt }).await;
                return;
            }

            if self.context.should_compact() {
                debug!(tokens = self.context.token_count(), "compacting context");
                self.context.compact(&self.model).await;
            }

            let with_tools = !step_limit_hit;
            let segment_start = Utc::now();
            let _ = tx
                .send(ExecEvent::LlmStart {
                    model: self.model.id().to_string(),
                    start: segment_start,
                })
                .await;

            let mut messages: Vec<Message> = self
                .system_messages
                .iter()
                .map(|s| Message::system(s.clone()))
                .collect();
            messages.extend(self.context.messages().iter().cloned());

            let req = CompletionRequest {
                messages,
                tools: if with_tools {
                    self.tools
                        .schemas()
                        .into_iter()
                        .map(|s| runa_model::ToolSchema {
                            name: s.name,
                            description: s.description,
                            parameters: s.parameters,
                        })
                        .collect()
                } else {
                    vec![]
                },
                stream: true,
                max_output_tokens: None,
                temperature: None,
            };

            let mut stream = match self.model.complete(req).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx.send(ExecEvent::Error { error: self.classify_provider_error(e, llm_calls) }).await;
                    return;
                }
            };
            llm_calls += 1;

            // ── Drain one segment ─────────────────────────────────────────────
            let mut segment_text = String::new();
            let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();
            let mut finish_reason = FinishReason::Stop;
            loop {
                let event = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        let _ = tx.send(ExecEvent::Error { error: CoreError::UserInterrupt }).await;
                        return;
                    }
                    ev = stream.next() => ev,
                };
                let Some(event) = event else { break };
                let event = match event {
                    Ok(ev) => ev,
                    Err(e) => {
                        let _ = tx.send(ExecEvent::Error { error: self.classify_provider_error(e, llm_calls) }).await;
                        return;
                    }
                };
                match event {
                    ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                        if !first_token_sent {
                            first_token_sent = true;
                            let _ = tx.send(ExecEvent::FirstToken { at: Utc::now() }).await;
                        }
                        segment_text.push_str(&delta);
                        let _ = tx.send(ExecEvent::Text { text: delta }).await;
                    }
                    ResponseEvent::TextDelta(_) => {}
                    ResponseEvent::ReasoningDelta(delta) => {
                        if !first_token_sent {
                            first_token_sent = true;
                            let _ = tx.send(ExecEvent::FirstToken { at: Utc::now() }).await;
                        }
                        let _ = tx.send(ExecEvent::Reasoning { text: delta }).await;
                    }
                    ResponseEvent::ToolCall { index, id, name, arguments } => {
                        let slot = pending.entry(index).or_default();
                        if !id.is_empty() {
                            slot.id = id;
                        }
                        if !name.is_empty() {
                            slot.name = name;
                        }
                        slot.args_buf.push_str(&arguments);
                    }
                    ResponseEvent::Usage(usage) => {
                        usage_total.add(&usage);
                        saw_usage = true;
                        self.context.update_from_usage(&usage);
                    }
                    ResponseEvent::Done(reason) => {
                        finish_reason = reason;
                        break;
                    }
                    ResponseEvent::Error(msg) => warn!("provider stream warning: {msg}"),
                }
            }

            if !segment_text.is_empty() {
                self.context.push(Message::assistant(segment_text.clone()));
            }

            // Flush accumulated tool calls ordered by provider index;
            // unnamed calls cannot be dispatched and are dropped.
            let mut calls: Vec<(u32, PendingToolCall)> = pending.into_iter().collect();
            calls.sort_by_key(|(index, _)| *index);
            let calls: Vec<ToolCall> = calls
                .into_iter()
                .enumerate()
                .filter_map(|(i, (_, ptc))| {
                    if ptc.name.is_empty() {
                        warn!("dropping tool call with empty name from model");
                        None
                    } else {
                        Some(ptc.finish(i))
                    }
                })
                .collect();

            if calls.is_empty() {
                let note = step_limit_hit.then(|| {
                    format!("stopped after reaching the step limit ({})", self.config.max_steps)
                });
                let _ = tx
                    .send(ExecEvent::Finish {
                        reason: finish_reason_str(finish_reason).to_string(),
                        usage: saw_usage.then_some(usage_total),
                        start: run_start,
                        duration_ms: run_timer.elapsed().as_millis() as u64,
                        note,
                    })
                    .await;
                return;
            }

            // ── Dispatch tools sequentially ───────────────────────────────────
            for call in calls {
                steps += 1;
                if steps == warn_at && warn_at < self.config.max_steps {
                    debug!(
                        steps,
                        max_steps = self.config.max_steps,
                        "approaching the step limit"
                    );
                }

                if let Err(error) = self.doom.record(&call.name, &call.args) {
                    let _ = tx.send(ExecEvent::Error { error }).await;
                    return;
                }

                let call_start = Utc::now();
                let call_timer = std::time::Instant::now();
                let is_sub_agent = call.name.starts_with("subagent__");
                let _ = tx
                    .send(ExecEvent::ToolCall {
                        name: call.name.clone(),
                        call_id: call.id.clone(),
                        input: call.args.clone(),
                        start: call_start,
                        is_sub_agent,
                    })
                    .await;

                // The conversation must carry the call before its result.
                self.context.push(Message::tool_call(
                    call.id.clone(),
                    call.name.clone(),
                    call.args.to_string(),
                ));

                let output = if self.tools.get(&call.name).is_none() {
                    // Unknown tool: tell the model what exists and let it
                    // adapt rather than killing the run.
                    let msg = format!(
                        "unknown tool `{}`; available tools: {}",
                        call.name,
                        self.tools.names().join(", ")
                    );
                    ToolOutput::err(&call.id, msg)
                } else {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            let _ = tx.send(ExecEvent::Error { error: CoreError::UserInterrupt }).await;
                            return;
                        }
                        out = self.tools.execute_with_timeout(&call, self.config.tool_timeout) => out,
                    }
                };

                let (canonical, failed) = normalize_tool_result(&output);
                // Tools that already return the structured failure envelope
                // (sub-agents do) pass through; everything else gets wrapped
                // with a classification.
                let already_enveloped =
                    output.raw.get("success").is_some() && output.raw.get("error").is_some();
                let (final_output, raw_output) = if failed && !already_enveloped {
                    let envelope = failure_envelope(&classify_tool_failure(&canonical));
                    (envelope.to_string(), output.raw.clone())
                } else if failed {
                    (output.raw.to_string(), output.raw.clone())
                } else {
                    (canonical, output.raw.clone())
                };

                let _ = tx
                    .send(ExecEvent::ToolResult {
                        name: call.name.clone(),
                        call_id: call.id.clone(),
                        output: final_output.clone(),
                        raw_output,
                        start: call_start,
                        duration_ms: call_timer.elapsed().as_millis() as u64,
                        failed,
                        metadata: output.metadata.clone(),
                    })
                    .await;

                self.context
                    .push(Message::tool_result(call.id.clone(), final_output));

                // A cycle violation surfaces through the tool path but is
                // fatal to the whole run, not something the model may talk
                // its way around.
                if failed
                    && output.raw.pointer("/error/type").and_then(Value::as_str)
                        == Some("CYCLE_DETECTED")
                {
                    let message = output
                        .raw
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .unwrap_or("sub-agent cycle")
                        .to_string();
                    let _ = tx
                        .send(ExecEvent::Error {
                            error: CoreError::CycleDetected(message),
                        })
                        .await;
                    return;
                }

                if steps >= self.config.max_steps && !step_limit_hit {
                    step_limit_hit = true;
                    debug!(max_steps = self.config.max_steps, "step limit reached; final tool-free segment");
                }
            }
        }
    }

    /// Map a provider error to the taxonomy.  Context-overflow phrases get
    /// a compaction hint — or a smaller-sub-agents hint when even the very
    /// first call overflowed (compaction cannot help an oversized prompt).
    fn classify_provider_error(&self, e: anyhow::Error, llm_calls: u32) -> CoreError {
        let msg = e.to_string();
        if is_context_overflow(&msg) {
            let hint = if llm_calls == 0 {
                "the initial prompt exceeds the model context; split the work into smaller sub-agents"
            } else {
                "consider lowering COMPACTION_THRESHOLD so compaction runs earlier"
            };
            return CoreError::ContextOverflow(format!("{msg} ({hint})"));
        }
        let lower = msg.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") {
            CoreError::RateLimit(msg)
        } else if lower.contains("unauthorized")
            || lower.contains("api key")
            || lower.contains("401")
        {
            CoreError::AuthenticationMissing(msg)
        } else if lower.contains("network") || lower.contains("connection") {
            CoreError::NetworkError(msg)
        } else {
            CoreError::ServerError(msg)
        }
    }
}

fn finish_reason_str(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::ToolCalls => "tool-calls",
        FinishReason::Length => "length",
    }
}

/// Unwrap the shapes tool results arrive in into the canonical string,
/// and decide whether the result is a failure.
///
/// Accepted shapes: plain strings, `{output}` / `{result}` envelopes, and
/// MCP-style `{content: [{type: "text", text}, ...]}` arrays.  Failure is
/// flagged by the tool itself (`is_error`), by `success: false` or an
/// `error` field in the raw shape, or by `metadata.exitCode != 0`.
pub(crate) fn normalize_tool_result(output: &ToolOutput) -> (String, bool) {
    let raw = &output.raw;
    let canonical = match raw {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("output") {
                s.clone()
            } else if let Some(Value::String(s)) = map.get("result") {
                s.clone()
            } else if let Some(Value::Array(items)) = map.get("content") {
                items
                    .iter()
                    .filter_map(|item| {
                        item.get("text").and_then(Value::as_str).map(str::to_string)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                raw.to_string()
            }
        }
        other => other.to_string(),
    };

    let shape_failed = match raw {
        Value::Object(map) => {
            map.get("success") == Some(&Value::Bool(false)) || map.contains_key("error")
        }
        _ => false,
    };
    let exit_failed = output
        .metadata
        .as_ref()
        .and_then(|m| m.get("exitCode"))
        .and_then(Value::as_i64)
        .is_some_and(|code| code != 0);

    (canonical, output.is_error || shape_failed || exit_failed)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
