// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The stream processor: single consumer of the engine's event channel.
//!
//! Persists parts into the journal as events arrive, accumulates the
//! in-memory trace the caller summarises from, and debounces text-part
//! writes (~500 ms) so token streaming does not hammer the disk.  A flush
//! is forced before every tool-call part and before finish/error, keeping
//! the on-disk part order equal to the event order.  All outstanding
//! journal writes are awaited before the trace is returned, so tool parts
//! are terminal on disk by the time the run is reported finished.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use runa_journal::{
    AssistantError, AssistantPatch, Journal, MessagePatch, PartBody, PartTime, TokenUsage,
    ToolState, ToolTime, WriteHandle,
};
use runa_model::Usage;

use crate::events::ExecEvent;

/// Debounce window for streamed text part writes.
const TEXT_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ToolTrace {
    pub name: String,
    pub call_id: String,
    pub duration_ms: u64,
    pub failed: bool,
}

/// Everything the caller needs to summarise a run.
#[derive(Debug, Default)]
pub struct RunTrace {
    pub final_text: String,
    pub tool_calls: Vec<ToolTrace>,
    pub usage: Usage,
    /// Tokens volunteered by sub-agent tools via `tokens_used` metadata.
    /// Calls without metadata silently under-count.
    pub sub_agent_tokens: u64,
    pub finish_reason: Option<String>,
    pub finish_note: Option<String>,
    pub first_token_at: Option<DateTime<Utc>>,
    pub error: Option<(String, String)>,
}

struct StreamedPart {
    pid: String,
    buffer: String,
    start: DateTime<Utc>,
    dirty: bool,
}

pub struct StreamProcessor {
    journal: Arc<Journal>,
    sid: String,
    mid: String,
    pending: Vec<WriteHandle>,
    text: Option<StreamedPart>,
    reasoning: Option<StreamedPart>,
    last_flush: Instant,
    /// call_id → (part id, tool name, input, start).
    tools: HashMap<String, (String, String, Value, DateTime<Utc>)>,
    trace: RunTrace,
}

impl StreamProcessor {
    pub fn new(journal: Arc<Journal>, sid: &str, mid: &str) -> Self {
        Self {
            journal,
            sid: sid.to_string(),
            mid: mid.to_string(),
            pending: Vec::new(),
            text: None,
            reasoning: None,
            last_flush: Instant::now(),
            tools: HashMap::new(),
            trace: RunTrace::default(),
        }
    }

    /// Drain the event channel to completion and return the trace.
    pub async fn process(mut self, mut rx: mpsc::Receiver<ExecEvent>) -> RunTrace {
        while let Some(event) = rx.recv().await {
            self.handle(event);
        }
        self.flush_streaming_parts(true);
        for handle in self.pending.drain(..) {
            handle.wait().await;
        }
        self.trace
    }

    fn handle(&mut self, event: ExecEvent) {
        match event {
            ExecEvent::LlmStart { .. } => {
                // New segment: close out streaming parts from the previous
                // one and mark the boundary.
                self.flush_streaming_parts(true);
                let (_, h) = self
                    .journal
                    .add_part(&self.sid, &self.mid, PartBody::StepStart {});
                self.pending.push(h);
            }
            ExecEvent::FirstToken { at } => {
                self.trace.first_token_at = Some(at);
            }
            ExecEvent::Text { text } => {
                self.trace.final_text.push_str(&text);
                self.append_streamed(StreamKind::Text, &text);
                self.maybe_flush();
            }
            ExecEvent::Reasoning { text } => {
                self.append_streamed(StreamKind::Reasoning, &text);
                self.maybe_flush();
            }
            ExecEvent::ToolCall {
                name,
                call_id,
                input,
                start,
                is_sub_agent: _,
            } => {
                self.flush_streaming_parts(true);
                let (pid, h) = self.journal.add_part(
                    &self.sid,
                    &self.mid,
                    PartBody::Tool {
                        call_id: call_id.clone(),
                        tool: name.clone(),
                        state: ToolState::Running {
                            input: input.clone(),
                            time: ToolTime { start, end: None },
                        },
                    },
                );
                self.pending.push(h);
                self.tools.insert(call_id, (pid, name, input, start));
            }
            ExecEvent::ToolResult {
                name,
                call_id,
                output,
                raw_output,
                start,
                duration_ms,
                failed,
                metadata,
            } => {
                self.trace.tool_calls.push(ToolTrace {
                    name: name.clone(),
                    call_id: call_id.clone(),
                    duration_ms,
                    failed,
                });
                if let Some(tokens) = metadata
                    .as_ref()
                    .and_then(|m| m.get("tokens_used"))
                    .and_then(Value::as_u64)
                {
                    self.trace.sub_agent_tokens += tokens;
                }

                if let Some((pid, tool, input, call_start)) = self.tools.remove(&call_id) {
                    let time = ToolTime {
                        start: call_start,
                        end: Some(start + chrono::Duration::milliseconds(duration_ms as i64)),
                    };
                    let state = if failed {
                        ToolState::Error {
                            input,
                            error: output,
                            time,
                        }
                    } else {
                        ToolState::Completed {
                            input,
                            output,
                            time,
                            metadata: metadata.map(|m| {
                                serde_json::json!({ "meta": m, "raw": raw_output })
                            }),
                        }
                    };
                    let h = self.journal.update_part(
                        &self.sid,
                        &self.mid,
                        &pid,
                        PartBody::Tool {
                            call_id,
                            tool,
                            state,
                        },
                    );
                    self.pending.push(h);
                }
            }
            ExecEvent::Finish {
                reason,
                usage,
                start: _,
                duration_ms: _,
                note,
            } => {
                self.flush_streaming_parts(true);
                if let Some(usage) = usage {
                    self.trace.usage = usage;
                }
                self.trace.finish_reason = Some(reason.clone());
                self.trace.finish_note = note;

                let tokens = usage.map(to_token_usage);
                let (_, h) = self.journal.add_part(
                    &self.sid,
                    &self.mid,
                    PartBody::StepFinish {
                        reason: Some(reason),
                        tokens,
                    },
                );
                self.pending.push(h);
                let h = self.journal.update_message(
                    &self.sid,
                    &self.mid,
                    MessagePatch {
                        time_completed: Some(Utc::now()),
                        assistant: Some(AssistantPatch {
                            tokens,
                            ..Default::default()
                        }),
                        user: None,
                    },
                );
                self.pending.push(h);
            }
            ExecEvent::Error { error } => {
                self.flush_streaming_parts(true);
                let code = error.code().to_string();
                let message = error.to_string();
                let h = self.journal.update_message(
                    &self.sid,
                    &self.mid,
                    MessagePatch {
                        time_completed: Some(Utc::now()),
                        assistant: Some(AssistantPatch {
                            error: Some(AssistantError {
                                code: code.clone(),
                                message: message.clone(),
                            }),
                            ..Default::default()
                        }),
                        user: None,
                    },
                );
                self.pending.push(h);
                self.trace.error = Some((code, message));
            }
        }
    }

    // ── Streamed text/reasoning parts ─────────────────────────────────────────

    fn append_streamed(&mut self, kind: StreamKind, delta: &str) {
        let slot = match kind {
            StreamKind::Text => &mut self.text,
            StreamKind::Reasoning => &mut self.reasoning,
        };
        match slot {
            Some(part) => {
                part.buffer.push_str(delta);
                part.dirty = true;
            }
            None => {
                let start = Utc::now();
                let body = match kind {
                    StreamKind::Text => PartBody::Text {
                        text: delta.to_string(),
                        time: PartTime { start, end: None },
                        synthetic: None,
                    },
                    StreamKind::Reasoning => PartBody::Reasoning {
                        text: delta.to_string(),
                        time: PartTime { start, end: None },
                        metadata: None,
                    },
                };
                let (pid, h) = self.journal.add_part(&self.sid, &self.mid, body);
                self.pending.push(h);
                *slot = Some(StreamedPart {
                    pid,
                    buffer: delta.to_string(),
                    start,
                    dirty: false,
                });
            }
        }
    }

    fn maybe_flush(&mut self) {
        if self.last_flush.elapsed() >= TEXT_FLUSH_INTERVAL {
            self.flush_streaming_parts(false);
        }
    }

    /// Write out buffered text/reasoning parts.  `finalise` stamps the end
    /// time and closes the parts (the next delta opens fresh ones).
    fn flush_streaming_parts(&mut self, finalise: bool) {
        let end = finalise.then(Utc::now);
        for kind in [StreamKind::Text, StreamKind::Reasoning] {
            let slot = match kind {
                StreamKind::Text => &mut self.text,
                StreamKind::Reasoning => &mut self.reasoning,
            };
            let Some(part) = slot else { continue };
            if part.dirty || finalise {
                let body = match kind {
                    StreamKind::Text => PartBody::Text {
                        text: part.buffer.clone(),
                        time: PartTime {
                            start: part.start,
                            end,
                        },
                        synthetic: None,
                    },
                    StreamKind::Reasoning => PartBody::Reasoning {
                        text: part.buffer.clone(),
                        time: PartTime {
                            start: part.start,
                            end,
                        },
                        metadata: None,
                    },
                };
                let h = self
                    .journal
                    .update_part(&self.sid, &self.mid, &part.pid, body);
                self.pending.push(h);
                part.dirty = false;
            }
            if finalise {
                *slot = None;
            }
        }
        self.last_flush = Instant::now();
    }
}

#[derive(Clone, Copy)]
enum StreamKind {
    Text,
    Reasoning,
}

fn to_token_usage(usage: Usage) -> TokenUsage {
    TokenUsage {
        input: usage.input_tokens as u64,
        output: usage.output_tokens as u64,
        reasoning: usage.reasoning_tokens as u64,
        cache: runa_journal::CacheUsage {
            read: usage.cache_read_tokens as u64,
            write: usage.cache_write_tokens as u64,
        },
    }
}
