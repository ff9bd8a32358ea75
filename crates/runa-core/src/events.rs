// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde_json::Value;

use runa_model::Usage;

use crate::error::CoreError;

/// Events emitted by the execution engine, drained in order by the
/// stream processor.
///
/// Ordering guarantees: everything emitted before a `ToolCall` precedes
/// that call's `ToolResult`; events within one LLM segment are
/// chronological; calls and results pair by `call_id`.
#[derive(Debug)]
pub enum ExecEvent {
    /// A new LLM segment is opening.
    LlmStart {
        model: String,
        start: DateTime<Utc>,
    },
    /// First token of the run arrived (emitted once).
    FirstToken { at: DateTime<Utc> },
    /// A streamed text chunk.
    Text { text: String },
    /// A streamed reasoning chunk (models with extended thinking).
    Reasoning { text: String },
    /// The model requested a tool invocation.
    ToolCall {
        name: String,
        call_id: String,
        input: Value,
        start: DateTime<Utc>,
        is_sub_agent: bool,
    },
    /// Terminal result for a tool call.  Failed calls arrive here too,
    /// carrying the structured failure envelope as `output` — there is no
    /// separate tool-error event.
    ToolResult {
        name: String,
        call_id: String,
        /// Canonical string form shown to the model.
        output: String,
        /// The tool's raw result shape, persisted alongside.
        raw_output: Value,
        start: DateTime<Utc>,
        duration_ms: u64,
        failed: bool,
        metadata: Option<Value>,
    },
    /// The run finished normally.
    Finish {
        reason: String,
        usage: Option<Usage>,
        start: DateTime<Utc>,
        duration_ms: u64,
        /// Annotation such as the step-limit note.
        note: Option<String>,
    },
    /// The run ended with a fatal error (including abort).
    Error { error: CoreError },
}
