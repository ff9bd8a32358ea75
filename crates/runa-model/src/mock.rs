// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic scripted provider for tests.
//!
//! Each call to [`ModelProvider::complete`] pops the next scripted turn
//! and replays its events.  Requests are recorded so tests can assert on
//! what the engine actually sent (message counts, tool schemas, caps).

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;

use crate::provider::{ModelProvider, ResponseStream};
use crate::types::{CompletionRequest, FinishReason, ResponseEvent, Usage};

/// One scripted model turn: the events to replay for one `complete` call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    events: Vec<ResponseEvent>,
    usage: Option<Usage>,
}

impl ScriptedTurn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: &str) -> Self {
        self.events.push(ResponseEvent::TextDelta(text.to_string()));
        self
    }

    pub fn reasoning(mut self, text: &str) -> Self {
        self.events
            .push(ResponseEvent::ReasoningDelta(text.to_string()));
        self
    }

    pub fn tool_call(mut self, id: &str, name: &str, arguments: serde_json::Value) -> Self {
        self.events.push(ResponseEvent::ToolCall {
            index: 0,
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        });
        self
    }

    pub fn usage(mut self, input: u32, output: u32) -> Self {
        self.usage = Some(Usage {
            input_tokens: input,
            output_tokens: output,
            ..Default::default()
        });
        self
    }

    /// Materialise the event list, appending usage and the final `Done`.
    /// The finish reason is `ToolCalls` when any tool call was scripted.
    fn into_events(self) -> Vec<ResponseEvent> {
        let had_tool_calls = self
            .events
            .iter()
            .any(|e| matches!(e, ResponseEvent::ToolCall { .. }));
        let mut events = self.events;
        if let Some(usage) = self.usage {
            events.push(ResponseEvent::Usage(usage));
        }
        events.push(ResponseEvent::Done(if had_tool_calls {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        }));
        events
    }
}

/// Scripted in-memory provider.
pub struct MockProvider {
    id: String,
    script: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<CompletionRequest>>,
    context_window: Option<u32>,
    /// Error message returned instead of a stream, once, when set.
    fail_next: Mutex<Option<String>>,
}

impl MockProvider {
    pub fn new(id: &str, script: Vec<ScriptedTurn>) -> Self {
        Self {
            id: id.to_string(),
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            context_window: None,
            fail_next: Mutex::new(None),
        }
    }

    pub fn with_context_window(mut self, window: u32) -> Self {
        self.context_window = Some(window);
        self
    }

    /// Make the next `complete` call fail with `message` before streaming.
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock().unwrap() = Some(message.to_string());
    }

    /// Requests observed so far (cloned).
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of `complete` calls observed.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn context_window(&self) -> Option<u32> {
        self.context_window
            .or_else(|| crate::catalog::context_window(&self.id))
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        self.requests.lock().unwrap().push(req);

        if let Some(msg) = self.fail_next.lock().unwrap().take() {
            anyhow::bail!("{msg}");
        }

        let turn = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedTurn::new().text("(script exhausted)"));

        let events: Vec<anyhow::Result<ResponseEvent>> =
            turn.into_events().into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
