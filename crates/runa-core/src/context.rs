// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bounded-window context management with automatic compaction.
//!
//! The manager owns the run's in-memory message list and a running token
//! estimate (`ceil(chars / 4)` per message, corrected from provider usage
//! whenever a segment reports it).  Before each LLM segment the engine
//! asks [`ContextManager::should_compact`]; when the estimate crosses
//! `threshold × limit`, everything except the recent tail is summarised
//! through the same model and replaced by one synthetic system message.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use runa_model::{
    CompletionRequest, Message, MessageContent, ModelProvider, ResponseEvent, Role, Usage,
};

use crate::prompts::SUMMARIZE_SYSTEM_PROMPT;

/// Cap on summariser output tokens.
const SUMMARY_MAX_TOKENS: u32 = 2000;

/// Summariser sampling temperature; low for faithful recall.
const SUMMARY_TEMPERATURE: f32 = 0.3;

/// Summariser attempts before falling back to the deterministic summary.
const SUMMARY_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Model-written summary replaced the old messages.
    Summarised,
    /// The deterministic fallback summary was used.
    Fallback,
    /// Nothing to compact (list shorter than the tail).
    Skipped,
}

pub struct ContextManager {
    messages: Vec<Message>,
    token_count: usize,
    /// Model context limit in tokens; 0 disables compaction checks.
    limit: usize,
    threshold: f32,
    keep_recent: usize,
    enabled: bool,
    /// Reentrancy guard: `should_compact` is false while a compaction is
    /// in flight.
    compacting: bool,
}

impl ContextManager {
    pub fn new(limit: usize, threshold: f32, keep_recent: usize, enabled: bool) -> Self {
        Self {
            messages: Vec::new(),
            token_count: 0,
            limit,
            threshold,
            keep_recent,
            enabled,
            compacting: false,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.token_count += message.approx_tokens();
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Correct the estimate from actual provider usage: the provider's
    /// input count is the true size of everything we sent.
    pub fn update_from_usage(&mut self, usage: &Usage) {
        let actual =
            (usage.input_tokens + usage.cache_read_tokens + usage.output_tokens) as usize;
        if actual > 0 {
            self.token_count = actual;
        }
    }

    pub fn should_compact(&self) -> bool {
        self.enabled
            && !self.compacting
            && self.limit > 0
            && (self.token_count as f32) >= (self.limit as f32) * self.threshold
    }

    /// Summarise everything except the recent tail.
    ///
    /// The split point backs up until the kept tail starts at a user turn
    /// (never inside a tool-call/result group), so providers are never
    /// shown orphaned tool results.  On summariser failure after bounded
    /// retries, a deterministic fallback summary records only the message
    /// and tool-call counts.
    pub async fn compact(&mut self, model: &Arc<dyn ModelProvider>) -> CompactionOutcome {
        self.compacting = true;
        let outcome = self.compact_inner(model).await;
        self.compacting = false;
        self.recalculate();
        outcome
    }

    async fn compact_inner(&mut self, model: &Arc<dyn ModelProvider>) -> CompactionOutcome {
        // keep_recent = 0 still keeps the boundary-search anchor in range.
        let mut split = self
            .messages
            .len()
            .saturating_sub(self.keep_recent.max(1));
        // Back up to a turn boundary: the tail must start with a user
        // message so tool results keep their tool calls.
        while split > 0 && !matches!(
            (&self.messages[split].role, &self.messages[split].content),
            (Role::User, MessageContent::Text(_))
        ) {
            split -= 1;
        }
        if split == 0 {
            debug!("nothing to compact before the recent tail");
            return CompactionOutcome::Skipped;
        }

        let old = &self.messages[..split];
        let old_count = old.len();
        let tool_calls = old
            .iter()
            .filter(|m| matches!(m.content, MessageContent::ToolCall { .. }))
            .count();
        let history = serialize_history(old);

        let (summary_body, used_fallback) = match self.summarise(model, &history).await {
            Some(text) => (text, false),
            None => {
                warn!("summariser failed; using deterministic fallback summary");
                let fallback = format!(
                    "{old_count} earlier messages (including {tool_calls} tool calls) \
                     were dropped to stay within the context limit. Details are no \
                     longer available; re-derive anything you still need."
                );
                (fallback, true)
            }
        };

        let summary = Message::system(format!(
            "[Context Summary]\n{summary_body}\n[End Summary]"
        ));
        let tail = self.messages.split_off(split);
        self.messages.clear();
        self.messages.push(summary);
        self.messages.extend(tail);

        if used_fallback {
            CompactionOutcome::Fallback
        } else {
            CompactionOutcome::Summarised
        }
    }

    async fn summarise(&self, model: &Arc<dyn ModelProvider>, history: &str) -> Option<String> {
        let req = CompletionRequest {
            messages: vec![
                Message::system(SUMMARIZE_SYSTEM_PROMPT),
                Message::user(history.to_string()),
            ],
            tools: vec![],
            stream: true,
            max_output_tokens: Some(SUMMARY_MAX_TOKENS),
            temperature: Some(SUMMARY_TEMPERATURE),
        };
        for attempt in 1..=SUMMARY_ATTEMPTS {
            match model.complete(req.clone()).await {
                Ok(mut stream) => {
                    let mut text = String::new();
                    let mut failed = false;
                    while let Some(event) = stream.next().await {
                        match event {
                            Ok(ResponseEvent::TextDelta(delta)) => text.push_str(&delta),
                            Ok(_) => {}
                            Err(e) => {
                                debug!(attempt, error = %e, "summary stream error");
                                failed = true;
                                break;
                            }
                        }
                    }
                    if !failed && !text.trim().is_empty() {
                        return Some(text.trim().to_string());
                    }
                }
                Err(e) => debug!(attempt, error = %e, "summary call failed"),
            }
        }
        None
    }

    fn recalculate(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }
}

/// Flatten a message slice into plain text for the summariser.
fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
            };
            let text = match &m.content {
                MessageContent::Text(t) => t.clone(),
                MessageContent::ToolCall { function, .. } => {
                    format!("[called {} with {}]", function.name, function.arguments)
                }
                MessageContent::ToolResult { content, .. } => format!("[tool result] {content}"),
            };
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
