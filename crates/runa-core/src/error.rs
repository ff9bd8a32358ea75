// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The runtime error taxonomy and tool-failure classification.
//!
//! Propagation policy:
//! - failures the model can observe and recover from (tool failures, rate
//!   limits, transient network/server errors, per-tool timeouts) become
//!   structured JSON tool results — see [`failure_envelope`];
//! - journal I/O failures are swallowed at debug level inside runa-journal;
//! - everything else is fatal to the run and lands in `session.error`.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("missing API credentials: {0}")]
    AuthenticationMissing(String),
    #[error("unknown model: {0}")]
    ModelUnknown(String),
    #[error("context window exceeded: {0}")]
    ContextOverflow(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("tool failed: {0}")]
    ToolResultFailure(String),
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("provider server error: {0}")]
    ServerError(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("interrupted")]
    UserInterrupt,
    #[error("doom loop detected: {0}")]
    DoomLoop(String),
    #[error("sub-agent cycle detected: {0}")]
    CycleDetected(String),
    #[error("sub-agent depth limit reached ({0})")]
    DepthExceeded(usize),
    #[error("store locked: {0}")]
    StoreLocked(String),
    #[error("store corrupt: {0}")]
    StoreCorrupt(String),
    #[error("invalid schedule: {0}")]
    ScheduleParse(String),
    #[error("session io error: {0}")]
    SessionIo(String),
}

impl CoreError {
    /// Stable machine-readable code persisted in `session.error.code`.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::AuthenticationMissing(_) => "AUTHENTICATION_MISSING",
            CoreError::ModelUnknown(_) => "MODEL_UNKNOWN",
            CoreError::ContextOverflow(_) => "CONTEXT_OVERFLOW",
            CoreError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            CoreError::ToolResultFailure(_) => "TOOL_RESULT_FAILURE",
            CoreError::RateLimit(_) => "RATE_LIMIT",
            CoreError::ServerError(_) => "SERVER_ERROR",
            CoreError::NetworkError(_) => "NETWORK_ERROR",
            CoreError::Timeout(_) => "TIMEOUT",
            CoreError::UserInterrupt => "USER_INTERRUPT",
            CoreError::DoomLoop(_) => "DOOM_LOOP",
            CoreError::CycleDetected(_) => "CYCLE_DETECTED",
            CoreError::DepthExceeded(_) => "DEPTH_EXCEEDED",
            CoreError::StoreLocked(_) => "STORE_LOCKED",
            CoreError::StoreCorrupt(_) => "STORE_CORRUPT",
            CoreError::ScheduleParse(_) => "SCHEDULE_PARSE_ERROR",
            CoreError::SessionIo(_) => "SESSION_IO_ERROR",
        }
    }
}

/// Classification of a failed tool result, derived from message matching.
#[derive(Debug, Clone)]
pub struct ToolFailure {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
    pub suggestions: Vec<&'static str>,
}

/// Classify a tool failure message (HTTP code phrases, well-known
/// keywords) so the model learns whether a retry is worthwhile.
pub fn classify_tool_failure(message: &str) -> ToolFailure {
    let lower = message.to_lowercase();
    let (kind, retryable, suggestions): (&'static str, bool, Vec<&'static str>) =
        if lower.contains("timeout") || lower.contains("timed out") {
            (
                "TIMEOUT",
                true,
                vec![
                    "retry the call",
                    "increase the tool timeout or narrow the request",
                ],
            )
        } else if lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("429")
        {
            ("RATE_LIMIT", true, vec!["wait briefly, then retry"])
        } else if lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("api key")
            || lower.contains("401")
            || lower.contains("403")
        {
            (
                "AUTHENTICATION_MISSING",
                false,
                vec!["check the credentials configured for this tool"],
            )
        } else if lower.contains("bad gateway")
            || lower.contains("unavailable")
            || lower.contains("internal server error")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("500")
        {
            ("SERVER_ERROR", true, vec!["retry the call"])
        } else if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("unreachable")
        {
            ("NETWORK_ERROR", true, vec!["retry the call"])
        } else if lower.contains("not found") || lower.contains("404") {
            (
                "TOOL_RESULT_FAILURE",
                false,
                vec!["check the name or path passed to the tool"],
            )
        } else {
            (
                "TOOL_RESULT_FAILURE",
                false,
                vec!["adjust the arguments and try a different approach"],
            )
        };
    ToolFailure {
        kind,
        message: message.to_string(),
        retryable,
        suggestions,
    }
}

/// The structured JSON envelope handed to the model for a failed tool.
pub fn failure_envelope(failure: &ToolFailure) -> Value {
    json!({
        "success": false,
        "error": {
            "type": failure.kind,
            "message": failure.message,
            "retryable": failure.retryable,
            "suggestions": failure.suggestions,
        }
    })
}

/// Phrases providers use for context-window overflow.  Matching any of
/// them converts a provider error into `CONTEXT_OVERFLOW` with a
/// compaction suggestion.
pub fn is_context_overflow(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "context length",
        "context window",
        "maximum context",
        "too many tokens",
        "prompt is too long",
        "input is too long",
        "exceed_context_size",
        "exceeds the maximum",
    ]
    .iter()
    .any(|phrase| lower.contains(phrase))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_screaming_snake() {
        assert_eq!(CoreError::UserInterrupt.code(), "USER_INTERRUPT");
        assert_eq!(CoreError::DoomLoop("x".into()).code(), "DOOM_LOOP");
        assert_eq!(
            CoreError::CycleDetected("a → b → a".into()).code(),
            "CYCLE_DETECTED"
        );
    }

    #[test]
    fn timeout_classifies_retryable() {
        let f = classify_tool_failure("request timed out after 60s");
        assert_eq!(f.kind, "TIMEOUT");
        assert!(f.retryable);
    }

    #[test]
    fn rate_limit_by_phrase_and_code() {
        assert_eq!(classify_tool_failure("429 Too Many Requests").kind, "RATE_LIMIT");
        assert_eq!(classify_tool_failure("rate limit exceeded").kind, "RATE_LIMIT");
    }

    #[test]
    fn auth_failures_are_not_retryable() {
        let f = classify_tool_failure("401 Unauthorized");
        assert_eq!(f.kind, "AUTHENTICATION_MISSING");
        assert!(!f.retryable);
    }

    #[test]
    fn unknown_failures_default_to_tool_result_failure() {
        let f = classify_tool_failure("the widget refused to frobnicate");
        assert_eq!(f.kind, "TOOL_RESULT_FAILURE");
        assert!(!f.retryable);
        assert!(!f.suggestions.is_empty());
    }

    #[test]
    fn envelope_has_the_documented_shape() {
        let v = failure_envelope(&classify_tool_failure("timed out"));
        assert_eq!(v["success"], false);
        assert_eq!(v["error"]["type"], "TIMEOUT");
        assert_eq!(v["error"]["retryable"], true);
        assert!(v["error"]["suggestions"].is_array());
    }

    #[test]
    fn overflow_phrases_match() {
        assert!(is_context_overflow("This model's maximum context length is 8192 tokens"));
        assert!(is_context_overflow("prompt is too long: 210000 tokens"));
        assert!(is_context_overflow("error: exceed_context_size_error n_ctx=54272"));
        assert!(!is_context_overflow("file not found"));
    }
}
