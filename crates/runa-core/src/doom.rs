// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;

use serde_json::Value;
use tracing::warn;

use crate::error::CoreError;

/// What to do when a doom loop is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoomLoopAction {
    /// Fail the run.
    #[default]
    Error,
    /// Log and let the call proceed.
    Warn,
}

/// Detects an agent stuck repeating the same tool call.
///
/// Keeps a ring of recent `(tool, canonical_json(input))` fingerprints.
/// When a new call's fingerprint equals the last `threshold` recorded
/// ones, the call is the `threshold + 1`-th identical invocation in a row
/// and the detector trips before the tool runs.
#[derive(Debug)]
pub struct DoomLoopDetector {
    ring: VecDeque<String>,
    threshold: usize,
    action: DoomLoopAction,
}

impl DoomLoopDetector {
    pub fn new(threshold: usize, action: DoomLoopAction) -> Self {
        Self {
            ring: VecDeque::with_capacity(threshold),
            threshold: threshold.max(1),
            action,
        }
    }

    /// Record a call about to be dispatched.  Returns an error when the
    /// detector trips with `action = Error`.
    pub fn record(&mut self, tool: &str, input: &Value) -> Result<(), CoreError> {
        let fingerprint = format!("{tool}\u{1f}{}", canonical_json(input));

        let tripped = self.ring.len() >= self.threshold
            && self
                .ring
                .iter()
                .rev()
                .take(self.threshold)
                .all(|f| *f == fingerprint);

        if self.ring.len() >= self.threshold {
            self.ring.pop_front();
        }
        self.ring.push_back(fingerprint);

        if tripped {
            let msg = format!(
                "tool `{tool}` called {} times in a row with identical input",
                self.threshold + 1
            );
            match self.action {
                DoomLoopAction::Error => return Err(CoreError::DoomLoop(msg)),
                DoomLoopAction::Warn => warn!("{msg}; continuing"),
            }
        }
        Ok(())
    }
}

/// Canonical JSON: recursively sorted object keys, no insignificant
/// whitespace.  Required so fingerprints are byte-comparable across
/// argument shapes that only differ in key order.
pub fn canonical_json(value: &Value) -> String {
    fn canonicalize(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(key).expect("string serialises"));
                    out.push(':');
                    canonicalize(&map[*key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    canonicalize(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }
    let mut out = String::new();
    canonicalize(value, &mut out);
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
