// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Static model catalog: context windows for known model families.
//!
//! Matching is by `provider:model` prefix so dated snapshot ids
//! (`gpt-4o-2024-11-20`) inherit the family's limits.  Unknown models get
//! a conservative default rather than an error: the context manager
//! would rather compact early than overflow.

/// Context window (total tokens) used when a model is not in the table.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 128_000;

/// `(id prefix, context window)`; the longest matching prefix wins.
const CONTEXT_WINDOWS: &[(&str, u32)] = &[
    ("anthropic:claude-opus-4", 200_000),
    ("anthropic:claude-sonnet-4", 200_000),
    ("anthropic:claude-haiku-4", 200_000),
    ("anthropic:claude-3", 200_000),
    ("openai:gpt-4.1", 1_000_000),
    ("openai:gpt-4o", 128_000),
    ("openai:o3", 200_000),
    ("openai:o4-mini", 200_000),
    ("openrouter:", 128_000),
];

/// Look up the context window for a `provider:model` id.
pub fn context_window(id: &str) -> Option<u32> {
    CONTEXT_WINDOWS
        .iter()
        .filter(|(prefix, _)| id.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, window)| *window)
}

/// Like [`context_window`] but with the conservative default applied.
pub fn context_window_or_default(id: &str) -> u32 {
    context_window(id).unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_family_matches_by_prefix() {
        assert_eq!(
            context_window("anthropic:claude-sonnet-4-5-20250929"),
            Some(200_000)
        );
    }

    #[test]
    fn longest_prefix_wins() {
        // gpt-4.1 must not fall into the gpt-4o bucket or vice versa.
        assert_eq!(context_window("openai:gpt-4.1-mini"), Some(1_000_000));
        assert_eq!(context_window("openai:gpt-4o-2024-11-20"), Some(128_000));
    }

    #[test]
    fn unknown_model_returns_none() {
        assert_eq!(context_window("local:gguf-7b"), None);
    }

    #[test]
    fn default_applies_for_unknown() {
        assert_eq!(
            context_window_or_default("local:gguf-7b"),
            DEFAULT_CONTEXT_WINDOW
        );
    }
}
