// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use regex::Regex;

use runa_config::ToolsSelection;

/// Allow-list policy for the shell tool.
///
/// Deny wins over allow.  An empty allow list means "everything not
/// denied runs"; a non-empty allow list means "only matching commands
/// run".  Sandboxing beyond this check belongs outside the runtime.
#[derive(Debug)]
pub struct ShellPolicy {
    allow_patterns: Vec<Regex>,
    deny_patterns: Vec<Regex>,
}

impl ShellPolicy {
    pub fn from_selection(selection: &ToolsSelection) -> Self {
        let compile = |patterns: &[String]| -> Vec<Regex> {
            patterns.iter().filter_map(|p| glob_to_regex(p)).collect()
        };
        Self {
            allow_patterns: compile(&selection.allow),
            deny_patterns: compile(&selection.deny),
        }
    }

    /// Whether `command` may run under this policy.
    pub fn allows(&self, command: &str) -> bool {
        let command = command.trim();
        if self.deny_patterns.iter().any(|re| re.is_match(command)) {
            return false;
        }
        if self.allow_patterns.is_empty() {
            return true;
        }
        self.allow_patterns.iter().any(|re| re.is_match(command))
    }
}

impl Default for ShellPolicy {
    fn default() -> Self {
        Self::from_selection(&ToolsSelection::default())
    }
}

/// Convert a simple shell glob pattern to a [`Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allow: &[&str], deny: &[&str]) -> ShellPolicy {
        ShellPolicy::from_selection(&ToolsSelection {
            allow: allow.iter().map(|s| s.to_string()).collect(),
            deny: deny.iter().map(|s| s.to_string()).collect(),
        })
    }

    // ── Deny takes priority ───────────────────────────────────────────────────

    #[test]
    fn deny_beats_allow_for_same_pattern() {
        let p = policy(&["rm *"], &["rm *"]);
        assert!(!p.allows("rm /tmp/foo"));
    }

    #[test]
    fn deny_exact_match() {
        let p = policy(&[], &["rm -rf /*"]);
        assert!(!p.allows("rm -rf /*"));
        assert!(p.allows("git status"));
    }

    // ── Allow list ────────────────────────────────────────────────────────────

    #[test]
    fn empty_allow_permits_everything_not_denied() {
        let p = policy(&[], &[]);
        assert!(p.allows("anything at all"));
    }

    #[test]
    fn non_empty_allow_restricts() {
        let p = policy(&["git *", "ls"], &[]);
        assert!(p.allows("git log --oneline"));
        assert!(p.allows("ls"));
        assert!(!p.allows("cargo build"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        let p = policy(&["ls ?"], &[]);
        assert!(p.allows("ls -"));
        assert!(!p.allows("ls --"));
    }

    #[test]
    fn leading_whitespace_is_trimmed() {
        let p = policy(&["ls"], &[]);
        assert!(p.allows("  ls "));
    }
}
