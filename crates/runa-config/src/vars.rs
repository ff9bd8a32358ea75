// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

/// Paths substituted into agent instructions and tool configuration at
/// prepare time.
#[derive(Debug, Clone)]
pub struct VariableScope {
    /// Project root (`${root}`).
    pub root: PathBuf,
    /// Directory containing the agent document (`${agentDir}`).
    pub agent_dir: PathBuf,
    /// Per-run scratch directory (`${tmpDir}`).
    pub tmp_dir: PathBuf,
}

/// Substitute `${root}`, `${agentDir}` and `${tmpDir}` in `input`.
///
/// `${env:NAME}` placeholders are deliberately left untouched here — tools
/// that want environment expansion do it themselves at execution time, so
/// secrets never land in persisted prompts.
pub fn resolve_variables(input: &str, scope: &VariableScope) -> String {
    input
        .replace("${root}", &scope.root.to_string_lossy())
        .replace("${agentDir}", &scope.agent_dir.to_string_lossy())
        .replace("${tmpDir}", &scope.tmp_dir.to_string_lossy())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> VariableScope {
        VariableScope {
            root: PathBuf::from("/proj"),
            agent_dir: PathBuf::from("/proj/agents"),
            tmp_dir: PathBuf::from("/tmp/runa-1"),
        }
    }

    #[test]
    fn substitutes_all_three_variables() {
        let out = resolve_variables("r=${root} a=${agentDir} t=${tmpDir}", &scope());
        assert_eq!(out, "r=/proj a=/proj/agents t=/tmp/runa-1");
    }

    #[test]
    fn env_placeholders_pass_through() {
        let out = resolve_variables("key=${env:API_KEY} in ${root}", &scope());
        assert_eq!(out, "key=${env:API_KEY} in /proj");
    }

    #[test]
    fn repeated_occurrences_all_resolve() {
        let out = resolve_variables("${root}/${root}", &scope());
        assert_eq!(out, "/proj//proj");
    }

    #[test]
    fn text_without_variables_is_unchanged() {
        let s = "no placeholders here";
        assert_eq!(resolve_variables(s, &scope()), s);
    }
}
