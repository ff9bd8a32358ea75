// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Base data directory for all runa state.
///
/// `XDG_DATA_HOME` takes precedence on every platform (the runtime is
/// frequently driven from CI where the platform-native dir is wrong),
/// falling back to the platform data dir, then to `.runa` in the home
/// directory.
pub fn storage_root() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.trim().is_empty() {
            return PathBuf::from(xdg).join("runa");
        }
    }
    if let Some(data) = dirs::data_dir() {
        return data.join("runa");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".runa")
}

/// Per-project directory under the storage root, keyed by a hash of the
/// project root path so unrelated checkouts never collide.
pub fn project_dir(storage: &Path, project_root: &Path) -> PathBuf {
    storage.join("project").join(project_key(project_root))
}

fn project_key(project_root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_root.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Directory name for a session: `<sessionID>-<agentIdSanitised>`.
pub fn session_dir_name(session_id: &str, agent_id: &str) -> String {
    format!(
        "{session_id}-{}",
        runa_config::sanitize_agent_id(agent_id)
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_key_is_stable_and_short() {
        let a = project_key(Path::new("/work/proj"));
        let b = project_key(Path::new("/work/proj"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn different_roots_get_different_keys() {
        assert_ne!(
            project_key(Path::new("/work/a")),
            project_key(Path::new("/work/b"))
        );
    }

    #[test]
    fn session_dir_name_sanitises_agent_id() {
        assert_eq!(
            session_dir_name("01ABC", "Agents/Daily Check"),
            "01ABC-agents-daily-check"
        );
    }

    #[test]
    fn xdg_data_home_wins() {
        std::env::set_var("XDG_DATA_HOME", "/custom/data");
        let root = storage_root();
        std::env::remove_var("XDG_DATA_HOME");
        assert_eq!(root, PathBuf::from("/custom/data/runa"));
    }
}
