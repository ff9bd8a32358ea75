// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Cross-process store lock.
//!
//! A JSON lock file (`{pid, agent, timestamp}`) next to the store data.
//! Not an advisory POSIX lock: behaviour must be identical on every
//! filesystem the project supports, including network mounts where flock
//! semantics differ.  Liveness is decided by the recorded PID, not by
//! age: a crashed holder is reclaimed immediately, a slow but live
//! holder is never stolen.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "store is locked by pid {pid} (agent `{agent}`, held for {held_secs}s); \
         retry after it releases"
    )]
    Held {
        pid: u32,
        agent: String,
        held_secs: i64,
    },
    #[error("lock io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct LockPayload {
    pid: u32,
    agent: String,
    timestamp: DateTime<Utc>,
}

/// An acquired lock.  Dropping it without [`StoreLock::release`] leaves
/// the file behind; the next claimant reclaims it once this PID exits.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// Try to acquire the lock at `path` on behalf of `agent`.
    pub fn acquire(path: &Path, agent: &str) -> Result<StoreLock, LockError> {
        if let Some(existing) = read_payload(path) {
            if existing.pid != std::process::id() && pid_alive(existing.pid) {
                let held_secs = (Utc::now() - existing.timestamp).num_seconds();
                return Err(LockError::Held {
                    pid: existing.pid,
                    agent: existing.agent,
                    held_secs,
                });
            }
            if existing.pid != std::process::id() {
                warn!(
                    pid = existing.pid,
                    agent = %existing.agent,
                    "stealing store lock from dead process"
                );
            }
        } else if path.exists() {
            // Corrupt payload: remove and re-claim.
            debug!(path = %path.display(), "removing corrupt store lock file");
            let _ = std::fs::remove_file(path);
        }

        let payload = LockPayload {
            pid: std::process::id(),
            agent: agent.to_string(),
            timestamp: Utc::now(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
        let bytes = serde_json::to_vec_pretty(&payload).expect("lock payload serialises");
        std::fs::write(path, bytes).map_err(|source| LockError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(StoreLock {
            path: path.to_path_buf(),
        })
    }

    /// Release the lock by removing the file.
    pub fn release(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

fn read_payload(path: &Path) -> Option<LockPayload> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // kill(pid, 0): probe without signalling.  ESRCH means gone; EPERM
    // means alive but not ours — still alive.
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // Without a portable liveness probe, assume the holder is alive; the
    // operator can delete the lock file manually after a crash.
    true
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_creates_payload_with_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        let lock = StoreLock::acquire(&path, "agent-a").unwrap();
        let payload = read_payload(&path).unwrap();
        assert_eq!(payload.pid, std::process::id());
        assert_eq!(payload.agent, "agent-a");
        lock.release();
        assert!(!path.exists());
    }

    #[test]
    fn live_foreign_holder_is_refused_with_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        // PID 1 is always alive and never ours.
        let payload = LockPayload {
            pid: 1,
            agent: "other".into(),
            timestamp: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_vec(&payload).unwrap()).unwrap();

        let err = StoreLock::acquire(&path, "me").unwrap_err();
        match err {
            LockError::Held { pid, agent, .. } => {
                assert_eq!(pid, 1);
                assert_eq!(agent, "other");
            }
            other => panic!("expected Held, got {other}"),
        }
    }

    #[test]
    fn dead_holder_is_stolen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        // A PID from the far end of the range is almost certainly dead;
        // skip silently in the unlikely case it is alive.
        let dead_pid = 4_000_000;
        if pid_alive(dead_pid) {
            return;
        }
        let payload = LockPayload {
            pid: dead_pid,
            agent: "crashed".into(),
            timestamp: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_vec(&payload).unwrap()).unwrap();

        let lock = StoreLock::acquire(&path, "me").unwrap();
        let payload = read_payload(&path).unwrap();
        assert_eq!(payload.pid, std::process::id());
        lock.release();
    }

    #[test]
    fn corrupt_lock_file_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        std::fs::write(&path, b"not json at all").unwrap();
        let lock = StoreLock::acquire(&path, "me").unwrap();
        assert_eq!(read_payload(&path).unwrap().pid, std::process::id());
        lock.release();
    }

    #[test]
    fn reentrant_acquire_by_same_pid_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        let first = StoreLock::acquire(&path, "me").unwrap();
        // Same process re-acquiring (e.g. after a leaked lock) is allowed.
        let second = StoreLock::acquire(&path, "me").unwrap();
        second.release();
        drop(first);
    }
}
