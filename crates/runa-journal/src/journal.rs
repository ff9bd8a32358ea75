// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The session journal: a durable, ordered, resumable record of runs.
//!
//! Layout, keyed by project root:
//!
//! ```text
//! <storage>/project/<hash(root)>/session/
//!   <sessionID>-<agentIdSanitised>/
//!     session.json
//!     <messageID>/
//!       message.json
//!       part/<partID>.json
//!     subagent/<childSessionID>-<childAgentIdSanitised>/…
//! ```
//!
//! Every mutation goes through the per-file write queue; journal I/O
//! errors are logged at debug and never reach the engine.  Callers that
//! care about durability (the stream processor does, at end of run)
//! collect the returned [`WriteHandle`]s and await them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::debug;

use crate::id::new_id;
use crate::paths::{project_dir, session_dir_name, storage_root};
use crate::record::*;
use crate::writer::{atomic_write, WriteQueue};

/// Completion handle for one enqueued journal write.
pub struct WriteHandle(oneshot::Receiver<()>);

impl WriteHandle {
    /// Wait until the write has been attempted (success or failure).
    pub async fn wait(self) {
        let _ = self.0.await;
    }

    /// A handle that is already resolved (used when an update is dropped).
    fn resolved() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        Self(rx)
    }
}

/// Seed for a new session row.
#[derive(Debug, Clone)]
pub struct SessionSeed {
    pub parent_session_id: Option<String>,
    pub agent: SessionAgent,
    pub model: String,
    pub config: SessionConfigSnapshot,
    pub project: ProjectInfo,
}

pub struct Journal {
    project_dir: PathBuf,
    queue: WriteQueue,
    /// sid → session directory; populated by `create_session`.
    session_dirs: Mutex<HashMap<String, PathBuf>>,
}

impl Journal {
    /// Open the journal for `project_root` under the default storage root.
    pub fn open(project_root: &Path) -> Arc<Self> {
        Self::open_at(&storage_root(), project_root)
    }

    /// Open with an explicit storage root (tests, embedded use).
    pub fn open_at(storage: &Path, project_root: &Path) -> Arc<Self> {
        Arc::new(Self {
            project_dir: project_dir(storage, project_root),
            queue: WriteQueue::new(),
            session_dirs: Mutex::new(HashMap::new()),
        })
    }

    // ── Creation ──────────────────────────────────────────────────────────────

    /// Create a session row and return its id.
    ///
    /// Sub-agent sessions (seed carries `parent_session_id`) nest their
    /// directory under the parent's `subagent/` subtree.
    pub fn create_session(&self, seed: SessionSeed) -> (String, WriteHandle) {
        let sid = new_id();
        let dir_name = session_dir_name(&sid, &seed.agent.id);
        let dir = match &seed.parent_session_id {
            Some(parent) => match self.session_dir(parent) {
                Some(parent_dir) => parent_dir.join("subagent").join(dir_name),
                None => {
                    debug!(%parent, "parent session unknown; nesting at top level");
                    self.project_dir.join("session").join(dir_name)
                }
            },
            None => self.project_dir.join("session").join(dir_name),
        };
        self.session_dirs
            .lock()
            .expect("session dir map poisoned")
            .insert(sid.clone(), dir.clone());

        let now = Utc::now();
        let record = SessionRecord {
            id: sid.clone(),
            parent_session_id: seed.parent_session_id,
            agent: seed.agent,
            model: seed.model,
            version: env!("CARGO_PKG_VERSION").to_string(),
            config: seed.config,
            project: seed.project,
            status: SessionStatus::Running,
            error: None,
            time: SessionTime {
                created: now,
                updated: now,
            },
        };
        let handle = self.write_json(dir.join("session.json"), &record);
        (sid, handle)
    }

    /// Create a message row under `sid` and return its id.
    pub fn create_message(&self, sid: &str, seed: MessageSeed) -> (String, WriteHandle) {
        let mid = new_id();
        let Some(dir) = self.session_dir(sid) else {
            return (mid, self.drop_update(sid, "create_message"));
        };
        let record = MessageRecord {
            id: mid.clone(),
            session_id: sid.to_string(),
            time: MessageTime {
                created: Utc::now(),
                completed: None,
            },
            user: seed.user,
            assistant: seed.assistant,
        };
        let handle = self.write_json(dir.join(&mid).join("message.json"), &record);
        (mid, handle)
    }

    /// Append a part to a message and return its id.
    pub fn add_part(&self, sid: &str, mid: &str, body: PartBody) -> (String, WriteHandle) {
        let pid = new_id();
        let Some(dir) = self.session_dir(sid) else {
            return (pid, self.drop_update(sid, "add_part"));
        };
        let record = PartRecord {
            id: pid.clone(),
            session_id: sid.to_string(),
            message_id: mid.to_string(),
            body,
        };
        let handle = self.write_json(dir.join(mid).join("part").join(format!("{pid}.json")), &record);
        (pid, handle)
    }

    // ── Updates ───────────────────────────────────────────────────────────────

    /// Replace a part's body.
    ///
    /// Tool parts enforce the monotonic state machine: an update that would
    /// move a tool state backwards, or rewrite a terminal state, is dropped
    /// with a debug log.  Text parts may grow freely; the final
    /// end-of-stream write is authoritative.
    pub fn update_part(&self, sid: &str, mid: &str, pid: &str, body: PartBody) -> WriteHandle {
        let Some(dir) = self.session_dir(sid) else {
            return self.drop_update(sid, "update_part");
        };
        let path = dir.join(mid).join("part").join(format!("{pid}.json"));
        let sid = sid.to_string();
        let mid = mid.to_string();
        let pid = pid.to_string();
        self.read_modify_write::<PartRecord, _>(path, move |existing| {
            let Some(mut record) = existing else {
                debug!(%pid, "update_part on unknown part; dropping");
                return None;
            };
            if let (PartBody::Tool { state: old, .. }, PartBody::Tool { state: new, .. }) =
                (&record.body, &body)
            {
                if old.is_terminal() || new.rank() < old.rank() {
                    debug!(%pid, "ignoring non-monotonic tool state update");
                    return None;
                }
            }
            record.body = body;
            record.session_id = sid;
            record.message_id = mid;
            Some(record)
        })
    }

    /// Deep-partial message update.
    ///
    /// Only the three known sections merge (`time`, `assistant`, `user`);
    /// `assistant.tokens` is shallow-merged as one unit with
    /// non-decreasing token counters.
    pub fn update_message(&self, sid: &str, mid: &str, patch: MessagePatch) -> WriteHandle {
        let Some(dir) = self.session_dir(sid) else {
            return self.drop_update(sid, "update_message");
        };
        let path = dir.join(mid).join("message.json");
        let mid = mid.to_string();
        self.read_modify_write::<MessageRecord, _>(path, move |existing| {
            let Some(mut record) = existing else {
                debug!(%mid, "update_message on unknown message; dropping");
                return None;
            };
            merge_message(&mut record, patch);
            Some(record)
        })
    }

    /// Partial session update; `time.updated` is always refreshed.
    /// Terminal status transitions are write-once.
    pub fn update_session(&self, sid: &str, patch: SessionPatch) -> WriteHandle {
        let Some(dir) = self.session_dir(sid) else {
            return self.drop_update(sid, "update_session");
        };
        let path = dir.join("session.json");
        let sid = sid.to_string();
        self.read_modify_write::<SessionRecord, _>(path, move |existing| {
            let Some(mut record) = existing else {
                debug!(%sid, "update_session on unknown session; dropping");
                return None;
            };
            if record.status.is_terminal() && patch.status.is_some() {
                debug!(%sid, "ignoring status update on terminal session");
                return None;
            }
            if let Some(status) = patch.status {
                record.status = status;
            }
            if let Some(error) = patch.error {
                record.error = Some(error);
            }
            // Invariant: a running session never carries an error.
            if record.status == SessionStatus::Running {
                record.error = None;
            }
            record.time.updated = Utc::now();
            Some(record)
        })
    }

    pub fn set_session_completed(&self, sid: &str) -> WriteHandle {
        self.update_session(
            sid,
            SessionPatch {
                status: Some(SessionStatus::Completed),
                error: None,
            },
        )
    }

    pub fn set_session_error(&self, sid: &str, code: &str, message: &str) -> WriteHandle {
        self.update_session(
            sid,
            SessionPatch {
                status: Some(SessionStatus::Error),
                error: Some(SessionError {
                    code: code.to_string(),
                    message: message.to_string(),
                    time: Utc::now(),
                }),
            },
        )
    }

    // ── Reads (not serialised against the queue) ──────────────────────────────

    pub fn get_session(&self, sid: &str) -> anyhow::Result<SessionRecord> {
        self.read_json(self.require_dir(sid)?.join("session.json"))
    }

    pub fn get_message(&self, sid: &str, mid: &str) -> anyhow::Result<MessageRecord> {
        self.read_json(self.require_dir(sid)?.join(mid).join("message.json"))
    }

    pub fn get_part(&self, sid: &str, mid: &str, pid: &str) -> anyhow::Result<PartRecord> {
        self.read_json(
            self.require_dir(sid)?
                .join(mid)
                .join("part")
                .join(format!("{pid}.json")),
        )
    }

    /// All parts of a message, sorted by id (== chronological write order).
    pub fn list_parts(&self, sid: &str, mid: &str) -> anyhow::Result<Vec<PartRecord>> {
        let dir = self.require_dir(sid)?.join(mid).join("part");
        let mut parts = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => return Ok(parts),
        };
        for entry in entries.flatten() {
            if let Ok(p) = self.read_json::<PartRecord>(entry.path()) {
                parts.push(p);
            }
        }
        parts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(parts)
    }

    /// The on-disk directory of a session, when known to this process.
    pub fn session_dir(&self, sid: &str) -> Option<PathBuf> {
        self.session_dirs
            .lock()
            .expect("session dir map poisoned")
            .get(sid)
            .cloned()
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn require_dir(&self, sid: &str) -> anyhow::Result<PathBuf> {
        self.session_dir(sid)
            .with_context(|| format!("unknown session {sid}"))
    }

    fn drop_update(&self, sid: &str, op: &str) -> WriteHandle {
        debug!(sid, op, "journal update for unknown session dropped");
        WriteHandle::resolved()
    }

    fn write_json<T: Serialize>(&self, path: PathBuf, value: &T) -> WriteHandle {
        let bytes = match serde_json::to_vec_pretty(value) {
            Ok(b) => b,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "journal serialise failed");
                return WriteHandle::resolved();
            }
        };
        let key = path.to_string_lossy().to_string();
        WriteHandle(self.queue.enqueue(&key, async move {
            if let Err(e) = atomic_write(&path, &bytes).await {
                debug!(path = %path.display(), error = %e, "journal write failed");
            }
        }))
    }

    /// Read-modify-write inside the file's queue slot.  `apply` returning
    /// `None` drops the update (logged by the caller's closure).
    fn read_modify_write<T, F>(&self, path: PathBuf, apply: F) -> WriteHandle
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(Option<T>) -> Option<T> + Send + 'static,
    {
        let key = path.to_string_lossy().to_string();
        WriteHandle(self.queue.enqueue(&key, async move {
            let existing = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<T>(&bytes).ok(),
                Err(_) => None,
            };
            if let Some(updated) = apply(existing) {
                match serde_json::to_vec_pretty(&updated) {
                    Ok(bytes) => {
                        if let Err(e) = atomic_write(&path, &bytes).await {
                            debug!(path = %path.display(), error = %e, "journal write failed");
                        }
                    }
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "journal serialise failed")
                    }
                }
            }
        }))
    }

    fn read_json<T: DeserializeOwned>(&self, path: PathBuf) -> anyhow::Result<T> {
        let bytes =
            std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("decode {}", path.display()))
    }
}

/// Typed deep-merge for the message record.  Only `time`, `assistant` and
/// `user` merge; anything else in a would-be patch is rejected by
/// construction ([`MessagePatch`] cannot express it).
fn merge_message(record: &mut MessageRecord, patch: MessagePatch) {
    if let Some(completed) = patch.time_completed {
        record.time.completed = Some(completed);
    }
    if let Some(user) = patch.user {
        record.user = Some(user);
    }
    if let Some(ap) = patch.assistant {
        if let Some(assistant) = record.assistant.as_mut() {
            if let Some(tokens) = ap.tokens {
                // Shallow-merge of the tokens subtree: counters never move
                // backwards even if a stale patch arrives late.
                let t = &mut assistant.tokens;
                t.input = t.input.max(tokens.input);
                t.output = t.output.max(tokens.output);
                t.reasoning = t.reasoning.max(tokens.reasoning);
                t.cache.read = t.cache.read.max(tokens.cache.read);
                t.cache.write = t.cache.write.max(tokens.cache.write);
            }
            if let Some(cost) = ap.cost {
                assistant.cost = cost;
            }
            if let Some(error) = ap.error {
                assistant.error = Some(error);
            }
            if let Some(summary) = ap.summary {
                assistant.summary = Some(summary);
            }
        } else {
            debug!("assistant patch on message without assistant side; dropped");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn test_agent() -> SessionAgent {
        SessionAgent {
            id: "agents/probe".into(),
            name: "probe".into(),
            file_path: None,
            description: None,
            is_sub_agent: false,
        }
    }

    fn seed() -> SessionSeed {
        SessionSeed {
            parent_session_id: None,
            agent: test_agent(),
            model: "mock:m".into(),
            config: SessionConfigSnapshot::default(),
            project: ProjectInfo {
                root: "/p".into(),
                cwd: "/p".into(),
            },
        }
    }

    fn assistant_side() -> AssistantSide {
        AssistantSide {
            system: vec!["sys".into()],
            model_id: "m".into(),
            provider_id: "mock".into(),
            mode: "agent".into(),
            path: PathInfo {
                cwd: "/p".into(),
                root: "/p".into(),
            },
            cost: 0.0,
            tokens: TokenUsage::default(),
            error: None,
            summary: None,
        }
    }

    // ── Session lifecycle ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_session_writes_running_row() {
        let tmp = tempfile::tempdir().unwrap();
        let j = Journal::open_at(tmp.path(), Path::new("/p"));
        let (sid, h) = j.create_session(seed());
        h.wait().await;
        let s = j.get_session(&sid).unwrap();
        assert_eq!(s.status, SessionStatus::Running);
        assert!(s.error.is_none());
    }

    #[tokio::test]
    async fn session_dir_embeds_sanitised_agent_id() {
        let tmp = tempfile::tempdir().unwrap();
        let j = Journal::open_at(tmp.path(), Path::new("/p"));
        let (sid, h) = j.create_session(seed());
        h.wait().await;
        let dir = j.session_dir(&sid).unwrap();
        assert!(dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("-agents-probe"));
    }

    #[tokio::test]
    async fn set_error_is_terminal_and_write_once() {
        let tmp = tempfile::tempdir().unwrap();
        let j = Journal::open_at(tmp.path(), Path::new("/p"));
        let (sid, h) = j.create_session(seed());
        h.wait().await;
        j.set_session_error(&sid, "TIMEOUT", "run timed out").wait().await;
        // A later completion attempt must not overwrite the terminal state.
        j.set_session_completed(&sid).wait().await;
        let s = j.get_session(&sid).unwrap();
        assert_eq!(s.status, SessionStatus::Error);
        assert_eq!(s.error.as_ref().unwrap().code, "TIMEOUT");
    }

    #[tokio::test]
    async fn subagent_session_nests_under_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let j = Journal::open_at(tmp.path(), Path::new("/p"));
        let (parent, h) = j.create_session(seed());
        h.wait().await;
        let mut child_seed = seed();
        child_seed.parent_session_id = Some(parent.clone());
        child_seed.agent.is_sub_agent = true;
        let (child, h) = j.create_session(child_seed);
        h.wait().await;
        let child_dir = j.session_dir(&child).unwrap();
        assert!(child_dir.starts_with(j.session_dir(&parent).unwrap().join("subagent")));
        assert!(child_dir.join("session.json").exists());
    }

    // ── Messages and parts ────────────────────────────────────────────────────

    #[tokio::test]
    async fn parts_sort_in_write_order() {
        let tmp = tempfile::tempdir().unwrap();
        let j = Journal::open_at(tmp.path(), Path::new("/p"));
        let (sid, h) = j.create_session(seed());
        h.wait().await;
        let (mid, h) = j.create_message(&sid, MessageSeed { user: None, assistant: None });
        h.wait().await;
        let mut pids = Vec::new();
        for i in 0..5 {
            let (pid, h) = j.add_part(
                &sid,
                &mid,
                PartBody::Text {
                    text: format!("t{i}"),
                    time: PartTime { start: Utc::now(), end: None },
                    synthetic: None,
                },
            );
            h.wait().await;
            pids.push(pid);
        }
        let listed: Vec<String> = j.list_parts(&sid, &mid).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(listed, pids);
    }

    #[tokio::test]
    async fn tool_state_cannot_regress() {
        let tmp = tempfile::tempdir().unwrap();
        let j = Journal::open_at(tmp.path(), Path::new("/p"));
        let (sid, h) = j.create_session(seed());
        h.wait().await;
        let (mid, h) = j.create_message(&sid, MessageSeed { user: None, assistant: None });
        h.wait().await;
        let t = ToolTime { start: Utc::now(), end: None };
        let (pid, h) = j.add_part(
            &sid,
            &mid,
            PartBody::Tool {
                call_id: "c1".into(),
                tool: "echo".into(),
                state: ToolState::Running { input: json!({"x": 1}), time: t },
            },
        );
        h.wait().await;
        j.update_part(
            &sid,
            &mid,
            &pid,
            PartBody::Tool {
                call_id: "c1".into(),
                tool: "echo".into(),
                state: ToolState::Completed {
                    input: json!({"x": 1}),
                    output: "done".into(),
                    time: ToolTime { start: t.start, end: Some(Utc::now()) },
                    metadata: None,
                },
            },
        )
        .wait()
        .await;
        // Attempt to regress to running — must be ignored.
        j.update_part(
            &sid,
            &mid,
            &pid,
            PartBody::Tool {
                call_id: "c1".into(),
                tool: "echo".into(),
                state: ToolState::Running { input: json!({"x": 1}), time: t },
            },
        )
        .wait()
        .await;
        let part = j.get_part(&sid, &mid, &pid).unwrap();
        match part.body {
            PartBody::Tool { state, .. } => assert!(state.is_terminal()),
            _ => panic!("wrong part body"),
        }
    }

    #[tokio::test]
    async fn message_tokens_merge_monotonically() {
        let tmp = tempfile::tempdir().unwrap();
        let j = Journal::open_at(tmp.path(), Path::new("/p"));
        let (sid, h) = j.create_session(seed());
        h.wait().await;
        let (mid, h) = j.create_message(
            &sid,
            MessageSeed { user: None, assistant: Some(assistant_side()) },
        );
        h.wait().await;
        let mut tokens = TokenUsage { input: 100, output: 20, ..Default::default() };
        j.update_message(
            &sid,
            &mid,
            MessagePatch { assistant: Some(AssistantPatch { tokens: Some(tokens), ..Default::default() }), ..Default::default() },
        )
        .wait()
        .await;
        // A stale, smaller patch must not lower the counters.
        tokens.input = 50;
        j.update_message(
            &sid,
            &mid,
            MessagePatch { assistant: Some(AssistantPatch { tokens: Some(tokens), ..Default::default() }), ..Default::default() },
        )
        .wait()
        .await;
        let m = j.get_message(&sid, &mid).unwrap();
        assert_eq!(m.assistant.unwrap().tokens.input, 100);
    }

    #[tokio::test]
    async fn update_for_unknown_session_resolves_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let j = Journal::open_at(tmp.path(), Path::new("/p"));
        // Must not hang or error.
        j.update_session("01GHOST", SessionPatch::default()).wait().await;
    }
}
