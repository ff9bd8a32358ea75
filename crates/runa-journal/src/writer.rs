// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Atomic file writes and per-key serialised write queues.
//!
//! Every mutating journal operation is enqueued onto a FIFO owned by a
//! worker task, keyed by the logical file it touches.  Only one mutation
//! per key is in flight at a time; a failed job never stalls its
//! successors.  Reads bypass the queues entirely — they may observe the
//! pre- or post-state of a pending write, but thanks to the atomic
//! temp-and-rename protocol they never observe torn bytes.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Write `bytes` to `path` atomically: serialise to a temp sibling, then
/// rename over the destination.  A crash between the two steps leaves the
/// previous committed content intact.
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp-{}", std::process::id()));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Map of path-key → worker with a FIFO inbox.
///
/// Workers are created lazily on first enqueue and live until the queue is
/// dropped (closing the inbox lets each worker drain and exit).
pub struct WriteQueue {
    workers: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue `job` behind all previously enqueued work for `key`.
    ///
    /// Returns a receiver that resolves once the job has run (successfully
    /// or not).  Dropping the receiver is fine — the job still runs.
    pub fn enqueue<F>(&self, key: &str, job: F) -> oneshot::Receiver<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let wrapped: Job = Box::pin(async move {
            job.await;
            let _ = done_tx.send(());
        });

        let mut workers = self.workers.lock().expect("write queue poisoned");
        let sender = workers.entry(key.to_string()).or_insert_with(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
            tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    // Jobs swallow their own errors; a panic would kill the
                    // worker, so journal jobs must not panic.
                    job.await;
                }
            });
            tx
        });
        if sender.send(wrapped).is_err() {
            debug!(key, "write queue worker gone; dropping journal update");
        }
        done_rx
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    // ── Atomic writes ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn atomic_write_creates_parents_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/file.json");
        atomic_write(&path, b"{\"x\":1}").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"x\":1}");
    }

    #[tokio::test]
    async fn atomic_write_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.json");
        atomic_write(&path, b"old").await.unwrap();
        atomic_write(&path, b"new").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.json");
        atomic_write(&path, b"data").await.unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["f.json"]);
    }

    // ── Write queue ordering ──────────────────────────────────────────────────

    #[tokio::test]
    async fn jobs_on_one_key_run_in_fifo_order() {
        let q = WriteQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..10 {
            let log = Arc::clone(&log);
            handles.push(q.enqueue("k", async move {
                // Stagger so that out-of-order execution would be caught.
                tokio::time::sleep(std::time::Duration::from_millis((10 - i) as u64)).await;
                log.lock().unwrap().push(i);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn different_keys_run_concurrently() {
        let q = WriteQueue::new();
        let (tx, rx) = oneshot::channel::<()>();
        // Job on key "a" blocks until key "b"'s job releases it — only
        // possible if the two workers run in parallel.
        let h_a = q.enqueue("a", async move {
            let _ = rx.await;
        });
        let h_b = q.enqueue("b", async move {
            let _ = tx.send(());
        });
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            h_a.await.unwrap();
            h_b.await.unwrap();
        })
        .await
        .expect("cross-key jobs must not serialise against each other");
    }

    #[tokio::test]
    async fn queue_survives_a_failing_job() {
        let q = WriteQueue::new();
        let count = Arc::new(AtomicUsize::new(0));
        // First job "fails" (logs internally, returns normally).
        let _ = q.enqueue("k", async {});
        let c = Arc::clone(&count);
        q.enqueue("k", async move {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_cancel_job() {
        let q = WriteQueue::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        drop(q.enqueue("k", async move {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        // Await a sentinel job behind it to know the first one ran.
        q.enqueue("k", async {}).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
