// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Cron-driven in-memory dispatcher for agent runs.
//!
//! The scheduler owns a table of normalised schedules and fires the
//! supplied execute callback when a schedule's `next_run` passes.  Time
//! arithmetic runs in the system zone; each schedule records the timezone
//! string it was declared with for surfacing, and `next_run` always comes
//! from the cron iterator, so a failing or slow callback never drifts the
//! cadence.

mod parse;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use parse::{normalize_expression, to_cron_schedule, ScheduleParseError};

/// One registered schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    #[serde(rename = "agentPath")]
    pub agent_path: PathBuf,
    /// Normalised 5- or 6-field cron expression.
    pub expression: String,
    pub timezone: String,
    pub enabled: bool,
    #[serde(rename = "nextRun", skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Local>>,
    #[serde(rename = "lastRun", skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Local>>,
    #[serde(rename = "lastResult", skip_serializing_if = "Option::is_none")]
    pub last_result: Option<ScheduleResult>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Local>,
    pub source: String,
}

/// Outcome of the most recent fire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleResult {
    pub success: bool,
    /// Wall-clock duration of the run in milliseconds.
    pub duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// What the execute callback reports back on success.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub session_id: Option<String>,
}

type ExecuteFn =
    Arc<dyn Fn(PathBuf) -> BoxFuture<'static, anyhow::Result<ExecutionOutcome>> + Send + Sync>;

struct Inner {
    schedules: Mutex<HashMap<String, Schedule>>,
    /// Parsed cron iterators, keyed like `schedules`.
    jobs: Mutex<HashMap<String, cron::Schedule>>,
    execute: ExecuteFn,
    running: AtomicBool,
}

pub struct Scheduler {
    inner: Arc<Inner>,
    ticker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler around an execute callback.  The callback is
    /// invoked with the agent document path on every fire.
    pub fn new<F>(execute: F) -> Self
    where
        F: Fn(PathBuf) -> BoxFuture<'static, anyhow::Result<ExecutionOutcome>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                schedules: Mutex::new(HashMap::new()),
                jobs: Mutex::new(HashMap::new()),
                execute: Arc::new(execute),
                running: AtomicBool::new(false),
            }),
            ticker: std::sync::Mutex::new(None),
        }
    }

    /// Register a schedule.  Invalid expressions fail at registration
    /// time, not at first tick.
    pub async fn add(
        &self,
        agent_path: impl Into<PathBuf>,
        raw_expression: &str,
        timezone: Option<String>,
    ) -> Result<String, ScheduleParseError> {
        let expression = normalize_expression(raw_expression)?;
        let job = to_cron_schedule(&expression)
            .map_err(|_| ScheduleParseError::Invalid(raw_expression.to_string()))?;
        let now = Local::now();
        let id = format!("sched-{}", runa_schedule_id());
        let schedule = Schedule {
            id: id.clone(),
            agent_path: agent_path.into(),
            expression,
            timezone: timezone.unwrap_or_else(|| iana_system_zone()),
            enabled: true,
            next_run: job.after(&now).next(),
            last_run: None,
            last_result: None,
            created_at: now,
            source: "yaml".to_string(),
        };
        debug!(%id, expr = %schedule.expression, "schedule registered");
        self.inner.jobs.lock().await.insert(id.clone(), job);
        self.inner.schedules.lock().await.insert(id.clone(), schedule);
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<Schedule> {
        self.inner.schedules.lock().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Schedule> {
        let mut all: Vec<Schedule> = self.inner.schedules.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) {
        if let Some(s) = self.inner.schedules.lock().await.get_mut(id) {
            s.enabled = enabled;
        }
    }

    /// Fire every schedule whose `next_run` is at or before `now`.
    ///
    /// Fires run as parallel isolated tasks; this call returns once all of
    /// them have completed and their `last_result` rows are written.
    /// Exposed so tests (and the serve loop) can drive a virtual clock.
    pub async fn run_pending(&self, now: DateTime<Local>) {
        self.inner.run_pending(now).await;
    }

    /// Start the background tick loop (idempotent).
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_millis(500));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            while inner.running.load(Ordering::SeqCst) {
                tick.tick().await;
                inner.run_pending(Local::now()).await;
            }
        });
        *self.ticker.lock().expect("ticker slot poisoned") = Some(handle);
    }

    /// Stop the tick loop and drop every job.
    pub async fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.ticker.lock().expect("ticker slot poisoned").take() {
            handle.abort();
        }
        self.inner.jobs.lock().await.clear();
        self.inner.schedules.lock().await.clear();
    }
}

impl Inner {
    async fn run_pending(self: &Arc<Self>, now: DateTime<Local>) {
        let due: Vec<(String, PathBuf)> = {
            let jobs = self.jobs.lock().await;
            let mut schedules = self.schedules.lock().await;
            let mut due = Vec::new();
            for (id, s) in schedules.iter_mut() {
                if !s.enabled {
                    continue;
                }
                let Some(next) = s.next_run else { continue };
                if next <= now {
                    s.last_run = Some(now);
                    // Advance from `now` so a long callback cannot queue a
                    // burst of make-up fires.
                    s.next_run = jobs.get(id).and_then(|j| j.after(&now).next());
                    due.push((id.clone(), s.agent_path.clone()));
                }
            }
            due
        };

        let mut handles = Vec::with_capacity(due.len());
        for (id, path) in due {
            let inner = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let started = std::time::Instant::now();
                let result = (inner.execute)(path).await;
                let duration = started.elapsed().as_millis() as u64;
                let last_result = match result {
                    Ok(outcome) => ScheduleResult {
                        success: true,
                        duration,
                        error: None,
                        session_id: outcome.session_id,
                    },
                    Err(e) => {
                        warn!(%id, error = %e, "scheduled run failed");
                        ScheduleResult {
                            success: false,
                            duration,
                            error: Some(e.to_string()),
                            session_id: None,
                        }
                    }
                };
                if let Some(s) = inner.schedules.lock().await.get_mut(&id) {
                    s.last_result = Some(last_result);
                }
            }));
        }
        for h in handles {
            let _ = h.await;
        }
    }
}

fn runa_schedule_id() -> u64 {
    use std::sync::atomic::AtomicU64;
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Best-effort IANA name for the system zone (falls back to the fixed
/// offset when the name is not discoverable).
fn iana_system_zone() -> String {
    std::env::var("TZ").unwrap_or_else(|_| Local::now().offset().to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
