// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The run entry point: prepare → execute → process → finalize.
//!
//! This is the one function every front-end (CLI, serve loop, scheduler
//! callback, sub-agent tool) goes through.  Prepare-time failures return
//! `Err` (no session exists yet); once a session is created the function
//! always returns `Ok` with the outcome captured in [`RunAgentResult`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use runa_config::Agent;
use runa_journal::{
    AssistantSide, Journal, MessageSeed, PathInfo, Prompt, TokenUsage, UserSide,
};
use runa_model::ProviderRegistry;

use crate::context::ContextManager;
use crate::doom::{DoomLoopAction, DoomLoopDetector};
use crate::engine::{EngineConfig, ExecutionEngine};
use crate::error::CoreError;
use crate::prepare::{prepare_agent_execution, ProjectContext, RunOptions};
use crate::processor::StreamProcessor;

/// Consecutive identical tool calls tolerated before the doom-loop
/// detector trips.
const DOOM_LOOP_THRESHOLD: usize = 3;

/// Event channel depth between engine and processor; backpressure beyond
/// this is fine (the provider stream is pulled only when there is room).
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct RunError {
    pub code: String,
    pub message: String,
}

/// Everything a caller needs to render a summary and pick an exit code.
#[derive(Debug)]
pub struct RunAgentResult {
    pub success: bool,
    pub duration_ms: u64,
    /// Provider-reported tokens for this session (input + output).
    pub tokens_used: u64,
    /// Tokens rolled up from sub-agent runs (volunteered metadata only).
    pub sub_agent_tokens: u64,
    pub tool_call_count: usize,
    pub final_text: String,
    pub session_id: String,
    pub error: Option<RunError>,
    /// The run was aborted (or timed out).
    pub aborted: bool,
    /// The run hit the step limit.
    pub step_limited: bool,
}

pub async fn run_agent(
    agent: Agent,
    project: ProjectContext,
    providers: Arc<ProviderRegistry>,
    journal: Arc<Journal>,
    opts: RunOptions,
) -> Result<RunAgentResult, CoreError> {
    let prepared =
        prepare_agent_execution(agent, &project, providers, Arc::clone(&journal), opts).await?;
    let run_timer = std::time::Instant::now();
    let session_id = prepared.session_id.clone();

    info!(
        agent = %prepared.agent.name,
        session = %session_id,
        model = prepared.model.id(),
        "starting agent run"
    );

    // One message row per top-level invocation; tool iterations stay
    // within it as parts.
    let model_id = prepared.model.id().to_string();
    let (provider_id, bare_model) = model_id
        .split_once(':')
        .map(|(p, m)| (p.to_string(), m.to_string()))
        .unwrap_or_else(|| ("unknown".to_string(), model_id.clone()));
    let (message_id, _) = journal.create_message(
        &session_id,
        MessageSeed {
            user: Some(UserSide {
                prompt: Prompt {
                    task: prepared.prompt.clone(),
                    user: None,
                },
            }),
            assistant: Some(AssistantSide {
                system: prepared.system_messages.clone(),
                model_id: bare_model,
                provider_id,
                mode: "agent".to_string(),
                path: PathInfo {
                    cwd: project.cwd.display().to_string(),
                    root: project.root.display().to_string(),
                },
                cost: 0.0,
                tokens: TokenUsage::default(),
                error: None,
                summary: None,
            }),
        },
    );

    // ── Wire engine → processor ───────────────────────────────────────────────
    let context_limit = prepared
        .model
        .context_window()
        .unwrap_or(runa_model::catalog::DEFAULT_CONTEXT_WINDOW) as usize;
    let context = ContextManager::new(
        context_limit,
        prepared.settings.compaction_threshold,
        prepared.settings.compaction_keep_recent,
        prepared.settings.context_compaction,
    );
    let doom = DoomLoopDetector::new(DOOM_LOOP_THRESHOLD, DoomLoopAction::Error);
    let engine = ExecutionEngine::new(
        Arc::clone(&prepared.model),
        Arc::clone(&prepared.tools),
        context,
        doom,
        EngineConfig {
            max_steps: prepared.max_steps,
            tool_timeout: std::time::Duration::from_secs(prepared.settings.mcp_tool_timeout),
        },
        prepared.cancel.clone(),
        prepared.system_messages.clone(),
    );

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let engine_task = tokio::spawn(engine.run(prepared.prompt.clone(), tx));

    // Run-level timeout: cancel the whole tree and remember why.
    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog = prepared.timeout.map(|limit| {
        let cancel = prepared.cancel.clone();
        let timed_out = Arc::clone(&timed_out);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    timed_out.store(true, Ordering::SeqCst);
                    cancel.cancel();
                }
            }
        })
    });

    let trace = StreamProcessor::new(Arc::clone(&journal), &session_id, &message_id)
        .process(rx)
        .await;
    let _ = engine_task.await;
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }

    // ── Finalize ──────────────────────────────────────────────────────────────
    let mut error = trace
        .error
        .clone()
        .map(|(code, message)| RunError { code, message });
    if timed_out.load(Ordering::SeqCst) {
        let limit = prepared.timeout.map(|t| t.as_secs()).unwrap_or(0);
        error = Some(RunError {
            code: "TIMEOUT".to_string(),
            message: format!("run exceeded its {limit}s timeout"),
        });
    }

    match &error {
        Some(e) => {
            journal
                .set_session_error(&session_id, &e.code, &e.message)
                .wait()
                .await;
        }
        None => {
            journal.set_session_completed(&session_id).wait().await;
        }
    }
    prepared.cleanup().await;

    let aborted = timed_out.load(Ordering::SeqCst)
        || error
            .as_ref()
            .is_some_and(|e| e.code == "USER_INTERRUPT" || e.code == "TIMEOUT");
    let result = RunAgentResult {
        success: error.is_none(),
        duration_ms: run_timer.elapsed().as_millis() as u64,
        tokens_used: trace.usage.total(),
        sub_agent_tokens: trace.sub_agent_tokens,
        tool_call_count: trace.tool_calls.len(),
        final_text: trace.final_text,
        session_id,
        error,
        aborted,
        step_limited: trace.finish_note.is_some(),
    };
    debug!(
        success = result.success,
        duration_ms = result.duration_ms,
        tokens = result.tokens_used,
        tool_calls = result.tool_call_count,
        "run finished"
    );
    Ok(result)
}
