// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Run preparation: everything that must exist before the first model
//! call.  Resolves variables, builds the system prompt, assembles the
//! tool surface, opens (and locks) the store, creates the session row,
//! and wires sub-agent declarations into callable tools.
//!
//! Order matters: sub-agent cycle detection runs *before* the session row
//! is created, so a cyclic chain leaves no directory behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use runa_config::{derive_agent_id, Agent, EnvSettings, VariableScope};
use runa_journal::{Journal, ProjectInfo, SessionAgent, SessionConfigSnapshot};
use runa_model::{ModelProvider, ProviderRegistry};
use runa_store::{Store, StoreError};
use runa_tools::{
    register_builtin_tools, register_mcp_server, register_store_tools, BuiltinContext, McpServer,
    ShellPolicy, ToolRegistry,
};

use crate::error::CoreError;
use crate::prompts::build_system_prompt;
use crate::subagent::{SubAgentContext, SubAgentTool};

/// Where the run happens.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub root: PathBuf,
    pub cwd: PathBuf,
}

/// Caller-supplied knobs for one run.
#[derive(Default)]
pub struct RunOptions {
    /// User task; defaults to a generic "follow your instructions".
    pub prompt: Option<String>,
    /// Model reference overriding the agent document's `model`.
    pub model_override: Option<String>,
    /// External abort signal; a fresh token is created when absent.
    pub abort: Option<CancellationToken>,
    /// Sub-agent nesting depth of this run (0 for top level).
    pub depth: usize,
    /// Resolved agent paths along the current call chain, parent-first.
    pub call_chain: Vec<PathBuf>,
    pub parent_session_id: Option<String>,
    /// Connected MCP servers (the transport is the front-end's concern).
    pub mcp_servers: Vec<Arc<dyn McpServer>>,
}

/// The assembled inputs for one agent run.
pub struct PreparedExecution {
    pub agent: Agent,
    pub agent_id: String,
    pub session_id: String,
    pub model: Arc<dyn ModelProvider>,
    pub tools: Arc<ToolRegistry>,
    pub system_messages: Vec<String>,
    pub journal: Arc<Journal>,
    pub store: Option<Arc<Mutex<Store>>>,
    pub settings: EnvSettings,
    pub cancel: CancellationToken,
    pub max_steps: u32,
    pub timeout: Option<Duration>,
    pub prompt: String,
}

impl PreparedExecution {
    /// Release resources held for the run (currently the store lock).
    /// Always called by `run_agent`, success or failure.
    pub async fn cleanup(&self) {
        if let Some(store) = &self.store {
            store.lock().await.release_lock();
        }
    }
}

pub async fn prepare_agent_execution(
    agent: Agent,
    project: &ProjectContext,
    providers: Arc<ProviderRegistry>,
    journal: Arc<Journal>,
    opts: RunOptions,
) -> Result<PreparedExecution, CoreError> {
    let settings = EnvSettings::from_env();
    let agent_id = derive_agent_id(&agent, &project.root);

    // ── Model ─────────────────────────────────────────────────────────────────
    let model_ref = opts
        .model_override
        .clone()
        .or_else(|| agent.config.model.clone())
        .ok_or_else(|| CoreError::ModelUnknown(format!("agent `{}` declares no model", agent.name)))?;
    let model = providers.create(&model_ref).map_err(|e| {
        if e.to_string().contains("missing API key") {
            CoreError::AuthenticationMissing(e.to_string())
        } else {
            CoreError::ModelUnknown(e.to_string())
        }
    })?;
    if runa_model::catalog::context_window(model.id()).is_none() {
        // Not fatal: an uncatalogued model runs with the default window.
        warn!(model = model.id(), "model not in catalog; assuming default context window");
    }

    // ── Variables & prompt ────────────────────────────────────────────────────
    let agent_dir = agent
        .file_path
        .as_ref()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| project.root.clone());
    let tmp_dir = std::env::temp_dir().join(format!("runa-{}", std::process::id()));
    let _ = std::fs::create_dir_all(&tmp_dir);
    let scope = VariableScope {
        root: project.root.clone(),
        agent_dir: agent_dir.clone(),
        tmp_dir,
    };
    let mut system_messages = vec![build_system_prompt(&agent, &scope)];
    // Accumulated learnings ride along as a second system message so the
    // instructions themselves stay byte-stable for prompt caching.
    if let Some(learning) = &agent.config.learning {
        if learning.apply {
            let path = agent_dir.join(learning.file.as_deref().unwrap_or("LEARNINGS.md"));
            match std::fs::read_to_string(&path) {
                Ok(notes) if !notes.trim().is_empty() => {
                    system_messages.push(format!("Learnings from previous runs:\n\n{notes}"));
                }
                Ok(_) => {}
                Err(e) => debug!(path = %path.display(), error = %e, "no learning file"),
            }
        }
    }

    // ── Sub-agent resolution: cycle check before any session exists ───────────
    let self_path = agent
        .file_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(&agent.name));
    let mut chain = opts.call_chain.clone();
    chain.push(self_path);

    let mut resolved_subagents = Vec::new();
    for decl in &agent.config.subagents {
        let joined = agent_dir.join(&decl.path);
        let resolved = joined.canonicalize().unwrap_or(joined);
        if chain.contains(&resolved) {
            let mut names: Vec<String> = chain.iter().map(|p| chain_label(p)).collect();
            names.push(chain_label(&resolved));
            return Err(CoreError::CycleDetected(names.join(" → ")));
        }
        resolved_subagents.push((decl.clone(), resolved));
    }

    // ── Pre-flight: store lock and MCP listing ────────────────────────────────
    // Everything that can fail must fail before the session row exists, so
    // an aborted preparation leaves no orphan journal state.
    let store = match &agent.config.store {
        Some(decl) if decl.is_enabled() => {
            let name = decl.store_name(&agent_id);
            let store =
                Store::open(&project.root, &name, &agent.name).map_err(|e| match e {
                    StoreError::Locked(inner) => CoreError::StoreLocked(inner.to_string()),
                    StoreError::Corrupt { .. } => CoreError::StoreCorrupt(e.to_string()),
                    other => CoreError::StoreCorrupt(other.to_string()),
                })?;
            Some(Arc::new(Mutex::new(store)))
        }
        _ => None,
    };

    let cancel = opts.abort.clone().unwrap_or_default();
    let mut registry = ToolRegistry::new();
    register_builtin_tools(
        &mut registry,
        &BuiltinContext {
            root: project.root.clone(),
            agent_dir,
            shell_policy: Arc::new(ShellPolicy::from_selection(&agent.config.tools)),
            shell_timeout_secs: 30,
        },
    );
    if let Some(store) = &store {
        register_store_tools(&mut registry, Arc::clone(store));
    }
    for server in &opts.mcp_servers {
        register_mcp_server(&mut registry, Arc::clone(server))
            .await
            .map_err(|e| CoreError::ToolNotFound(format!("mcp listing failed: {e}")))?;
    }

    // ── Session row ───────────────────────────────────────────────────────────
    let (session_id, _) = journal.create_session(runa_journal::SessionSeed {
        parent_session_id: opts.parent_session_id.clone(),
        agent: SessionAgent {
            id: agent_id.clone(),
            name: agent.name.clone(),
            file_path: agent.file_path.as_ref().map(|p| p.display().to_string()),
            description: agent.description.clone(),
            is_sub_agent: opts.depth > 0,
        },
        model: model.id().to_string(),
        config: SessionConfigSnapshot {
            timeout: agent.config.timeout,
            max_steps: agent.config.max_steps,
            mcp_servers: (!agent.config.mcp_servers.is_empty())
                .then(|| agent.config.mcp_servers.keys().cloned().collect()),
            subagents: (!agent.config.subagents.is_empty())
                .then(|| agent.config.subagents.iter().map(|s| s.tool_name()).collect()),
        },
        project: ProjectInfo {
            root: project.root.display().to_string(),
            cwd: project.cwd.display().to_string(),
        },
    });

    if opts.depth >= settings.max_subagent_depth {
        if !resolved_subagents.is_empty() {
            debug!(
                depth = opts.depth,
                max = settings.max_subagent_depth,
                "at the depth limit; sub-agent tools not created"
            );
        }
    } else {
        let ctx = SubAgentContext {
            journal: Arc::clone(&journal),
            providers: Arc::clone(&providers),
            project: project.clone(),
            model_override: opts.model_override.clone(),
            parent_session_id: session_id.clone(),
            depth: opts.depth,
            call_chain: chain.clone(),
            cancel: cancel.clone(),
        };
        for (decl, resolved) in resolved_subagents {
            registry.register(SubAgentTool::new(decl, resolved, ctx.clone()));
        }
    }

    let max_steps = agent.config.max_steps.unwrap_or(settings.max_steps);
    let timeout = agent.config.timeout.map(Duration::from_secs);
    let prompt = opts
        .prompt
        .clone()
        .unwrap_or_else(|| "Follow your instructions.".to_string());

    Ok(PreparedExecution {
        agent,
        agent_id,
        session_id,
        model,
        tools: Arc::new(registry),
        system_messages,
        journal,
        store,
        settings,
        cancel,
        max_steps,
        timeout,
        prompt,
    })
}

/// Human label for a chain entry: the file stem without `.agentuse`.
fn chain_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().trim_end_matches(".agentuse").to_string())
        .unwrap_or_else(|| path.display().to_string())
}
