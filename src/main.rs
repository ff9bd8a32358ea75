// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, ScheduleCommands};
use runa_config::parse_agent_file;
use runa_core::{run_agent, ProjectContext, RunAgentResult, RunOptions};
use runa_journal::Journal;
use runa_model::{ModelProvider, ProviderRegistry};
use runa_scheduler::{normalize_expression, ExecutionOutcome, Scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            file,
            prompt,
            model,
            timeout,
        } => {
            let code = cmd_run(&file, prompt, model, timeout).await?;
            std::process::exit(code);
        }
        Commands::Validate { file } => {
            let code = cmd_validate(&file);
            std::process::exit(code);
        }
        Commands::Schedule { command } => match command {
            ScheduleCommands::List { dir } => cmd_schedule_list(&dir),
            ScheduleCommands::Start { dir } => cmd_schedule_start(&dir).await?,
        },
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose || std::env::var("DEBUG").is_ok_and(|v| v != "0" && !v.is_empty()) {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// The provider seam: `mock` ships built in for offline use and tests;
/// SDK-backed factories (openai, anthropic, openrouter) register here
/// from their own crates.
fn provider_registry() -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register("mock", |model_ref| {
        Ok(Arc::new(runa_model::MockProvider::new(&model_ref.id(), vec![]))
            as Arc<dyn ModelProvider>)
    });
    Arc::new(registry)
}

/// Walk up from `cwd` looking for a `.git` directory; the project root
/// keys the session storage directory.
fn find_project_root(cwd: &Path) -> PathBuf {
    let mut dir = cwd.to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return dir;
        }
        if !dir.pop() {
            return cwd.to_path_buf();
        }
    }
}

async fn cmd_run(
    file: &Path,
    prompt: Option<String>,
    model: Option<String>,
    timeout: Option<u64>,
) -> anyhow::Result<i32> {
    let cwd = std::env::current_dir().context("cannot determine cwd")?;
    let root = find_project_root(&cwd);
    let mut agent = parse_agent_file(file)?;
    if let Some(t) = timeout {
        agent.config.timeout = Some(t);
    }

    let journal = Journal::open(&root);
    let cancel = tokio_util::sync::CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let result = run_agent(
        agent,
        ProjectContext { root, cwd },
        provider_registry(),
        journal,
        RunOptions {
            prompt,
            model_override: model,
            abort: Some(cancel),
            ..Default::default()
        },
    )
    .await;

    match result {
        Ok(run) => {
            render_summary(&run);
            Ok(exit_code(&run))
        }
        Err(e) => {
            eprintln!("error [{}]: {e}", e.code());
            Ok(1)
        }
    }
}

fn render_summary(run: &RunAgentResult) {
    if !run.final_text.is_empty() {
        println!("{}", run.final_text);
    }
    eprintln!(
        "session {} | {} | {} ms | {} tokens ({} sub-agent) | {} tool call(s)",
        run.session_id,
        if run.success { "ok" } else { "failed" },
        run.duration_ms,
        run.tokens_used,
        run.sub_agent_tokens,
        run.tool_call_count,
    );
    if let Some(error) = &run.error {
        eprintln!("error [{}]: {}", error.code, error.message);
    }
}

/// 0 = success, 2 = aborted or step-limited with nothing to show,
/// 1 = any other failure.
fn exit_code(run: &RunAgentResult) -> i32 {
    if run.success && !run.step_limited {
        0
    } else if (run.aborted || run.step_limited) && run.final_text.is_empty() {
        2
    } else if run.success {
        0
    } else {
        1
    }
}

fn cmd_validate(file: &Path) -> i32 {
    match parse_agent_file(file) {
        Ok(agent) => {
            let mut problems = Vec::new();
            if agent.config.model.is_none() {
                problems.push("no `model` declared (a run would need --model)".to_string());
            }
            if let Some(expr) = &agent.config.schedule {
                match normalize_expression(expr) {
                    Ok(normalised) => println!("schedule: {expr} → {normalised}"),
                    Err(e) => problems.push(format!("schedule: {e}")),
                }
            }
            for subagent in &agent.config.subagents {
                let dir = file.parent().unwrap_or(Path::new("."));
                if !dir.join(&subagent.path).exists() {
                    problems.push(format!("subagent path does not exist: {}", subagent.path));
                }
            }
            if problems.is_empty() {
                println!("{}: ok ({} sub-agent(s))", agent.name, agent.config.subagents.len());
                0
            } else {
                for p in &problems {
                    eprintln!("{}: {p}", agent.name);
                }
                1
            }
        }
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}

/// All .agentuse files under `dir` that declare a schedule.
fn scheduled_agents(dir: &Path) -> Vec<(PathBuf, String)> {
    let mut found = Vec::new();
    for entry in walkdir::WalkDir::new(dir).into_iter().flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("agentuse") {
            continue;
        }
        if let Ok(agent) = parse_agent_file(path) {
            if let Some(expr) = agent.config.schedule {
                found.push((path.to_path_buf(), expr));
            }
        }
    }
    found.sort();
    found
}

fn cmd_schedule_list(dir: &Path) {
    let agents = scheduled_agents(dir);
    if agents.is_empty() {
        println!("no scheduled agents under {}", dir.display());
        return;
    }
    for (path, expr) in agents {
        match normalize_expression(&expr) {
            Ok(normalised) => println!("{}  {expr}  → {normalised}", path.display()),
            Err(e) => println!("{}  {expr}  ! {e}", path.display()),
        }
    }
}

async fn cmd_schedule_start(dir: &Path) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("cannot determine cwd")?;
    let root = find_project_root(&cwd);
    let journal = Journal::open(&root);
    let providers = provider_registry();

    let project = ProjectContext { root, cwd };
    let scheduler = Scheduler::new(move |path| {
        let journal = Arc::clone(&journal);
        let providers = Arc::clone(&providers);
        let project = project.clone();
        Box::pin(async move {
            let agent = parse_agent_file(&path)?;
            let run = run_agent(agent, project, providers, journal, RunOptions::default())
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            if let Some(error) = run.error {
                anyhow::bail!("[{}] {}", error.code, error.message);
            }
            Ok(ExecutionOutcome {
                session_id: Some(run.session_id),
            })
        })
    });

    let agents = scheduled_agents(dir);
    if agents.is_empty() {
        anyhow::bail!("no scheduled agents under {}", dir.display());
    }
    for (path, expr) in agents {
        // An invalid expression is a startup error, not a tick-time one.
        let id = scheduler
            .add(path.clone(), &expr, None)
            .await
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        println!("scheduled {} ({expr}) as {id}", path.display());
    }

    scheduler.start();
    tokio::signal::ctrl_c().await.context("signal handler")?;
    scheduler.shutdown().await;
    Ok(())
}
