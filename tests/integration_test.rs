// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Whole-pipeline integration: agent document → run → journal + store,
//! and the scheduler driving the same entry point.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::json;

use runa_config::parse_agent_file;
use runa_core::{run_agent, ProjectContext, RunOptions};
use runa_journal::{Journal, SessionStatus};
use runa_model::{MockProvider, ModelProvider, ProviderRegistry, ScriptedTurn};
use runa_scheduler::{ExecutionOutcome, Scheduler};

fn scripted_registry(scripts: Vec<Vec<ScriptedTurn>>) -> Arc<ProviderRegistry> {
    let queue = Arc::new(Mutex::new(VecDeque::from(scripts)));
    let mut registry = ProviderRegistry::new();
    registry.register("mock", move |model_ref| {
        let script = queue.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Arc::new(
            MockProvider::new(&model_ref.id(), script).with_context_window(100_000),
        ) as Arc<dyn ModelProvider>)
    });
    Arc::new(registry)
}

fn project(dir: &Path) -> ProjectContext {
    ProjectContext {
        root: dir.to_path_buf(),
        cwd: dir.to_path_buf(),
    }
}

#[tokio::test]
async fn store_agent_persists_items_and_releases_the_lock() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("keeper.agentuse");
    std::fs::write(
        &path,
        "---\n\
         name: keeper\n\
         description: Keeps notes between runs\n\
         model: mock:gpt-test\n\
         store: true\n\
         ---\n\
         Record what you are told into the store.\n",
    )
    .unwrap();
    let agent = parse_agent_file(&path).unwrap();

    let providers = scripted_registry(vec![vec![
        ScriptedTurn::new()
            .text("saving")
            .tool_call("c1", "store_create", json!({"title": "remember me", "data": {"k": 1}})),
        ScriptedTurn::new().text("saved").usage(12, 3),
    ]]);

    let journal = Journal::open_at(&tmp.path().join("data"), tmp.path());
    let result = run_agent(
        agent,
        project(tmp.path()),
        providers,
        Arc::clone(&journal),
        RunOptions {
            prompt: Some("remember this".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.final_text, "savingsaved");
    assert_eq!(
        journal.get_session(&result.session_id).unwrap().status,
        SessionStatus::Completed
    );

    // The item landed on disk under the agent-id-keyed store...
    let store_dir = tmp.path().join(".agentuse/store/keeper");
    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(store_dir.join("items.json")).unwrap()).unwrap();
    assert_eq!(raw["version"], 1);
    assert_eq!(raw["items"][0]["title"], "remember me");

    // ...and the prepared-execution cleanup released the lock.
    assert!(!store_dir.join("lock").exists());
}

#[tokio::test]
async fn locked_store_is_a_preflight_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("keeper.agentuse");
    std::fs::write(
        &path,
        "---\nname: keeper\nmodel: mock:gpt-test\nstore: true\n---\nKeep notes.\n",
    )
    .unwrap();
    let agent = parse_agent_file(&path).unwrap();

    // A live foreign process (pid 1) holds the lock.
    let store_dir = tmp.path().join(".agentuse/store/keeper");
    std::fs::create_dir_all(&store_dir).unwrap();
    std::fs::write(
        store_dir.join("lock"),
        serde_json::to_vec(&json!({
            "pid": 1,
            "agent": "other-process",
            "timestamp": chrono::Utc::now(),
        }))
        .unwrap(),
    )
    .unwrap();

    let journal = Journal::open_at(&tmp.path().join("data"), tmp.path());
    let err = run_agent(
        agent,
        project(tmp.path()),
        scripted_registry(vec![]),
        journal,
        RunOptions::default(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.code(), "STORE_LOCKED");
    let msg = err.to_string();
    assert!(msg.contains("pid 1"), "diagnostic cites the holder: {msg}");
}

#[tokio::test]
async fn scheduler_drives_the_run_entry_point() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("cron.agentuse");
    std::fs::write(
        &path,
        "---\nname: cron\nmodel: mock:gpt-test\nschedule: every 1 minute\n---\nTick.\n",
    )
    .unwrap();

    let journal = Journal::open_at(&tmp.path().join("data"), tmp.path());
    let providers = scripted_registry(vec![vec![
        ScriptedTurn::new().text("ticked").usage(5, 2),
    ]]);
    let project = project(tmp.path());

    let journal_for_cb = Arc::clone(&journal);
    let scheduler = Scheduler::new(move |agent_path: PathBuf| {
        let journal = Arc::clone(&journal_for_cb);
        let providers = Arc::clone(&providers);
        let project = project.clone();
        Box::pin(async move {
            let agent = parse_agent_file(&agent_path)?;
            let run = run_agent(agent, project, providers, journal, RunOptions::default())
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            Ok(ExecutionOutcome {
                session_id: Some(run.session_id),
            })
        })
    });

    let agent = parse_agent_file(&path).unwrap();
    let id = scheduler
        .add(path.clone(), agent.config.schedule.as_deref().unwrap(), None)
        .await
        .unwrap();

    // Advance a virtual clock past the first fire.
    let t90 = chrono::Local::now() + chrono::Duration::seconds(90);
    scheduler.run_pending(t90).await;

    let schedule = scheduler.get(&id).await.unwrap();
    assert_eq!(schedule.last_run, Some(t90));
    let result = schedule.last_result.unwrap();
    assert!(result.success, "{:?}", result.error);

    // The fired run produced a real completed session.
    let sid = result.session_id.unwrap();
    assert_eq!(
        journal.get_session(&sid).unwrap().status,
        SessionStatus::Completed
    );
}
