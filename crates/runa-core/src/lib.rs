// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod context;
mod doom;
mod engine;
mod error;
mod events;
mod prepare;
mod processor;
mod prompts;
mod run;
mod subagent;

pub use context::{CompactionOutcome, ContextManager};
pub use doom::{canonical_json, DoomLoopAction, DoomLoopDetector};
pub use engine::{EngineConfig, ExecutionEngine};
pub use error::{
    classify_tool_failure, failure_envelope, is_context_overflow, CoreError, ToolFailure,
};
pub use events::ExecEvent;
pub use prepare::{prepare_agent_execution, PreparedExecution, ProjectContext, RunOptions};
pub use processor::{RunTrace, StreamProcessor, ToolTrace};
pub use prompts::{build_system_prompt, SUMMARIZE_SYSTEM_PROMPT};
pub use run::{run_agent, RunAgentResult, RunError};
