// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod edit_file;
mod read_file;
mod shell;
mod skill;
mod write_file;

use std::path::PathBuf;
use std::sync::Arc;

pub use edit_file::EditFileTool;
pub use read_file::ReadFileTool;
pub use shell::ShellTool;
pub use skill::{SkillFileTool, SkillTool};
pub use write_file::WriteFileTool;

use crate::policy::ShellPolicy;
use crate::registry::ToolRegistry;

/// Everything the built-in tools need from the prepared execution.
#[derive(Clone)]
pub struct BuiltinContext {
    /// Project root; relative tool paths resolve against it.
    pub root: PathBuf,
    /// Directory of the agent document (skill discovery root).
    pub agent_dir: PathBuf,
    pub shell_policy: Arc<ShellPolicy>,
    pub shell_timeout_secs: u64,
}

/// Register the `tools__*` namespace.
pub fn register_builtin_tools(registry: &mut ToolRegistry, ctx: &BuiltinContext) {
    registry.register(ReadFileTool {
        root: ctx.root.clone(),
    });
    registry.register(WriteFileTool {
        root: ctx.root.clone(),
    });
    registry.register(EditFileTool {
        root: ctx.root.clone(),
    });
    registry.register(ShellTool {
        root: ctx.root.clone(),
        policy: Arc::clone(&ctx.shell_policy),
        timeout_secs: ctx.shell_timeout_secs,
    });
    registry.register(SkillTool {
        agent_dir: ctx.agent_dir.clone(),
    });
    registry.register(SkillFileTool {
        agent_dir: ctx.agent_dir.clone(),
    });
}
