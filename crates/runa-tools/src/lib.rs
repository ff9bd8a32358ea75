// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod builtin;
mod mcp;
mod policy;
mod registry;
mod store_tools;
mod tool;

pub use builtin::{
    register_builtin_tools, BuiltinContext, EditFileTool, ReadFileTool, ShellTool, SkillFileTool,
    SkillTool, WriteFileTool,
};
pub use mcp::{register_mcp_server, McpServer, McpToolDef};
pub use policy::ShellPolicy;
pub use registry::{ToolRegistry, ToolSchema};
pub use store_tools::register_store_tools;
pub use tool::{Tool, ToolCall, ToolOutput};
