// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent_id;
mod document;
mod env_settings;
mod schema;
mod vars;

pub use agent_id::{derive_agent_id, sanitize_agent_id};
pub use document::{parse_agent, parse_agent_file, Agent, DocumentError};
pub use env_settings::EnvSettings;
pub use schema::{
    AgentConfig, AgentKind, LearningConfig, McpServerConfig, StoreDecl, SubagentRef,
    ToolsSelection,
};
pub use vars::{resolve_variables, VariableScope};
