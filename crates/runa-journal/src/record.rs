// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persistent record types: sessions, messages and parts.
//!
//! Everything here is serialised as UTF-8 JSON with stable field names.
//! Readers must ignore unknown fields (serde's default behaviour), and
//! unknown part variants round-trip through [`PartBody::Other`] so newer
//! writers never break older readers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Session ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(rename = "parentSessionID", skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    pub agent: SessionAgent,
    pub model: String,
    pub version: String,
    pub config: SessionConfigSnapshot,
    pub project: ProjectInfo,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
    pub time: SessionTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAgent {
    pub id: String,
    pub name: String,
    #[serde(rename = "filePath", skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "isSubAgent")]
    pub is_sub_agent: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfigSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(rename = "maxSteps", skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
    #[serde(rename = "mcpServers", skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subagents: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub root: String,
    pub cwd: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Error,
}

impl SessionStatus {
    /// Terminal states are write-once.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionError {
    pub code: String,
    pub message: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTime {
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Partial session update.  `time.updated` is always refreshed by the
/// journal; status/error transitions are checked against the write-once
/// invariant at merge time.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub error: Option<SessionError>,
}

// ─── Message ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    pub time: MessageTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant: Option<AssistantSide>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTime {
    pub created: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSide {
    pub prompt: Prompt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    /// The task text handed to the model.
    pub task: String,
    /// Optional raw user input when it differs from the task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantSide {
    pub system: Vec<String>,
    #[serde(rename = "modelID")]
    pub model_id: String,
    #[serde(rename = "providerID")]
    pub provider_id: String,
    pub mode: String,
    pub path: PathInfo,
    pub cost: f64,
    pub tokens: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AssistantError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathInfo {
    pub cwd: String,
    pub root: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
    pub cache: CacheUsage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheUsage {
    pub read: u64,
    pub write: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantError {
    pub code: String,
    pub message: String,
}

/// Seed for a new message row.
#[derive(Debug, Clone)]
pub struct MessageSeed {
    pub user: Option<UserSide>,
    pub assistant: Option<AssistantSide>,
}

/// Deep-partial message update, restricted to the three known nested
/// sections.  `assistant.tokens` is shallow-merged as a whole; there is
/// no field-level token patching.
#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub time_completed: Option<DateTime<Utc>>,
    pub assistant: Option<AssistantPatch>,
    pub user: Option<UserSide>,
}

#[derive(Debug, Clone, Default)]
pub struct AssistantPatch {
    pub tokens: Option<TokenUsage>,
    pub cost: Option<f64>,
    pub error: Option<AssistantError>,
    pub summary: Option<bool>,
}

// ─── Part ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartRecord {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(flatten)]
    pub body: PartBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PartBody {
    Text {
        text: String,
        time: PartTime,
        #[serde(skip_serializing_if = "Option::is_none")]
        synthetic: Option<bool>,
    },
    Reasoning {
        text: String,
        time: PartTime,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    Tool {
        #[serde(rename = "callID")]
        call_id: String,
        tool: String,
        state: ToolState,
    },
    File {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
    },
    Agent {
        name: String,
        #[serde(rename = "sessionID", skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    StepStart {},
    StepFinish {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tokens: Option<TokenUsage>,
    },
    Snapshot {
        snapshot: String,
    },
    Patch {
        hash: String,
        files: Vec<String>,
    },
    /// Pass-through for variants this version does not know about.
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PartTime {
    pub start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// Tool-call lifecycle.  Transitions are monotonic
/// (`pending → running → completed | error`) and the terminal state is
/// write-once; the journal enforces this on update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolState {
    Pending,
    Running {
        input: Value,
        time: ToolTime,
    },
    Completed {
        input: Value,
        output: String,
        time: ToolTime,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    Error {
        input: Value,
        error: String,
        time: ToolTime,
    },
}

impl ToolState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolState::Completed { .. } | ToolState::Error { .. })
    }

    /// Rank used for the monotonicity check.
    pub fn rank(&self) -> u8 {
        match self {
            ToolState::Pending => 0,
            ToolState::Running { .. } => 1,
            ToolState::Completed { .. } | ToolState::Error { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ToolTime {
    pub start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
