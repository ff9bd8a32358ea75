// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::read_file::resolve;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct EditFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "tools__edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact string in a file. 'old_string' must match exactly once\n\
         unless 'replace_all' is true. Include enough surrounding context to make\n\
         the match unique."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "old_string": { "type": "string", "description": "Exact text to replace" },
                "new_string": { "type": "string", "description": "Replacement text" },
                "replace_all": { "type": "boolean", "description": "Replace every occurrence (default false)" }
            },
            "required": ["path", "old_string", "new_string"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let get = |key: &str| call.args.get(key).and_then(Value::as_str);
        let (Some(path), Some(old), Some(new)) =
            (get("path"), get("old_string"), get("new_string"))
        else {
            return ToolOutput::err(&call.id, "missing 'path', 'old_string' or 'new_string'");
        };
        if old == new {
            return ToolOutput::err(&call.id, "old_string and new_string are identical");
        }
        let replace_all = call
            .args
            .get("replace_all")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let resolved = resolve(&self.root, path);
        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("read {path}: {e}")),
        };

        let count = content.matches(old).count();
        if count == 0 {
            return ToolOutput::err(&call.id, format!("old_string not found in {path}"));
        }
        if count > 1 && !replace_all {
            return ToolOutput::err(
                &call.id,
                format!(
                    "old_string matches {count} times in {path}; \
                     add context to make it unique or set replace_all"
                ),
            );
        }

        let updated = if replace_all {
            content.replace(old, new)
        } else {
            content.replacen(old, new, 1)
        };
        match tokio::fs::write(&resolved, updated).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!(
                    "replaced {} occurrence(s) in {path}",
                    if replace_all { count } else { 1 }
                ),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("write {path}: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
