// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::builtin::read_file::resolve;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct WriteFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "tools__write_file"
    }

    fn description(&self) -> &str {
        "Write a UTF-8 text file, creating parent directories as needed.\n\
         Overwrites the file if it exists. Relative paths resolve against\n\
         the project root."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to write" },
                "content": { "type": "string", "description": "Complete file content" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(Value::as_str) else {
            return ToolOutput::err(&call.id, "missing 'path'");
        };
        let Some(content) = call.args.get("content").and_then(Value::as_str) else {
            return ToolOutput::err(&call.id, "missing 'content'");
        };
        let resolved = resolve(&self.root, path);
        debug!(path = %resolved.display(), bytes = content.len(), "write_file");
        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("mkdir {}: {e}", parent.display()));
            }
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!("wrote {} bytes to {path}", content.len()),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("write {path}: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: "tools__write_file".into(),
            args,
        }
    }

    #[tokio::test]
    async fn writes_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let t = WriteFileTool {
            root: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call(json!({"path": "a/b/f.txt", "content": "hi"})))
            .await;
        assert!(!out.is_error, "{:?}", out.raw);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a/b/f.txt")).unwrap(),
            "hi"
        );
    }

    #[tokio::test]
    async fn overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "old").unwrap();
        let t = WriteFileTool {
            root: dir.path().to_path_buf(),
        };
        t.execute(&call(json!({"path": "f.txt", "content": "new"})))
            .await;
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "new"
        );
    }

    #[tokio::test]
    async fn missing_content_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let t = WriteFileTool {
            root: dir.path().to_path_buf(),
        };
        let out = t.execute(&call(json!({"path": "f.txt"}))).await;
        assert!(out.is_error);
    }
}
