// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Byte ceiling for one read; larger files must be windowed with
/// offset/limit.
const READ_LIMIT_BYTES: usize = 64 * 1024;

pub struct ReadFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "tools__read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file. Relative paths resolve against the project root.\n\
         Optional 'offset' (1-based line number) and 'limit' (line count) window\n\
         large files; without them the first 64 KB is returned."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to read" },
                "offset": { "type": "integer", "description": "1-based first line (optional)" },
                "limit": { "type": "integer", "description": "Number of lines (optional)" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(Value::as_str) else {
            return ToolOutput::err(&call.id, "missing 'path'");
        };
        let resolved = resolve(&self.root, path);
        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("read {path}: {e}")),
        };

        let offset = call.args.get("offset").and_then(Value::as_u64);
        let limit = call.args.get("limit").and_then(Value::as_u64);
        let windowed = match (offset, limit) {
            (None, None) => {
                if content.len() > READ_LIMIT_BYTES {
                    let cut = floor_char_boundary(&content, READ_LIMIT_BYTES);
                    format!(
                        "{}\n[... truncated at 64 KB; use offset/limit to read more ...]",
                        &content[..cut]
                    )
                } else {
                    content
                }
            }
            _ => {
                let start = offset.unwrap_or(1).saturating_sub(1) as usize;
                let take = limit.unwrap_or(u64::MAX) as usize;
                content
                    .lines()
                    .skip(start)
                    .take(take)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        ToolOutput::ok(&call.id, windowed)
    }
}

pub(crate) fn resolve(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

fn floor_char_boundary(s: &str, mut at: usize) -> usize {
    while at > 0 && !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
