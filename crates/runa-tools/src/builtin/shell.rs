// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::policy::ShellPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Hard byte ceiling for combined stdout + stderr returned to the model.
const OUTPUT_LIMIT_BYTES: usize = 20_000;

/// Lines kept from the head of oversized output.
const HEAD_LINES: usize = 100;

/// Lines kept from the tail of oversized output.  Errors and summaries
/// almost always appear at the end of build/test output, so the tail is
/// at least as important as the head.
const TAIL_LINES: usize = 100;

/// Built-in tool that runs a shell command under the allow-list policy.
pub struct ShellTool {
    pub root: PathBuf,
    pub policy: Arc<ShellPolicy>,
    pub timeout_secs: u64,
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "tools__shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout + stderr.\n\
         Output is capped at ~20 KB; when larger, the first 100 and last 100\n\
         lines are preserved with an omission marker in the middle.\n\
         Prefer non-interactive commands; avoid commands that require a TTY.\n\
         For large outputs pipe through `tail -200` or grep to keep only\n\
         what matters."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The complete bash one-liner to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to the project root)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(command) = call.args.get("command").and_then(Value::as_str) else {
            return ToolOutput::err(&call.id, "missing 'command'");
        };
        if !self.policy.allows(command) {
            return ToolOutput::err(
                &call.id,
                format!("command rejected by the agent's allow-list: {command}"),
            );
        }
        let workdir = call
            .args
            .get("workdir")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.root.clone());
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(self.timeout_secs);

        debug!(cmd = %command, "executing shell tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        // Detach the subprocess from any controlling terminal: stdin from
        // /dev/null defeats isatty(0) checks, kill_on_drop reaps the child
        // when the timeout future is dropped, and setsid() prevents the
        // child from opening /dev/tty directly.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        cmd.current_dir(&workdir);

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(timeout), cmd.output()).await;

        match result {
            Ok(Ok(output)) => {
                let mut content = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stdout.is_empty() {
                    content.push_str(&head_tail_truncate(&stdout));
                }
                if !stderr.is_empty() {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str("[stderr]\n");
                    content.push_str(&head_tail_truncate(&stderr));
                }
                let code = output.status.code().unwrap_or(-1);
                if content.is_empty() {
                    content = format!("[exit {code}]");
                }
                let meta = json!({ "exitCode": code });
                if code == 0 {
                    ToolOutput::ok(&call.id, content).with_metadata(meta)
                } else if code == 1 {
                    // Exit 1 is the Unix convention for "no matches" (grep)
                    // and "condition false" (test) — not a hard failure.
                    ToolOutput::ok(&call.id, format!("[exit 1]\n{content}")).with_metadata(meta)
                } else {
                    ToolOutput::err(&call.id, format!("[exit {code}]\n{content}"))
                        .with_metadata(meta)
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("spawn error: {e}")),
            Err(_) => ToolOutput::err(&call.id, format!("timeout after {timeout}s")),
        }
    }
}

/// Truncate `s` to fit within [`OUTPUT_LIMIT_BYTES`], preserving the first
/// [`HEAD_LINES`] and last [`TAIL_LINES`] lines with an omission marker in
/// the middle.
pub(crate) fn head_tail_truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT_BYTES {
        return s.to_string();
    }

    let lines: Vec<&str> = s.lines().collect();
    let total = lines.len();

    if total <= HEAD_LINES + TAIL_LINES {
        // Byte budget exceeded by very long lines: fall back to byte-level
        // head + tail windows.
        let head_end = (OUTPUT_LIMIT_BYTES / 2).min(s.len());
        let tail_start = s.len().saturating_sub(OUTPUT_LIMIT_BYTES / 2);
        let head = &s[..floor_boundary(s, head_end)];
        let tail = &s[ceil_boundary(s, tail_start)..];
        let omitted = s.len() - head.len() - tail.len();
        return format!("{head}\n...[{omitted} bytes omitted]...\n{tail}");
    }

    let head = lines[..HEAD_LINES].join("\n");
    let tail = lines[total - TAIL_LINES..].join("\n");
    let omitted_lines = total - HEAD_LINES - TAIL_LINES;
    let omitted_bytes = s.len().saturating_sub(head.len() + tail.len());
    format!("{head}\n...[{omitted_lines} lines / ~{omitted_bytes} bytes omitted]...\n{tail}")
}

fn floor_boundary(s: &str, mut at: usize) -> usize {
    while at > 0 && !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}

fn ceil_boundary(s: &str, mut at: usize) -> usize {
    while at < s.len() && !s.is_char_boundary(at) {
        at += 1;
    }
    at
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ShellTool {
        ShellTool {
            root: std::env::temp_dir(),
            policy: Arc::new(ShellPolicy::default()),
            timeout_secs: 30,
        }
    }

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "1".into(),
            name: "tools__shell".into(),
            args,
        }
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn echo_returns_stdout() {
        let out = tool().execute(&call(json!({"command": "echo hello"}))).await;
        assert!(!out.is_error, "{:?}", out.raw);
        assert!(out.raw.as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn stderr_is_labelled() {
        let out = tool()
            .execute(&call(json!({"command": "echo err >&2"})))
            .await;
        assert!(out.raw.as_str().unwrap().contains("[stderr]"));
    }

    #[tokio::test]
    async fn exit_1_is_not_error() {
        let out = tool().execute(&call(json!({"command": "exit 1"}))).await;
        assert!(!out.is_error);
        assert!(out.raw.as_str().unwrap().contains("[exit 1]"));
    }

    #[tokio::test]
    async fn exit_2_is_error_with_exit_code_metadata() {
        let out = tool().execute(&call(json!({"command": "exit 2"}))).await;
        assert!(out.is_error);
        assert_eq!(out.metadata.unwrap()["exitCode"], 2);
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let mut t = tool();
        t.timeout_secs = 1;
        let out = t.execute(&call(json!({"command": "sleep 60"}))).await;
        assert!(out.is_error);
        assert!(out.raw.as_str().unwrap().contains("timeout"));
    }

    // ── Policy ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn denied_command_is_rejected_without_running() {
        let t = ShellTool {
            root: std::env::temp_dir(),
            policy: Arc::new(ShellPolicy::from_selection(&runa_config::ToolsSelection {
                allow: vec!["echo *".into()],
                deny: vec![],
            })),
            timeout_secs: 30,
        };
        let out = t.execute(&call(json!({"command": "rm -rf /tmp/x"}))).await;
        assert!(out.is_error);
        assert!(out.raw.as_str().unwrap().contains("allow-list"));
    }

    // ── Truncation ────────────────────────────────────────────────────────────

    #[test]
    fn short_output_passes_through() {
        assert_eq!(head_tail_truncate("a\nb\n"), "a\nb\n");
    }

    #[test]
    fn head_and_tail_are_preserved() {
        let mut lines = vec!["FIRST".to_string()];
        for i in 0..800 {
            lines.push(format!("middle {i} padding padding padding padding"));
        }
        lines.push("LAST".to_string());
        let content = lines.join("\n");
        let result = head_tail_truncate(&content);
        assert!(result.contains("FIRST"));
        assert!(result.contains("LAST"));
        assert!(result.contains("omitted"));
        assert!(result.len() < content.len());
    }
}
