// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Skill loading tools.
//!
//! A skill is a directory containing a `SKILL.md` file, discovered under
//! `<agentDir>/skills/`.  `tools__skill` loads a skill's full body into
//! context; `tools__skill_file` reads a file bundled with a skill
//! (`scripts/`, `references/`, ...) without loading everything eagerly.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Maximum bundled file paths listed in a skill response.
const MAX_BUNDLED_FILES: usize = 20;

pub struct SkillTool {
    pub agent_dir: PathBuf,
}

pub struct SkillFileTool {
    pub agent_dir: PathBuf,
}

/// Discover skill names: every directory under `<agentDir>/skills/` that
/// contains a `SKILL.md` (matched case-insensitively), keyed by its path
/// relative to the skills root.
fn discover_skills(agent_dir: &Path) -> Vec<String> {
    let root = agent_dir.join("skills");
    let mut names = Vec::new();
    for entry in WalkDir::new(&root).min_depth(1).into_iter().flatten() {
        if entry.file_type().is_file()
            && entry.file_name().to_string_lossy().eq_ignore_ascii_case("skill.md")
        {
            if let Some(dir) = entry.path().parent() {
                if let Ok(rel) = dir.strip_prefix(&root) {
                    names.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
    }
    names.sort();
    names
}

fn skill_dir(agent_dir: &Path, name: &str) -> Option<PathBuf> {
    // Reject traversal before touching the filesystem.
    if name.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return None;
    }
    let dir = agent_dir.join("skills").join(name);
    dir.is_dir().then_some(dir)
}

fn read_skill_md(dir: &Path) -> Option<String> {
    for candidate in ["SKILL.md", "skill.md", "Skill.md"] {
        if let Ok(content) = std::fs::read_to_string(dir.join(candidate)) {
            return Some(content);
        }
    }
    None
}

#[async_trait]
impl Tool for SkillTool {
    fn name(&self) -> &str {
        "tools__skill"
    }

    fn description(&self) -> &str {
        "Load a named skill's full instructions into context. Call with no\n\
         arguments to list available skills; call with 'name' to load one.\n\
         The response includes the skill body, its base directory, and a\n\
         listing of bundled files readable with tools__skill_file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Skill name (path relative to the skills root); omit to list"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let name = call.args.get("name").and_then(Value::as_str);
        let Some(name) = name else {
            let skills = discover_skills(&self.agent_dir);
            if skills.is_empty() {
                return ToolOutput::ok(&call.id, "no skills available");
            }
            return ToolOutput::ok(&call.id, skills.join("\n"));
        };

        let Some(dir) = skill_dir(&self.agent_dir, name) else {
            return ToolOutput::err(&call.id, format!("unknown skill: {name}"));
        };
        let Some(body) = read_skill_md(&dir) else {
            return ToolOutput::err(&call.id, format!("skill {name} has no SKILL.md"));
        };

        let mut bundled: Vec<String> = WalkDir::new(&dir)
            .min_depth(1)
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_file())
            .filter(|e| !e.file_name().to_string_lossy().eq_ignore_ascii_case("skill.md"))
            .filter_map(|e| {
                e.path()
                    .strip_prefix(&dir)
                    .ok()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        bundled.sort();
        bundled.truncate(MAX_BUNDLED_FILES);

        let mut out = format!("# Skill: {name}\nBase directory: {}\n\n{body}", dir.display());
        if !bundled.is_empty() {
            out.push_str("\n\nBundled files:\n");
            for f in &bundled {
                out.push_str(&format!("  {f}\n"));
            }
        }
        ToolOutput::ok(&call.id, out)
    }
}

#[async_trait]
impl Tool for SkillFileTool {
    fn name(&self) -> &str {
        "tools__skill_file"
    }

    fn description(&self) -> &str {
        "Read a file bundled with a skill (a path from the skill's\n\
         'Bundled files' listing)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "skill": { "type": "string", "description": "Skill name" },
                "path": { "type": "string", "description": "File path relative to the skill directory" }
            },
            "required": ["skill", "path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let get = |key: &str| call.args.get(key).and_then(Value::as_str);
        let (Some(skill), Some(path)) = (get("skill"), get("path")) else {
            return ToolOutput::err(&call.id, "missing 'skill' or 'path'");
        };
        let Some(dir) = skill_dir(&self.agent_dir, skill) else {
            return ToolOutput::err(&call.id, format!("unknown skill: {skill}"));
        };
        if path.split('/').any(|seg| seg == "..") || path.starts_with('/') {
            return ToolOutput::err(&call.id, "path must stay inside the skill directory");
        }
        match std::fs::read_to_string(dir.join(path)) {
            Ok(content) => ToolOutput::ok(&call.id, content),
            Err(e) => ToolOutput::err(&call.id, format!("read {skill}/{path}: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
