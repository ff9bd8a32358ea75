// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The `store_*` tool namespace.
//!
//! Registered when the agent document declares a store.  All five tools
//! share one open [`Store`] behind an async mutex; the cross-process
//! lock is held by the store itself, so the mutex only serialises this
//! run's own concurrent accesses.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use runa_store::{ItemPatch, ItemSeed, ListQuery, Store, StoreItem};

use crate::registry::ToolRegistry;
use crate::tool::{Tool, ToolCall, ToolOutput};

type SharedStore = Arc<Mutex<Store>>;

/// Register `store_create/get/update/delete/list` over `store`.
pub fn register_store_tools(registry: &mut ToolRegistry, store: SharedStore) {
    registry.register(StoreCreateTool {
        store: Arc::clone(&store),
    });
    registry.register(StoreGetTool {
        store: Arc::clone(&store),
    });
    registry.register(StoreUpdateTool {
        store: Arc::clone(&store),
    });
    registry.register(StoreDeleteTool {
        store: Arc::clone(&store),
    });
    registry.register(StoreListTool { store });
}

fn item_json(item: &StoreItem) -> Value {
    serde_json::to_value(item).unwrap_or(Value::Null)
}

fn data_map(value: Option<&Value>) -> HashMap<String, Value> {
    value
        .and_then(Value::as_object)
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn opt_string(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list(args: &Value, key: &str) -> Option<Vec<String>> {
    args.get(key).and_then(Value::as_array).map(|a| {
        a.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

// ─── store_create ────────────────────────────────────────────────────────────

struct StoreCreateTool {
    store: SharedStore,
}

#[async_trait]
impl Tool for StoreCreateTool {
    fn name(&self) -> &str {
        "store_create"
    }

    fn description(&self) -> &str {
        "Create an item in the agent's persistent store. The item survives\n\
         across runs. 'data' is a free-form JSON object."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "type": { "type": "string" },
                "title": { "type": "string" },
                "status": { "type": "string" },
                "data": { "type": "object" },
                "parentId": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let seed = ItemSeed {
            item_type: opt_string(&call.args, "type"),
            title: opt_string(&call.args, "title"),
            status: opt_string(&call.args, "status"),
            created_by: None,
            data: data_map(call.args.get("data")),
            parent_id: opt_string(&call.args, "parentId"),
            tags: string_list(&call.args, "tags"),
        };
        match self.store.lock().await.create(seed) {
            Ok(item) => ToolOutput::raw(&call.id, item_json(&item)),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

// ─── store_get ───────────────────────────────────────────────────────────────

struct StoreGetTool {
    store: SharedStore,
}

#[async_trait]
impl Tool for StoreGetTool {
    fn name(&self) -> &str {
        "store_get"
    }

    fn description(&self) -> &str {
        "Fetch a single store item by id."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(id) = call.args.get("id").and_then(Value::as_str) else {
            return ToolOutput::err(&call.id, "missing 'id'");
        };
        match self.store.lock().await.get(id) {
            Ok(item) => ToolOutput::raw(&call.id, item_json(&item)),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

// ─── store_update ────────────────────────────────────────────────────────────

struct StoreUpdateTool {
    store: SharedStore,
}

#[async_trait]
impl Tool for StoreUpdateTool {
    fn name(&self) -> &str {
        "store_update"
    }

    fn description(&self) -> &str {
        "Update a store item. Present fields replace; 'data' keys merge\n\
         into the existing data object."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "type": { "type": "string" },
                "title": { "type": "string" },
                "status": { "type": "string" },
                "data": { "type": "object" },
                "parentId": { "type": "string" },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(id) = call.args.get("id").and_then(Value::as_str) else {
            return ToolOutput::err(&call.id, "missing 'id'");
        };
        let patch = ItemPatch {
            item_type: opt_string(&call.args, "type"),
            title: opt_string(&call.args, "title"),
            status: opt_string(&call.args, "status"),
            data: call
                .args
                .get("data")
                .and_then(Value::as_object)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            parent_id: opt_string(&call.args, "parentId"),
            tags: string_list(&call.args, "tags"),
        };
        match self.store.lock().await.update(id, patch) {
            Ok(item) => ToolOutput::raw(&call.id, item_json(&item)),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

// ─── store_delete ────────────────────────────────────────────────────────────

struct StoreDeleteTool {
    store: SharedStore,
}

#[async_trait]
impl Tool for StoreDeleteTool {
    fn name(&self) -> &str {
        "store_delete"
    }

    fn description(&self) -> &str {
        "Delete a store item by id."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(id) = call.args.get("id").and_then(Value::as_str) else {
            return ToolOutput::err(&call.id, "missing 'id'");
        };
        match self.store.lock().await.delete(id) {
            Ok(()) => ToolOutput::ok(&call.id, format!("deleted {id}")),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

// ─── store_list ──────────────────────────────────────────────────────────────

struct StoreListTool {
    store: SharedStore,
}

#[async_trait]
impl Tool for StoreListTool {
    fn name(&self) -> &str {
        "store_list"
    }

    fn description(&self) -> &str {
        "List store items, newest first. All filters are optional; 'limit'\n\
         and 'offset' paginate."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "type": { "type": "string" },
                "status": { "type": "string" },
                "parentId": { "type": "string" },
                "tag": { "type": "string" },
                "limit": { "type": "integer" },
                "offset": { "type": "integer" }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = ListQuery {
            item_type: opt_string(&call.args, "type"),
            status: opt_string(&call.args, "status"),
            parent_id: opt_string(&call.args, "parentId"),
            tag: opt_string(&call.args, "tag"),
            limit: call.args.get("limit").and_then(Value::as_u64).map(|v| v as usize),
            offset: call.args.get("offset").and_then(Value::as_u64).map(|v| v as usize),
        };
        match self.store.lock().await.list(&query) {
            Ok(items) => {
                let arr: Vec<Value> = items.iter().map(item_json).collect();
                ToolOutput::raw(&call.id, Value::Array(arr))
            }
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
