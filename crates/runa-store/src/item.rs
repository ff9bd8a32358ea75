// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One persisted store item.
///
/// `id` is a sortable journal id; `data` is an open map the agent shapes
/// however it likes.  The typed fields exist so `list` can filter without
/// understanding `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreItem {
    pub id: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "createdBy", skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(rename = "parentId", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Fields the caller provides when creating an item.
#[derive(Debug, Clone, Default)]
pub struct ItemSeed {
    pub item_type: Option<String>,
    pub title: Option<String>,
    pub status: Option<String>,
    pub created_by: Option<String>,
    pub data: HashMap<String, Value>,
    pub parent_id: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Partial item update; present fields replace, `data` entries merge in.
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    pub item_type: Option<String>,
    pub title: Option<String>,
    pub status: Option<String>,
    pub data: Option<HashMap<String, Value>>,
    pub parent_id: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Filter/pagination for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub item_type: Option<String>,
    pub status: Option<String>,
    pub parent_id: Option<String>,
    pub tag: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListQuery {
    pub fn matches(&self, item: &StoreItem) -> bool {
        if let Some(t) = &self.item_type {
            if item.item_type.as_deref() != Some(t.as_str()) {
                return false;
            }
        }
        if let Some(s) = &self.status {
            if item.status.as_deref() != Some(s.as_str()) {
                return false;
            }
        }
        if let Some(p) = &self.parent_id {
            if item.parent_id.as_deref() != Some(p.as_str()) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            let has = item
                .tags
                .as_ref()
                .is_some_and(|tags| tags.iter().any(|t| t == tag));
            if !has {
                return false;
            }
        }
        true
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
