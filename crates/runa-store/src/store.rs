// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The per-agent persistent store.
//!
//! Layout: `<projectRoot>/.agentuse/store/<storeName>/items.json` with a
//! sibling `lock` file.  The lock is taken once when the store is opened
//! (prepare time) and held for the whole run; every mutation loads lazily,
//! mutates in memory, and atomic-writes the file back.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::item::{ItemPatch, ItemSeed, ListQuery, StoreItem};
use crate::lock::{LockError, StoreLock};

/// Current on-disk format version.
const STORE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Locked(#[from] LockError),
    #[error("store file {path} is corrupt: {detail}")]
    Corrupt { path: String, detail: String },
    #[error("no item with id {0}")]
    NotFound(String),
    #[error("store io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    items: Vec<StoreItem>,
}

/// An open store holding the cross-process lock.
pub struct Store {
    name: String,
    dir: PathBuf,
    lock: Option<StoreLock>,
    /// Lazily loaded item list; `None` until first access.
    items: Option<Vec<StoreItem>>,
}

impl Store {
    /// Open (and lock) the named store under `project_root`.
    pub fn open(project_root: &Path, name: &str, agent: &str) -> Result<Store, StoreError> {
        let dir = project_root
            .join(".agentuse")
            .join("store")
            .join(sanitize_store_name(name));
        let lock = StoreLock::acquire(&dir.join("lock"), agent)?;
        Ok(Store {
            name: name.to_string(),
            dir,
            lock: Some(lock),
            items: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the cross-process lock.  Called by the prepared-execution
    /// cleanup; the store is unusable afterwards.
    pub fn release_lock(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.release();
        }
    }

    // ── Operations ────────────────────────────────────────────────────────────

    pub fn create(&mut self, seed: ItemSeed) -> Result<StoreItem, StoreError> {
        let now = Utc::now();
        let item = StoreItem {
            id: runa_journal::id::new_id(),
            created_at: now,
            updated_at: now,
            item_type: seed.item_type,
            title: seed.title,
            status: seed.status,
            created_by: seed.created_by,
            data: seed.data,
            parent_id: seed.parent_id,
            tags: seed.tags,
        };
        let items = self.load()?;
        items.push(item.clone());
        self.flush()?;
        Ok(item)
    }

    pub fn get(&mut self, id: &str) -> Result<StoreItem, StoreError> {
        let items = self.load()?;
        items
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn update(&mut self, id: &str, patch: ItemPatch) -> Result<StoreItem, StoreError> {
        let items = self.load()?;
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Some(t) = patch.item_type {
            item.item_type = Some(t);
        }
        if let Some(t) = patch.title {
            item.title = Some(t);
        }
        if let Some(s) = patch.status {
            item.status = Some(s);
        }
        if let Some(p) = patch.parent_id {
            item.parent_id = Some(p);
        }
        if let Some(tags) = patch.tags {
            item.tags = Some(tags);
        }
        if let Some(data) = patch.data {
            for (k, v) in data {
                item.data.insert(k, v);
            }
        }
        item.updated_at = Utc::now();
        let updated = item.clone();
        self.flush()?;
        Ok(updated)
    }

    pub fn delete(&mut self, id: &str) -> Result<(), StoreError> {
        let items = self.load()?;
        let before = items.len();
        items.retain(|i| i.id != id);
        if items.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.flush()
    }

    /// Filter in memory, sort by `created_at` descending, then paginate.
    pub fn list(&mut self, query: &ListQuery) -> Result<Vec<StoreItem>, StoreError> {
        let items = self.load()?;
        let mut selected: Vec<StoreItem> =
            items.iter().filter(|i| query.matches(i)).cloned().collect();
        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(selected.into_iter().skip(offset).take(limit).collect())
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn items_path(&self) -> PathBuf {
        self.dir.join("items.json")
    }

    fn load(&mut self) -> Result<&mut Vec<StoreItem>, StoreError> {
        if self.items.is_none() {
            let path = self.items_path();
            let items = match std::fs::read(&path) {
                Ok(bytes) => {
                    let file: StoreFile =
                        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                            path: path.display().to_string(),
                            detail: e.to_string(),
                        })?;
                    if file.version > STORE_VERSION {
                        debug!(
                            version = file.version,
                            "store file written by a newer runtime; reading anyway"
                        );
                    }
                    file.items
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                Err(source) => {
                    return Err(StoreError::Io {
                        path: path.display().to_string(),
                        source,
                    })
                }
            };
            self.items = Some(items);
        }
        Ok(self.items.as_mut().expect("items just loaded"))
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        let path = self.items_path();
        let file = StoreFile {
            version: STORE_VERSION,
            items: self.items.clone().unwrap_or_default(),
        };
        let bytes = serde_json::to_vec_pretty(&file).expect("store file serialises");
        // Atomic temp-and-rename, same protocol as the journal.
        let tmp = path.with_file_name(format!(".items.json.tmp-{}", std::process::id()));
        std::fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;
        std::fs::write(&tmp, &bytes)
            .and_then(|()| std::fs::rename(&tmp, &path))
            .map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // A panicking run must not hold the lock for its process lifetime.
        self.release_lock();
    }
}

/// Store names share the agent-id character set for directory safety.
fn sanitize_store_name(name: &str) -> String {
    runa_config::sanitize_agent_id(name)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn seed(title: &str) -> ItemSeed {
        ItemSeed {
            title: Some(title.to_string()),
            data: HashMap::from([("k".to_string(), json!("v"))]),
            ..Default::default()
        }
    }

    // ── CRUD ──────────────────────────────────────────────────────────────────

    #[test]
    fn create_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), "notes", "tester").unwrap();
        let item = store.create(seed("first")).unwrap();
        let got = store.get(&item.id).unwrap();
        assert_eq!(got.title.as_deref(), Some("first"));
        assert_eq!(got.data["k"], json!("v"));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let mut store = Store::open(dir.path(), "notes", "tester").unwrap();
            let item = store.create(seed("kept")).unwrap();
            store.release_lock();
            item.id
        };
        let mut store = Store::open(dir.path(), "notes", "tester").unwrap();
        assert_eq!(store.get(&id).unwrap().title.as_deref(), Some("kept"));
    }

    #[test]
    fn update_merges_data_and_bumps_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), "notes", "tester").unwrap();
        let item = store.create(seed("x")).unwrap();
        let updated = store
            .update(
                &item.id,
                ItemPatch {
                    status: Some("done".into()),
                    data: Some(HashMap::from([("extra".to_string(), json!(1))])),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.status.as_deref(), Some("done"));
        assert_eq!(updated.data["k"], json!("v"), "existing data keys survive");
        assert_eq!(updated.data["extra"], json!(1));
        assert!(updated.updated_at >= updated.created_at);
    }

    #[test]
    fn delete_removes_and_errors_on_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), "notes", "tester").unwrap();
        let item = store.create(seed("gone")).unwrap();
        store.delete(&item.id).unwrap();
        assert!(matches!(store.get(&item.id), Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete(&item.id), Err(StoreError::NotFound(_))));
    }

    // ── Listing ───────────────────────────────────────────────────────────────

    #[test]
    fn list_sorts_created_desc_and_paginates() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), "notes", "tester").unwrap();
        for i in 0..5 {
            store.create(seed(&format!("item{i}"))).unwrap();
        }
        let all = store.list(&ListQuery::default()).unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let page = store
            .list(&ListQuery {
                limit: Some(2),
                offset: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, all[1].id);
    }

    #[test]
    fn list_filters_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), "notes", "tester").unwrap();
        store
            .create(ItemSeed {
                status: Some("open".into()),
                ..Default::default()
            })
            .unwrap();
        store
            .create(ItemSeed {
                status: Some("done".into()),
                ..Default::default()
            })
            .unwrap();
        let open = store
            .list(&ListQuery {
                status: Some("open".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(open.len(), 1);
    }

    // ── Locking & corruption ──────────────────────────────────────────────────

    #[test]
    fn file_carries_version_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), "notes", "tester").unwrap();
        store.create(seed("x")).unwrap();
        let raw: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join(".agentuse/store/notes/items.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(raw["version"], 1);
        assert!(raw["items"].is_array());
    }

    #[test]
    fn corrupt_items_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join(".agentuse/store/notes");
        std::fs::create_dir_all(&store_dir).unwrap();
        std::fs::write(store_dir.join("items.json"), b"{broken").unwrap();
        let mut store = Store::open(dir.path(), "notes", "tester").unwrap();
        assert!(matches!(
            store.list(&ListQuery::default()),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn release_lock_allows_next_claimant() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Store::open(dir.path(), "notes", "a").unwrap();
        a.create(seed("from-a")).unwrap();
        a.release_lock();
        // Same process: re-acquire is always allowed, but the lock file
        // must actually be gone after release.
        assert!(!dir.path().join(".agentuse/store/notes/lock").exists());
        let mut b = Store::open(dir.path(), "notes", "b").unwrap();
        b.create(seed("from-b")).unwrap();
        assert_eq!(b.list(&ListQuery::default()).unwrap().len(), 2);
    }
}
