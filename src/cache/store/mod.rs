//! Persistence backends for cached items.
//!
//! Every backend implements [`CacheStore`] and is chosen at startup; the engine
//! never inspects which one it was handed.

mod filesystem;
mod memory;
mod postgres;

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use thiserror::Error;

use super::item::CacheItem;
use super::lock::{rw_read, rw_write};

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

pub(crate) const METRIC_STORE_CORRUPT_TOTAL: &str = "contentproxy_store_corrupt_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no cached item for `{hash}`")]
    NotFound { hash: String },
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize cache item: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn not_found(hash: impl Into<String>) -> Self {
        Self::NotFound { hash: hash.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Persistence contract shared by every backend.
///
/// `get` never exposes a partially written record, and `remove_all` leaves the
/// store empty and immediately usable.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name used in logs and status output.
    fn backend(&self) -> &'static str;

    /// Insert or replace the item stored under `item.hash`.
    async fn upsert(&self, item: &CacheItem) -> Result<(), StoreError>;

    async fn get(&self, hash: &str) -> Result<CacheItem, StoreError>;

    async fn get_all(&self) -> Result<Vec<CacheItem>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    async fn get_etag(&self, hash: &str) -> Result<String, StoreError>;

    /// Etags of every item in `workspace`, keyed by hash.
    async fn get_all_etags(&self, workspace: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Remove one item. Removing a missing item is not an error.
    async fn remove(&self, hash: &str) -> Result<(), StoreError>;

    async fn remove_all(&self) -> Result<(), StoreError>;
}

const ETAG_INDEX: &str = "cache::store::etag_index";

#[derive(Debug, Clone)]
struct IndexedEtag {
    workspace: String,
    etag: String,
}

/// In-memory `hash -> etag` view kept beside a persistent backend so
/// conditional requests never touch the payload.
#[derive(Debug, Default)]
pub(crate) struct EtagIndex {
    entries: RwLock<HashMap<String, IndexedEtag>>,
}

impl EtagIndex {
    /// Build from `(hash, workspace, etag)` rows.
    pub(crate) fn from_entries(entries: impl IntoIterator<Item = (String, String, String)>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(hash, workspace, etag)| (hash, IndexedEtag { workspace, etag }))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub(crate) fn get(&self, hash: &str) -> Option<String> {
        rw_read(&self.entries, ETAG_INDEX, "get")
            .get(hash)
            .map(|entry| entry.etag.clone())
    }

    pub(crate) fn insert(&self, item: &CacheItem) {
        let entry = IndexedEtag {
            workspace: item.workspace.clone(),
            etag: item.etag().into_owned(),
        };
        rw_write(&self.entries, ETAG_INDEX, "insert").insert(item.hash.clone(), entry);
    }

    pub(crate) fn remove(&self, hash: &str) {
        rw_write(&self.entries, ETAG_INDEX, "remove").remove(hash);
    }

    /// Drop every entry whose hash matches. Used when only a derived name is known.
    pub(crate) fn remove_where(&self, matches: impl Fn(&str) -> bool) {
        rw_write(&self.entries, ETAG_INDEX, "remove_where").retain(|hash, _| !matches(hash));
    }

    pub(crate) fn clear(&self) {
        rw_write(&self.entries, ETAG_INDEX, "clear").clear();
    }

    pub(crate) fn workspace(&self, workspace: &str) -> HashMap<String, String> {
        rw_read(&self.entries, ETAG_INDEX, "workspace")
            .iter()
            .filter(|(_, entry)| entry.workspace == workspace)
            .map(|(hash, entry)| (hash.clone(), entry.etag.clone()))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        rw_read(&self.entries, ETAG_INDEX, "len").len()
    }
}

/// Copy of `item` with its fingerprint filled in.
fn with_etag(item: &CacheItem) -> CacheItem {
    let mut item = item.clone();
    item.ensure_etag();
    item
}
