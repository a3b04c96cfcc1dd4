use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;

use super::{CacheStore, StoreError, with_etag};
use crate::cache::item::CacheItem;
use crate::cache::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store::memory";

/// Process-local backend behind a single map-wide read/write lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, CacheItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, item: &CacheItem) -> Result<(), StoreError> {
        let item = with_etag(item);
        rw_write(&self.items, SOURCE, "upsert").insert(item.hash.clone(), item);
        Ok(())
    }

    async fn get(&self, hash: &str) -> Result<CacheItem, StoreError> {
        rw_read(&self.items, SOURCE, "get")
            .get(hash)
            .cloned()
            .ok_or_else(|| StoreError::not_found(hash))
    }

    async fn get_all(&self) -> Result<Vec<CacheItem>, StoreError> {
        Ok(rw_read(&self.items, SOURCE, "get_all")
            .values()
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(rw_read(&self.items, SOURCE, "count").len())
    }

    async fn get_etag(&self, hash: &str) -> Result<String, StoreError> {
        rw_read(&self.items, SOURCE, "get_etag")
            .get(hash)
            .map(|item| item.etag().into_owned())
            .ok_or_else(|| StoreError::not_found(hash))
    }

    async fn get_all_etags(&self, workspace: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(rw_read(&self.items, SOURCE, "get_all_etags")
            .iter()
            .filter(|(_, item)| item.workspace == workspace)
            .map(|(hash, item)| (hash.clone(), item.etag().into_owned()))
            .collect())
    }

    async fn remove(&self, hash: &str) -> Result<(), StoreError> {
        rw_write(&self.items, SOURCE, "remove").remove(hash);
        Ok(())
    }

    async fn remove_all(&self) -> Result<(), StoreError> {
        rw_write(&self.items, SOURCE, "remove_all").clear();
        Ok(())
    }
}
