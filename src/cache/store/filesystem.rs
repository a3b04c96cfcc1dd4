use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use tokio::{fs, sync::RwLock};
use tracing::{debug, info, warn};

use super::{CacheStore, EtagIndex, METRIC_STORE_CORRUPT_TOTAL, StoreError, with_etag};
use crate::cache::item::{CacheItem, fingerprint};

const SOURCE: &str = "cache::store::filesystem";
const RECORD_EXTENSION: &str = "json";
const PARTIAL_EXTENSION: &str = "json.download";

/// One JSON file per item, named by the digest of its hash.
///
/// Every file is guarded by its own read/write lock, created on first use and
/// kept for the life of the process. `remove_all` additionally takes a
/// store-wide gate so it never interleaves with per-key operations.
#[derive(Clone)]
pub struct FilesystemStore {
    inner: Arc<Inner>,
}

struct Inner {
    directory: PathBuf,
    locks: DashMap<String, Arc<RwLock<()>>>,
    gate: RwLock<()>,
    etags: EtagIndex,
}

impl FilesystemStore {
    /// Open (creating if needed) the cache directory and index the etags of every record in it.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;

        let store = Self {
            inner: Arc::new(Inner {
                directory,
                locks: DashMap::new(),
                gate: RwLock::new(()),
                etags: EtagIndex::default(),
            }),
        };

        let items = store.read_all().await?;
        for item in &items {
            store.inner.etags.insert(item);
        }
        info!(
            target = SOURCE,
            directory = %store.inner.directory.display(),
            items = items.len(),
            "Filesystem cache store opened"
        );

        Ok(store)
    }

    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    async fn read_all(&self) -> Result<Vec<CacheItem>, StoreError> {
        let _gate = self.inner.gate.read().await;
        let mut entries = fs::read_dir(&self.inner.directory).await?;
        let mut items = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let Some(stem) = record_stem(&entry.path()) else {
                continue;
            };
            let lock = self.inner.key_lock(&stem);
            let _guard = lock.read().await;
            let bytes = match fs::read(entry.path()).await {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            match serde_json::from_slice::<CacheItem>(&bytes) {
                Ok(item) => items.push(item),
                Err(err) => self.schedule_purge(stem, None, &err),
            }
        }

        Ok(items)
    }

    /// Remove a record that failed to decode without holding up the caller.
    fn schedule_purge(&self, stem: String, hash: Option<String>, error: &serde_json::Error) {
        warn!(
            target = SOURCE,
            file = %stem,
            hash = hash.as_deref().unwrap_or(""),
            error = %error,
            "Corrupt cache record, scheduling removal"
        );
        counter!(METRIC_STORE_CORRUPT_TOTAL, "backend" => "filesystem").increment(1);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(err) = inner.purge_if_corrupt(&stem, hash.as_deref()).await {
                warn!(
                    target = SOURCE,
                    file = %stem,
                    error = %err,
                    "Failed to remove corrupt cache record"
                );
            }
        });
    }
}

impl Inner {
    fn key_lock(&self, stem: &str) -> Arc<RwLock<()>> {
        Arc::clone(&self.locks.entry(stem.to_string()).or_default())
    }

    fn record_path(&self, stem: &str) -> PathBuf {
        self.directory.join(format!("{stem}.{RECORD_EXTENSION}"))
    }

    fn partial_path(&self, stem: &str) -> PathBuf {
        self.directory.join(format!("{stem}.{PARTIAL_EXTENSION}"))
    }

    /// Delete the record unless a writer replaced it with a valid one in the meantime.
    async fn purge_if_corrupt(&self, stem: &str, hash: Option<&str>) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let lock = self.key_lock(stem);
        let _guard = lock.write().await;
        let path = self.record_path(stem);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if serde_json::from_slice::<CacheItem>(&bytes).is_ok() {
            return Ok(());
        }

        remove_file_if_exists(&path).await?;
        match hash {
            Some(hash) => self.etags.remove(hash),
            None => self.etags.remove_where(|hash| file_stem(hash) == stem),
        }
        debug!(target = SOURCE, file = %stem, "Corrupt cache record removed");
        Ok(())
    }
}

/// File stem of a finished record, `None` for partial writes and foreign files.
fn record_stem(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(&format!(".{RECORD_EXTENSION}"))?;
    (!stem.is_empty() && !stem.contains('.')).then(|| stem.to_string())
}

fn file_stem(hash: &str) -> String {
    fingerprint(hash)
}

async fn remove_file_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl CacheStore for FilesystemStore {
    fn backend(&self) -> &'static str {
        "filesystem"
    }

    async fn upsert(&self, item: &CacheItem) -> Result<(), StoreError> {
        let item = with_etag(item);
        let payload = serde_json::to_vec(&item)?;
        let stem = file_stem(&item.hash);
        let inner = &self.inner;

        let _gate = inner.gate.read().await;
        let lock = inner.key_lock(&stem);
        let _guard = lock.write().await;

        let partial = inner.partial_path(&stem);
        let written = match fs::write(&partial, &payload).await {
            Ok(()) => fs::rename(&partial, inner.record_path(&stem)).await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            if let Err(cleanup) = remove_file_if_exists(&partial).await {
                warn!(
                    target = SOURCE,
                    hash = %item.hash,
                    error = %cleanup,
                    "Failed to clean up partial cache record"
                );
            }
            return Err(err.into());
        }

        inner.etags.insert(&item);
        Ok(())
    }

    async fn get(&self, hash: &str) -> Result<CacheItem, StoreError> {
        let stem = file_stem(hash);
        let bytes = {
            let _gate = self.inner.gate.read().await;
            let lock = self.inner.key_lock(&stem);
            let _guard = lock.read().await;
            match fs::read(self.inner.record_path(&stem)).await {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    return Err(StoreError::not_found(hash));
                }
                Err(err) => return Err(err.into()),
            }
        };

        serde_json::from_slice::<CacheItem>(&bytes).map_err(|err| {
            self.schedule_purge(stem, Some(hash.to_string()), &err);
            StoreError::not_found(hash)
        })
    }

    async fn get_all(&self) -> Result<Vec<CacheItem>, StoreError> {
        self.read_all().await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let _gate = self.inner.gate.read().await;
        let mut entries = fs::read_dir(&self.inner.directory).await?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if record_stem(&entry.path()).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn get_etag(&self, hash: &str) -> Result<String, StoreError> {
        self.inner
            .etags
            .get(hash)
            .ok_or_else(|| StoreError::not_found(hash))
    }

    async fn get_all_etags(&self, workspace: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.inner.etags.workspace(workspace))
    }

    async fn remove(&self, hash: &str) -> Result<(), StoreError> {
        let stem = file_stem(hash);
        let _gate = self.inner.gate.read().await;
        let lock = self.inner.key_lock(&stem);
        let _guard = lock.write().await;

        remove_file_if_exists(&self.inner.record_path(&stem)).await?;
        self.inner.etags.remove(hash);
        Ok(())
    }

    async fn remove_all(&self) -> Result<(), StoreError> {
        let _gate = self.inner.gate.write().await;
        match fs::remove_dir_all(&self.inner.directory).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        fs::create_dir_all(&self.inner.directory).await?;
        self.inner.etags.clear();

        info!(
            target = SOURCE,
            directory = %self.inner.directory.display(),
            "Filesystem cache store cleared"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::item::{NodeKey, VALID_UNTIL_FOREVER};

    fn item(id: &str, html: &str) -> CacheItem {
        CacheItem::new(
            &NodeKey::new(id, "de", "live"),
            html,
            vec!["foo".to_string(), "bar".to_string()],
            VALID_UNTIL_FOREVER,
        )
    }

    #[test]
    fn record_stem_skips_partial_writes() {
        assert_eq!(record_stem(Path::new("/c/abc.json")).as_deref(), Some("abc"));
        assert_eq!(record_stem(Path::new("/c/abc.json.download")), None);
        assert_eq!(record_stem(Path::new("/c/abc.txt")), None);
    }

    #[test]
    fn file_names_never_contain_path_separators() {
        let stem = file_stem("live_de_../../etc/passwd");
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn reopening_rebuilds_etag_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::open(dir.path()).await.expect("open");
        let item = item("a", "<p>a</p>");
        store.upsert(&item).await.expect("upsert");
        drop(store);

        let reopened = FilesystemStore::open(dir.path()).await.expect("reopen");
        assert_eq!(reopened.get_etag(&item.hash).await.expect("etag"), item.etag);
        assert_eq!(reopened.inner.etags.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_record_reads_as_missing_and_is_purged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::open(dir.path()).await.expect("open");
        let item = item("a", "<p>a</p>");
        store.upsert(&item).await.expect("upsert");

        let path = store.inner.record_path(&file_stem(&item.hash));
        tokio::fs::write(&path, b"{not json").await.expect("corrupt");

        let err = store.get(&item.hash).await.expect_err("corrupt read");
        assert!(err.is_not_found());

        for _ in 0..100 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
        assert!(store.get_etag(&item.hash).await.is_err());
    }

    #[tokio::test]
    async fn corrupt_record_found_by_scan_leaves_etag_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::open(dir.path()).await.expect("open");
        let item = item("a", "<p>a</p>");
        store.upsert(&item).await.expect("upsert");
        assert!(store.get_etag(&item.hash).await.is_ok());

        let path = store.inner.record_path(&file_stem(&item.hash));
        tokio::fs::write(&path, b"{bad").await.expect("corrupt");

        assert!(store.get_all().await.expect("scan").is_empty());

        for _ in 0..100 {
            if !path.exists() && store.get_etag(&item.hash).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
        assert_eq!(store.count().await.expect("count"), 0);
        assert!(store.get_etag(&item.hash).await.expect_err("purged").is_not_found());
        assert!(store.get_all_etags("live").await.expect("etags").is_empty());
    }

    #[tokio::test]
    async fn remove_all_recreates_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache_dir = dir.path().join("cache");
        let store = FilesystemStore::open(&cache_dir).await.expect("open");
        store.upsert(&item("a", "a")).await.expect("upsert");
        store.upsert(&item("b", "b")).await.expect("upsert");

        store.remove_all().await.expect("remove_all");
        assert!(cache_dir.is_dir());
        assert_eq!(store.count().await.expect("count"), 0);
        assert!(store.get_all_etags("live").await.expect("etags").is_empty());

        store.upsert(&item("c", "c")).await.expect("usable after clear");
        assert_eq!(store.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn remove_missing_item_is_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemStore::open(dir.path()).await.expect("open");
        store.remove("live_de_missing").await.expect("idempotent remove");
    }
}
