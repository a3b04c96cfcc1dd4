use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use sqlx::{PgPool, query, query_as, query_scalar, types::Json};
use tracing::{info, warn};

use super::{CacheStore, EtagIndex, METRIC_STORE_CORRUPT_TOTAL, StoreError, with_etag};
use crate::cache::item::CacheItem;

const SOURCE: &str = "cache::store::postgres";

/// Document backend: one JSONB row per item in `content_cache`.
///
/// Atomicity comes from the database; the table carries a unique constraint on
/// `(node_id, dimension, workspace)` plus single-column lookup indexes.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    etags: Arc<EtagIndex>,
}

impl PostgresStore {
    /// Wrap a migrated pool and index the etags already in the table.
    pub async fn open(pool: PgPool) -> Result<Self, StoreError> {
        let rows: Vec<(String, String, String)> =
            query_as("SELECT hash, workspace, etag FROM content_cache")
                .fetch_all(&pool)
                .await?;
        let indexed = rows.len();
        let etags = Arc::new(EtagIndex::from_entries(rows));

        info!(target = SOURCE, items = indexed, "Postgres cache store opened");
        Ok(Self { pool, etags })
    }

    fn decode(&self, hash: &str, document: Value) -> Option<CacheItem> {
        match serde_json::from_value::<CacheItem>(document.clone()) {
            Ok(item) => Some(item),
            Err(err) => {
                self.schedule_purge(hash.to_string(), document, &err);
                None
            }
        }
    }

    /// Delete a row that failed to decode, unless it was rewritten meanwhile.
    fn schedule_purge(&self, hash: String, document: Value, error: &serde_json::Error) {
        warn!(
            target = SOURCE,
            hash = %hash,
            error = %error,
            "Corrupt cache record, scheduling removal"
        );
        counter!(METRIC_STORE_CORRUPT_TOTAL, "backend" => "postgres").increment(1);

        let pool = self.pool.clone();
        let etags = Arc::clone(&self.etags);
        tokio::spawn(async move {
            let result = query("DELETE FROM content_cache WHERE hash = $1 AND document = $2")
                .bind(&hash)
                .bind(Json(&document))
                .execute(&pool)
                .await;
            match result {
                Ok(done) if done.rows_affected() > 0 => etags.remove(&hash),
                Ok(_) => {}
                Err(err) => warn!(
                    target = SOURCE,
                    hash = %hash,
                    error = %err,
                    "Failed to remove corrupt cache record"
                ),
            }
        });
    }
}

#[async_trait]
impl CacheStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn upsert(&self, item: &CacheItem) -> Result<(), StoreError> {
        let item = with_etag(item);
        query(
            "INSERT INTO content_cache (hash, node_id, dimension, workspace, etag, document, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now()) \
             ON CONFLICT (hash) DO UPDATE \
             SET etag = EXCLUDED.etag, document = EXCLUDED.document, updated_at = now()",
        )
        .bind(&item.hash)
        .bind(&item.id)
        .bind(&item.dimension)
        .bind(&item.workspace)
        .bind(&item.etag)
        .bind(Json(&item))
        .execute(&self.pool)
        .await?;

        self.etags.insert(&item);
        Ok(())
    }

    async fn get(&self, hash: &str) -> Result<CacheItem, StoreError> {
        let document: Option<Value> =
            query_scalar("SELECT document FROM content_cache WHERE hash = $1")
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;

        document
            .and_then(|document| self.decode(hash, document))
            .ok_or_else(|| StoreError::not_found(hash))
    }

    async fn get_all(&self) -> Result<Vec<CacheItem>, StoreError> {
        let rows: Vec<(String, Value)> =
            query_as("SELECT hash, document FROM content_cache ORDER BY hash")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(hash, document)| self.decode(&hash, document))
            .collect())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = query_scalar("SELECT COUNT(*) FROM content_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn get_etag(&self, hash: &str) -> Result<String, StoreError> {
        self.etags
            .get(hash)
            .ok_or_else(|| StoreError::not_found(hash))
    }

    async fn get_all_etags(&self, workspace: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.etags.workspace(workspace))
    }

    async fn remove(&self, hash: &str) -> Result<(), StoreError> {
        query("DELETE FROM content_cache WHERE hash = $1")
            .bind(hash)
            .execute(&self.pool)
            .await?;
        self.etags.remove(hash);
        Ok(())
    }

    async fn remove_all(&self) -> Result<(), StoreError> {
        query("DELETE FROM content_cache")
            .execute(&self.pool)
            .await?;
        self.etags.clear();
        Ok(())
    }
}
