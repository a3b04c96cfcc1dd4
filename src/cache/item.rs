//! Cached content fragments and their identity.

use std::{borrow::Cow, fmt, time::Duration};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// Sentinel expiry for items that never go stale.
pub const VALID_UNTIL_FOREVER: OffsetDateTime = OffsetDateTime::UNIX_EPOCH;

const HASH_SEPARATOR: &str = "_";

/// Identity of a content node inside a dimension and workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub id: String,
    pub dimension: String,
    pub workspace: String,
}

impl NodeKey {
    pub fn new(
        id: impl Into<String>,
        dimension: impl Into<String>,
        workspace: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            dimension: dimension.into(),
            workspace: workspace.into(),
        }
    }

    pub fn hash(&self) -> String {
        cache_hash(&self.id, &self.dimension, &self.workspace)
    }

    /// Same dimension and workspace, different node.
    pub fn sibling(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dimension: self.dimension.clone(),
            workspace: self.workspace.clone(),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.workspace, self.dimension, self.id)
    }
}

/// Store key for a node: `workspace_dimension_id`.
pub fn cache_hash(id: &str, dimension: &str, workspace: &str) -> String {
    [workspace, dimension, id].join(HASH_SEPARATOR)
}

/// Hex encoded sha256 of the rendered payload.
pub fn fingerprint(html: &str) -> String {
    hex::encode(Sha256::digest(html.as_bytes()))
}

/// Resolve the expiry of a freshly loaded item.
///
/// A declared expiry (Unix seconds) wins when it lies in the future. Otherwise a
/// zero lifetime caches forever and any other lifetime expires `now + lifetime`.
pub fn valid_until(declared: i64, lifetime: Duration, now: OffsetDateTime) -> OffsetDateTime {
    if declared > 0
        && let Ok(declared) = OffsetDateTime::from_unix_timestamp(declared)
        && declared > now
    {
        return declared;
    }

    if lifetime.is_zero() {
        return VALID_UNTIL_FOREVER;
    }

    now + lifetime
}

/// One cached rendering of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheItem {
    pub hash: String,
    pub id: String,
    pub dimension: String,
    pub workspace: String,
    pub html: String,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_until: OffsetDateTime,
}

impl CacheItem {
    pub fn new(
        key: &NodeKey,
        html: impl Into<String>,
        dependencies: Vec<String>,
        valid_until: OffsetDateTime,
    ) -> Self {
        let html = html.into();
        Self {
            hash: key.hash(),
            id: key.id.clone(),
            dimension: key.dimension.clone(),
            workspace: key.workspace.clone(),
            etag: fingerprint(&html),
            html,
            dependencies,
            created: OffsetDateTime::now_utc(),
            valid_until,
        }
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(&self.id, &self.dimension, &self.workspace)
    }

    /// Stored fingerprint, or a freshly computed one for records written without it.
    pub fn etag(&self) -> Cow<'_, str> {
        if self.etag.is_empty() {
            Cow::Owned(fingerprint(&self.html))
        } else {
            Cow::Borrowed(&self.etag)
        }
    }

    /// Fill in the fingerprint if the record lacks one.
    pub fn ensure_etag(&mut self) {
        if self.etag.is_empty() {
            self.etag = fingerprint(&self.html);
        }
    }

    pub fn is_forever(&self) -> bool {
        self.valid_until == VALID_UNTIL_FOREVER
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        !self.is_forever() && self.valid_until <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> NodeKey {
        NodeKey::new("node-1", "de", "live")
    }

    #[test]
    fn hash_is_stable_and_joins_components() {
        let key = key();
        assert_eq!(key.hash(), "live_de_node-1");
        assert_eq!(key.hash(), cache_hash("node-1", "de", "live"));
    }

    #[test]
    fn hash_distinguishes_each_component() {
        let base = cache_hash("a", "de", "live");
        assert_ne!(base, cache_hash("b", "de", "live"));
        assert_ne!(base, cache_hash("a", "en", "live"));
        assert_ne!(base, cache_hash("a", "de", "stage"));
    }

    #[test]
    fn new_item_carries_fingerprint() {
        let item = CacheItem::new(&key(), "<h1>Test</h1>", Vec::new(), VALID_UNTIL_FOREVER);
        assert_eq!(item.etag, fingerprint("<h1>Test</h1>"));
        assert_eq!(item.etag.len(), 64);
        assert_eq!(item.hash, "live_de_node-1");
    }

    #[test]
    fn etag_is_computed_when_missing() {
        let mut item = CacheItem::new(&key(), "body", Vec::new(), VALID_UNTIL_FOREVER);
        item.etag.clear();
        assert_eq!(item.etag(), fingerprint("body"));
        item.ensure_etag();
        assert_eq!(item.etag, fingerprint("body"));
    }

    #[test]
    fn valid_until_zero_lifetime_is_forever() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(valid_until(0, Duration::ZERO, now), VALID_UNTIL_FOREVER);
    }

    #[test]
    fn valid_until_prefers_future_declaration() {
        let now = OffsetDateTime::now_utc();
        let declared = now.unix_timestamp() + 3600;
        let resolved = valid_until(declared, Duration::from_secs(600), now);
        assert_eq!(resolved.unix_timestamp(), declared);
    }

    #[test]
    fn valid_until_past_declaration_falls_back_to_lifetime() {
        let now = OffsetDateTime::now_utc();
        let lifetime = Duration::from_secs(600);
        let resolved = valid_until(now.unix_timestamp() - 60, lifetime, now);
        assert!(resolved > now);
        assert!(resolved <= now + lifetime);
    }

    #[test]
    fn forever_items_never_expire() {
        let item = CacheItem::new(&key(), "x", Vec::new(), VALID_UNTIL_FOREVER);
        assert!(!item.is_expired_at(OffsetDateTime::now_utc()));

        let stale = CacheItem::new(
            &key(),
            "x",
            Vec::new(),
            OffsetDateTime::now_utc() - Duration::from_secs(1),
        );
        assert!(stale.is_expired_at(OffsetDateTime::now_utc()));
    }

    #[test]
    fn serde_round_trip_preserves_item() {
        let item = CacheItem::new(
            &key(),
            "<p>x</p>",
            vec!["foo".to_string(), "bar".to_string()],
            OffsetDateTime::now_utc() + Duration::from_secs(60),
        );
        let json = serde_json::to_string(&item).expect("serializable");
        let decoded: CacheItem = serde_json::from_str(&json).expect("decodable");
        assert_eq!(decoded, item);
    }
}
