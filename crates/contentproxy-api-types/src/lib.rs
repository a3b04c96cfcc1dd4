//! Wire types shared by the contentproxy HTTP surface and its clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A cached content fragment as served to proxy clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDocument {
    pub html: String,
    #[serde(default)]
    pub cache_dependencies: Vec<String>,
}

/// Document returned by the CMS export endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub html: String,
    /// Absolute expiry as Unix seconds; zero when the CMS declares none.
    #[serde(default)]
    pub valid_until: i64,
    #[serde(default)]
    pub cache_dependencies: Vec<String>,
}

/// Response body for accepted invalidation requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationAccepted {
    pub message: String,
    pub accepted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtagEntry {
    pub hash: String,
    pub etag: String,
}

/// Etags of every cached item in a workspace keyed by cache hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtagListing {
    pub workspace: String,
    pub etags: BTreeMap<String, String>,
}

/// Point-in-time view of the invalidation pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub queued: usize,
    pub queue_capacity: usize,
    pub workers: usize,
    pub retry_pending: usize,
    pub completed: u64,
    pub retried: u64,
    pub diverted: u64,
    pub abandoned: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub backend: String,
    pub cached_items: usize,
    pub pipeline: PipelineStatus,
}

/// Payload posted to webhook observers after a successful invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationNotice {
    pub id: String,
    pub dimension: String,
    pub workspace: String,
    pub hash: String,
    pub etag: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_document_defaults_optional_fields() {
        let doc: ExportDocument =
            serde_json::from_str(r#"{"html":"<p>hi</p>"}"#).expect("valid document");
        assert_eq!(doc.valid_until, 0);
        assert!(doc.cache_dependencies.is_empty());
    }

    #[test]
    fn content_document_uses_camel_case() {
        let doc = ContentDocument {
            html: "<h1>x</h1>".to_string(),
            cache_dependencies: vec!["a".to_string()],
        };
        let json = serde_json::to_value(&doc).expect("serializable");
        assert_eq!(json["cacheDependencies"][0], "a");
    }
}
