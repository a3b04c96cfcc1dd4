//! Source of fresh renderings.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::item::NodeKey;

/// A rendering as produced by the content source.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Content {
    pub html: String,
    /// Node ids whose content went into this rendering.
    pub dependencies: Vec<String>,
    /// Absolute expiry in Unix seconds, zero when undeclared.
    pub valid_until: i64,
}

/// Failure classes a loader reports; each drives a different retry decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("content source has no node `{0}`")]
    NotFound(String),
    #[error("content source rejected the request: {0}")]
    BadRequest(String),
    #[error("content source is in maintenance: {0}")]
    Maintenance(String),
    #[error("content source did not answer within {0:?}")]
    Timeout(Duration),
    #[error("unexpected response from content source: {0}")]
    Response(String),
    #[error("could not build request to content source: {0}")]
    Request(String),
}

impl LoaderError {
    /// Errors that no amount of retrying will fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::BadRequest(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Maintenance(_) => "maintenance",
            Self::Timeout(_) => "timeout",
            Self::Response(_) => "response",
            Self::Request(_) => "request",
        }
    }
}

#[async_trait]
pub trait ContentLoader: Send + Sync {
    /// Fetch the current rendering of `node`.
    ///
    /// The caller enforces `deadline` by dropping the future; implementations
    /// may also hand it to their transport.
    async fn get_content(&self, node: &NodeKey, deadline: Duration)
    -> Result<Content, LoaderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_found_and_bad_request_are_permanent() {
        assert!(LoaderError::NotFound("x".into()).is_permanent());
        assert!(LoaderError::BadRequest("x".into()).is_permanent());
        assert!(!LoaderError::Maintenance("x".into()).is_permanent());
        assert!(!LoaderError::Timeout(Duration::from_secs(1)).is_permanent());
        assert!(!LoaderError::Response("x".into()).is_permanent());
        assert!(!LoaderError::Request("x".into()).is_permanent());
    }
}
