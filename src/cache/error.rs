use std::sync::Arc;

use thiserror::Error;

use super::loader::LoaderError;
use super::store::StoreError;

/// Errors surfaced by the engine's synchronous operations.
///
/// Cloneable so a single coalesced load can hand the same outcome to every waiter.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("no cached item for `{hash}`")]
    NotFound { hash: String },
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error("cache store failed: {0}")]
    Store(#[source] Arc<StoreError>),
    #[error("cache task aborted: {0}")]
    Aborted(String),
}

impl CacheError {
    pub fn not_found(hash: impl Into<String>) -> Self {
        Self::NotFound { hash: hash.into() }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Failures a retry cannot fix.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Loader(err) if err.is_permanent())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Loader(err) => err.kind(),
            Self::Store(_) => "store",
            Self::Aborted(_) => "aborted",
        }
    }
}

impl From<StoreError> for CacheError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { hash } => Self::NotFound { hash },
            other => Self::Store(Arc::new(other)),
        }
    }
}
