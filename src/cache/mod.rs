//! Content Cache Engine
//!
//! Keeps rendered content fragments close to the proxy and refreshes them in
//! the background:
//!
//! - **Store**: pluggable persistence (filesystem, memory, Postgres)
//! - **Engine**: coalesced loads, a bounded invalidation queue with a worker
//!   pool, and a retry lane for failed or diverted jobs
//! - **Dependencies**: reverse index used to re-render every node embedding an
//!   invalidated one
//!
//! ## Configuration
//!
//! Engine behavior is controlled via `contentproxy.toml`:
//!
//! ```toml
//! [cache]
//! backend = "filesystem"
//! directory = "var/cache"
//! workers = 15
//! queue_capacity = 10000
//! # ... see config.rs for all options
//! ```

pub(crate) mod config;
pub mod deps;
mod engine;
mod error;
mod flight;
mod item;
mod loader;
mod lock;
mod observer;
mod request;
mod retry;
mod stats;
pub mod store;

pub use config::CacheConfig;
pub use deps::DependencyGraph;
pub use engine::{ContentCache, Submission};
pub use error::CacheError;
pub use flight::LoadGroup;
pub use item::{CacheItem, NodeKey, VALID_UNTIL_FOREVER, cache_hash, fingerprint, valid_until};
pub use loader::{Content, ContentLoader, LoaderError};
pub use observer::{InvalidationResult, NoopObserver, Observer};
pub use request::InvalidationRequest;
pub use stats::{Outcome, PipelineStats};
pub use store::{CacheStore, FilesystemStore, MemoryStore, PostgresStore, StoreError};

pub(crate) use flight::METRIC_FLIGHT_JOINS_TOTAL;
pub(crate) use stats::{METRIC_INVALIDATIONS_TOTAL, METRIC_LOAD_MS, METRIC_RETRY_PENDING};
pub(crate) use store::METRIC_STORE_CORRUPT_TOTAL;
