//! Per-key load coalescing.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use tracing::debug;

use super::error::CacheError;
use super::item::CacheItem;

pub(crate) const METRIC_FLIGHT_JOINS_TOTAL: &str = "contentproxy_flight_joins_total";

pub(crate) type LoadResult = Result<CacheItem, CacheError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// Runs at most one load per key at a time; concurrent callers for the same
/// key await the leader's result instead of starting their own.
///
/// The load itself runs on a spawned task so it completes, and its entry is
/// released, even if every waiter gives up.
#[derive(Default, Clone)]
pub struct LoadGroup {
    inflight: Arc<DashMap<String, SharedLoad>>,
}

impl LoadGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Await the in-flight load for `key`, starting it with `start` if none is running.
    pub async fn run<F>(&self, key: &str, start: F) -> LoadResult
    where
        F: FnOnce() -> BoxFuture<'static, LoadResult>,
    {
        let shared = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                counter!(METRIC_FLIGHT_JOINS_TOTAL).increment(1);
                debug!(key, "Joining in-flight load");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let load = start();
                let release = Release {
                    inflight: Arc::clone(&self.inflight),
                    key: key.to_string(),
                };
                let task = tokio::spawn(async move {
                    let _release = release;
                    load.await
                });
                let shared = async move {
                    task.await
                        .unwrap_or_else(|err| Err(CacheError::aborted(err.to_string())))
                }
                .boxed()
                .shared();
                entry.insert(shared.clone());
                shared
            }
        };

        shared.await
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}

/// Drops the in-flight entry when the leader task finishes or unwinds.
struct Release {
    inflight: Arc<DashMap<String, SharedLoad>>,
    key: String,
}

impl Drop for Release {
    fn drop(&mut self) {
        self.inflight.remove(&self.key);
    }
}
