use std::time::Duration;

use super::item::CacheItem;

/// Outcome of one successful invalidation.
#[derive(Debug, Clone)]
pub struct InvalidationResult {
    pub item: CacheItem,
    pub duration: Duration,
}

/// Receives every successful invalidation.
///
/// Called from the worker that did the work, so implementations must return
/// quickly and push any I/O onto their own tasks.
pub trait Observer: Send + Sync {
    fn notify(&self, result: InvalidationResult);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn notify(&self, _result: InvalidationResult) {}
}
