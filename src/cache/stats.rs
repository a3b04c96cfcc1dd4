use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use metrics::{counter, gauge};

pub(crate) const METRIC_INVALIDATIONS_TOTAL: &str = "contentproxy_invalidations_total";
pub(crate) const METRIC_RETRY_PENDING: &str = "contentproxy_retry_pending";
pub(crate) const METRIC_LOAD_MS: &str = "contentproxy_load_ms";

/// Final or intermediate state an invalidation job reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Retried,
    Diverted,
    Abandoned,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Retried => "retry_scheduled",
            Outcome::Diverted => "diverted",
            Outcome::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    completed: AtomicU64,
    retried: AtomicU64,
    diverted: AtomicU64,
    abandoned: AtomicU64,
    retry_pending: AtomicUsize,
}

impl PipelineCounters {
    pub(crate) fn record(&self, outcome: Outcome) {
        let slot = match outcome {
            Outcome::Completed => &self.completed,
            Outcome::Retried => &self.retried,
            Outcome::Diverted => &self.diverted,
            Outcome::Abandoned => &self.abandoned,
        };
        slot.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_INVALIDATIONS_TOTAL, "outcome" => outcome.as_str()).increment(1);
    }

    pub(crate) fn set_retry_pending(&self, pending: usize) {
        self.retry_pending.store(pending, Ordering::Relaxed);
        gauge!(METRIC_RETRY_PENDING).set(pending as f64);
    }

    pub(crate) fn snapshot(&self, queued: usize, queue_capacity: usize, workers: usize) -> PipelineStats {
        PipelineStats {
            queued,
            queue_capacity,
            workers,
            retry_pending: self.retry_pending.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            diverted: self.diverted.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the invalidation pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub queued: usize,
    pub queue_capacity: usize,
    pub workers: usize,
    /// Jobs currently parked in the retry lane.
    pub retry_pending: usize,
    pub completed: u64,
    pub retried: u64,
    pub diverted: u64,
    pub abandoned: u64,
}
