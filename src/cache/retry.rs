//! Slow lane for failed or diverted invalidations.
//!
//! A single task owns the retry queue. Other tasks only reach it through the
//! lane's channel, so the queue itself needs no lock.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

use super::config::CacheConfig;
use super::request::InvalidationRequest;
use super::stats::PipelineCounters;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) tick: Duration,
    pub(crate) grace: Duration,
    pub(crate) fast_attempts: u32,
}

impl From<&CacheConfig> for RetryPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            tick: config.retry_tick(),
            grace: config.retry_grace(),
            fast_attempts: config.fast_retry_attempts,
        }
    }
}

impl RetryPolicy {
    /// Young jobs go back at once; older ones wait out the grace window.
    fn is_due(&self, request: &InvalidationRequest, now: Instant) -> bool {
        if request.execution_counter < self.fast_attempts {
            return true;
        }
        request
            .last_executed_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.grace)
    }
}

/// Sender half handed to workers and the submit path.
#[derive(Debug, Clone)]
pub(crate) struct RetryLane {
    tx: mpsc::UnboundedSender<InvalidationRequest>,
}

impl RetryLane {
    pub(crate) fn push(&self, request: InvalidationRequest) {
        if let Err(err) = self.tx.send(request) {
            let request = err.0;
            warn!(
                request_id = %request.id,
                node = %request.key,
                "Retry lane closed, dropping invalidation"
            );
        }
    }
}

/// Oldest-first queue of parked jobs.
#[derive(Debug, Default)]
pub(crate) struct RetryQueue {
    pending: VecDeque<InvalidationRequest>,
}

impl RetryQueue {
    pub(crate) fn push(&mut self, request: InvalidationRequest) {
        self.pending.push_back(request);
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// One pass over the whole queue, O(n) per tick.
    ///
    /// Due jobs are handed to `submit`; a job that `submit` hands back stays
    /// queued in its original position.
    pub(crate) fn sweep<F>(&mut self, now: Instant, policy: &RetryPolicy, mut submit: F) -> usize
    where
        F: FnMut(InvalidationRequest) -> Result<(), InvalidationRequest>,
    {
        let mut kept = VecDeque::with_capacity(self.pending.len());
        let mut resubmitted = 0;

        for request in self.pending.drain(..) {
            if !policy.is_due(&request, now) {
                kept.push_back(request);
                continue;
            }
            match submit(request) {
                Ok(()) => resubmitted += 1,
                Err(request) => kept.push_back(request),
            }
        }

        self.pending = kept;
        resubmitted
    }
}

/// Start the retry worker and return the lane feeding it.
pub(crate) fn spawn(
    queue: mpsc::Sender<InvalidationRequest>,
    policy: RetryPolicy,
    counters: Arc<PipelineCounters>,
) -> (RetryLane, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        let mut retries = RetryQueue::default();
        let mut ticker = interval_at(Instant::now() + policy.tick, policy.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !retries.is_empty() {
                        let resubmitted = retries.sweep(Instant::now(), &policy, |request| {
                            match queue.try_send(request) {
                                Ok(()) => Ok(()),
                                Err(TrySendError::Full(request) | TrySendError::Closed(request)) => {
                                    Err(request)
                                }
                            }
                        });
                        debug!(resubmitted, pending = retries.len(), "Retry sweep finished");
                    }
                }
                received = rx.recv() => match received {
                    Some(request) => retries.push(request),
                    None => break,
                },
            }
            counters.set_retry_pending(retries.len());
        }

        info!(pending = retries.len(), "Retry worker stopped");
    });

    (RetryLane { tx }, handle)
}
