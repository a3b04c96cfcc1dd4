//! Engine tuning knobs.
//!
//! Controls queue sizing, worker count, retry cadence and load deadlines via the
//! `[cache]` section of `contentproxy.toml`.

use std::time::Duration;

pub(crate) const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
pub(crate) const DEFAULT_WORKERS: usize = 15;
pub(crate) const DEFAULT_RETRY_TICK_MS: u64 = 10_000;
pub(crate) const DEFAULT_RETRY_GRACE_SECS: u64 = 5 * 60;
pub(crate) const DEFAULT_FAST_RETRY_ATTEMPTS: u32 = 5;
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub(crate) const DEFAULT_LOAD_TIMEOUT_MS: u64 = 10_000;
pub(crate) const DEFAULT_SLOW_LOAD_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Lifetime of items without a declared expiry. Zero caches forever.
    pub lifetime_secs: u64,
    /// Capacity of the bounded invalidation channel.
    pub queue_capacity: usize,
    /// Number of invalidation workers.
    pub workers: usize,
    /// Interval between retry lane sweeps.
    pub retry_tick_ms: u64,
    /// Jobs idle longer than this are resubmitted regardless of attempt count.
    pub retry_grace_secs: u64,
    /// Jobs below this attempt count are resubmitted on the next sweep and use the short deadline.
    pub fast_retry_attempts: u32,
    /// Jobs are abandoned once their attempt counter reaches this value.
    pub max_attempts: u32,
    pub load_timeout_ms: u64,
    pub slow_load_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lifetime_secs: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            retry_tick_ms: DEFAULT_RETRY_TICK_MS,
            retry_grace_secs: DEFAULT_RETRY_GRACE_SECS,
            fast_retry_attempts: DEFAULT_FAST_RETRY_ATTEMPTS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            load_timeout_ms: DEFAULT_LOAD_TIMEOUT_MS,
            slow_load_timeout_ms: DEFAULT_SLOW_LOAD_TIMEOUT_MS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            lifetime_secs: settings.lifetime.as_secs(),
            queue_capacity: settings.queue_capacity.get(),
            workers: settings.workers.get(),
            retry_tick_ms: duration_ms(settings.retry_tick),
            retry_grace_secs: settings.retry_grace.as_secs(),
            fast_retry_attempts: settings.fast_retry_attempts,
            max_attempts: settings.max_attempts.get(),
            load_timeout_ms: duration_ms(settings.load_timeout),
            slow_load_timeout_ms: duration_ms(settings.slow_load_timeout),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl CacheConfig {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }

    /// Queue capacity, clamped to at least one slot.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    pub fn retry_tick(&self) -> Duration {
        Duration::from_millis(self.retry_tick_ms.max(1))
    }

    pub fn retry_grace(&self) -> Duration {
        Duration::from_secs(self.retry_grace_secs)
    }

    /// Deadline for an attempt given how many times the job already failed.
    pub fn load_timeout(&self, execution_counter: u32) -> Duration {
        if execution_counter < self.fast_retry_attempts {
            Duration::from_millis(self.load_timeout_ms)
        } else {
            Duration::from_millis(self.slow_load_timeout_ms)
        }
    }
}
