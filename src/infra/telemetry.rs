use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_FLIGHT_JOINS_TOTAL, METRIC_INVALIDATIONS_TOTAL, METRIC_LOAD_MS, METRIC_RETRY_PENDING,
    METRIC_STORE_CORRUPT_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber described by `logging`.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub(crate) fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_INVALIDATIONS_TOTAL,
            Unit::Count,
            "Invalidation jobs by outcome (completed, retry_scheduled, diverted, abandoned)."
        );
        describe_gauge!(
            METRIC_RETRY_PENDING,
            Unit::Count,
            "Jobs currently parked in the retry lane."
        );
        describe_histogram!(
            METRIC_LOAD_MS,
            Unit::Milliseconds,
            "Latency of a successful content refresh."
        );
        describe_counter!(
            METRIC_STORE_CORRUPT_TOTAL,
            Unit::Count,
            "Unreadable records found in a cache store."
        );
        describe_counter!(
            METRIC_FLIGHT_JOINS_TOTAL,
            Unit::Count,
            "Loads that joined an already running load for the same key."
        );
    });
}
