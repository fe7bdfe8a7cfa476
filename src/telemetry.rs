use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs are written to stderr.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError::Subscriber(err.to_string()))
}

/// Register descriptions for every metric the cache emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "query_sync_cache_hit_total",
            Unit::Count,
            "Reads served from a fresh cache entry."
        );
        describe_counter!(
            "query_sync_cache_miss_total",
            Unit::Count,
            "Reads that had to fetch or wait for a fetch."
        );
        describe_counter!(
            "query_sync_fetch_dedup_total",
            Unit::Count,
            "Reads that attached to an in-flight fetch instead of starting one."
        );
        describe_histogram!(
            "query_sync_fetch_ms",
            Unit::Milliseconds,
            "Fetch latency in milliseconds, labelled by outcome."
        );
        describe_counter!(
            "query_sync_mutation_rollback_total",
            Unit::Count,
            "Failed mutations, labelled by rollback outcome."
        );
        describe_counter!(
            "query_sync_prefetch_skipped_total",
            Unit::Count,
            "Prefetch requests not run, labelled by reason."
        );
    });
}
