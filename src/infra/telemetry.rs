use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metrics::{
    METRIC_CACHE_CORRUPTION, METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_INVALIDATE,
    METRIC_CACHE_MISS, METRIC_STORE_MS,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
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

/// Register metric descriptions once per process.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Cache reads answered from a tier, labelled by tier."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Cache reads that fell through to the store, labelled by tier."
        );
        describe_counter!(
            METRIC_CACHE_EVICT,
            Unit::Count,
            "Entries dropped for capacity or expiry, labelled by tier and reason."
        );
        describe_counter!(
            METRIC_CACHE_INVALIDATE,
            Unit::Count,
            "Entries removed by write cascades or explicit invalidation."
        );
        describe_counter!(
            METRIC_CACHE_CORRUPTION,
            Unit::Count,
            "Structurally invalid cache entries dropped on read."
        );
        describe_histogram!(
            METRIC_STORE_MS,
            Unit::Milliseconds,
            "Store call latency in milliseconds, labelled by operation."
        );
    });
}
