use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "stockdesk_cache_hit_total",
            Unit::Count,
            "Provider cache lookups served from a fresh row."
        );
        describe_counter!(
            "stockdesk_cache_miss_total",
            Unit::Count,
            "Provider cache lookups that fell through, labelled by reason."
        );
        describe_counter!(
            "stockdesk_cache_write_total",
            Unit::Count,
            "Rows written to the provider cache."
        );
        describe_counter!(
            "stockdesk_cache_error_total",
            Unit::Count,
            "Provider cache operations that failed or timed out."
        );
        describe_counter!(
            "stockdesk_cache_purged_total",
            Unit::Count,
            "Rows removed by the expiry sweep."
        );
        describe_counter!(
            "stockdesk_rate_limit_rejected_total",
            Unit::Count,
            "Requests rejected by the per-IP rate limiter."
        );
        describe_gauge!(
            "stockdesk_rate_limit_visitors",
            Unit::Count,
            "Client addresses currently tracked by the rate limiter."
        );
        describe_histogram!(
            "stockdesk_rate_limit_sweep_ms",
            Unit::Milliseconds,
            "Time spent evicting idle rate-limit entries."
        );
    });
}
