use std::sync::Once;

use metrics::{Unit, describe_counter};
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

    // Command output goes to stdout; diagnostics stay on stderr.
    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
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

/// Registers descriptions for every counter the cache emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pitlane_lookup_hit_total",
            Unit::Count,
            "Total number of lookups served from the session cache."
        );
        describe_counter!(
            "pitlane_lookup_miss_total",
            Unit::Count,
            "Total number of lookups that had to fetch because the key was not cached."
        );
        describe_counter!(
            "pitlane_lookup_discard_total",
            Unit::Count,
            "Total number of fetch results dropped because their token was superseded."
        );
        describe_counter!(
            "pitlane_lookup_error_total",
            Unit::Count,
            "Total number of committed lookup failures."
        );
        describe_counter!(
            "pitlane_toggle_commit_total",
            Unit::Count,
            "Total number of relationship toggles confirmed by the server."
        );
        describe_counter!(
            "pitlane_toggle_rollback_total",
            Unit::Count,
            "Total number of relationship toggles rolled back after a failure."
        );
        describe_counter!(
            "pitlane_store_write_failure_total",
            Unit::Count,
            "Total number of session store writes that failed and were swallowed."
        );
    });
}
