//! Prometheus Metrics Module
//!
//! Counters describing what the validator observed on the feed.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound frames by channel and kind
//! - **Validation**: rule failures, checksum mismatches, schema violations
//! - **Protocol drift**: unclassified frames
//! - **Waits**: timeouts by operation
//! - **Connections**: fatal connection errors
//!
//! Recording is a no-op until a recorder is installed, so the session can
//! record unconditionally and tests need no setup.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::market::Channel;
use crate::infrastructure::kraken::classifier::MessageKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics exporter setup errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be built (bad listener address, bind failure).
    #[error("failed to build Prometheus exporter: {0}")]
    Build(#[from] BuildError),

    /// Another global recorder is already installed.
    #[error("a global metrics recorder is already installed")]
    RecorderInstalled,
}

/// Install the Prometheus recorder and serve `/metrics` on `port`.
///
/// A port of 0 disables the exporter and returns `Ok(None)`. Calling this
/// again after a successful install returns the existing handle. Must be
/// called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if the recorder or the HTTP listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<Option<PrometheusHandle>, MetricsError> {
    if port == 0 {
        return Ok(None);
    }
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(Some(handle.clone()));
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::RecorderInstalled)?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "Prometheus exporter stopped");
        }
    });

    register_metrics();
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(Some(PROMETHEUS_HANDLE.get_or_init(|| handle).clone()))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "kraken_validator_frames_received_total",
        "Inbound frames by channel and message kind"
    );
    describe_counter!(
        "kraken_validator_rule_failures_total",
        "Failed semantic rules by rule id"
    );
    describe_counter!(
        "kraken_validator_checksum_mismatches_total",
        "Order book checksum mismatches"
    );
    describe_counter!(
        "kraken_validator_schema_violations_total",
        "Messages failing structural validation"
    );
    describe_counter!(
        "kraken_validator_unclassified_frames_total",
        "Frames of unknown shape"
    );
    describe_counter!(
        "kraken_validator_timeouts_total",
        "Bounded waits that expired, by operation"
    );
    describe_counter!(
        "kraken_validator_connection_errors_total",
        "Fatal connection errors"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Wait operations, used as the timeout label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOperation {
    /// Subscribe acknowledgment.
    Ack,
    /// Next data message on a subscription.
    Stream,
    /// Unsubscribe confirmation.
    Unsubscribe,
    /// Ping round trip.
    Ping,
    /// Caller-supplied predicate.
    Predicate,
}

impl WaitOperation {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Stream => "stream",
            Self::Unsubscribe => "unsubscribe",
            Self::Ping => "ping",
            Self::Predicate => "predicate",
        }
    }
}

/// Record an inbound frame.
pub fn record_frame(channel: &'static str, kind: MessageKind) {
    counter!(
        "kraken_validator_frames_received_total",
        "channel" => channel,
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a failed semantic rule.
pub fn record_rule_failure(rule_id: &'static str) {
    counter!(
        "kraken_validator_rule_failures_total",
        "rule" => rule_id
    )
    .increment(1);
}

/// Record a checksum mismatch.
pub fn record_checksum_mismatch(symbol: &str) {
    counter!(
        "kraken_validator_checksum_mismatches_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Record a schema violation.
pub fn record_schema_violation(channel: Channel) {
    counter!(
        "kraken_validator_schema_violations_total",
        "channel" => channel.as_str()
    )
    .increment(1);
}

/// Record an unclassified frame.
pub fn record_unclassified() {
    counter!("kraken_validator_unclassified_frames_total").increment(1);
}

/// Record an expired wait.
pub fn record_timeout(operation: WaitOperation) {
    counter!(
        "kraken_validator_timeouts_total",
        "operation" => operation.as_str()
    )
    .increment(1);
}

/// Record a fatal connection error.
pub fn record_connection_error(error_type: &'static str) {
    counter!(
        "kraken_validator_connection_errors_total",
        "error_type" => error_type
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
