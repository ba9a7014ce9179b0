//! Prometheus Metrics Module
//!
//! Exposes feed client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Traffic**: Transport frames, packets and decoded records by kind
//! - **Errors**: Decode failures by kind, protocol violations, negative acks
//! - **Control**: Control requests by action, subscriptions by mode
//! - **Latency**: Time from frame arrival to decoded records
//!
//! # Integration
//!
//! The binary serves `/metrics` on `ODIN_METRICS_PORT` when it is set; the
//! library only records.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;
use crate::domain::control::ControlAction;
use crate::domain::subscription::{SubscriptionMode, SubscriptionStats};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Errors installing the metrics recorder.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Recorder or listener could not be built.
    #[error("failed to build Prometheus exporter: {0}")]
    Build(#[from] BuildError),

    /// Another global recorder is already installed.
    #[error("failed to install global metrics recorder: {0}")]
    Install(String),
}

/// Install the Prometheus recorder.
///
/// With `listen` set, an HTTP listener serving `/metrics` is spawned on the
/// current Tokio runtime. Calling again returns the first handle.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(listen: Option<SocketAddr>) -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = match listen {
        Some(addr) => {
            let (recorder, exporter) = PrometheusBuilder::new()
                .with_http_listener(addr)
                .build()?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| MetricsError::Install(e.to_string()))?;
            tokio::spawn(async move {
                if exporter.await.is_err() {
                    tracing::error!("Prometheus exporter stopped");
                }
            });
            handle
        }
        None => PrometheusBuilder::new().install_recorder()?,
    };

    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "odin_feed_frames_received_total",
        "Transport frames received from the feed server"
    );
    describe_counter!(
        "odin_feed_bytes_received_total",
        "Bytes received from the feed server"
    );
    describe_counter!(
        "odin_feed_packets_total",
        "Packets reassembled, by body encoding"
    );
    describe_counter!(
        "odin_feed_records_total",
        "Decoded market records, by kind"
    );
    describe_counter!(
        "odin_feed_decode_errors_total",
        "Messages dropped because they could not be inflated or decoded"
    );
    describe_counter!(
        "odin_feed_protocol_violations_total",
        "Framing violations that closed the session"
    );
    describe_counter!(
        "odin_feed_control_requests_total",
        "Control requests sent, by action and mode"
    );
    describe_counter!(
        "odin_feed_negative_acks_total",
        "Control requests rejected by the server"
    );
    describe_gauge!(
        "odin_feed_subscriptions",
        "Scrips subscribed, by mode"
    );
    describe_gauge!(
        "odin_feed_connection_state",
        "Session state (0 disconnected, 1 connecting, 2 connected, 3 closing)"
    );
    describe_histogram!(
        "odin_feed_frame_processing_seconds",
        "Time to reassemble, inflate and decode one transport frame"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one inbound transport frame.
pub fn record_frame_received(bytes: usize) {
    counter!("odin_feed_frames_received_total").increment(1);
    counter!("odin_feed_bytes_received_total").increment(bytes as u64);
}

/// Record one reassembled packet.
pub fn record_packet(encoding: &'static str) {
    counter!("odin_feed_packets_total", "encoding" => encoding).increment(1);
}

/// Record a decoded record.
pub fn record_record(kind: &'static str) {
    counter!("odin_feed_records_total", "kind" => kind).increment(1);
}

/// Record a dropped message.
pub fn record_decode_error(kind: &'static str) {
    counter!("odin_feed_decode_errors_total", "kind" => kind).increment(1);
}

/// Record a framing violation.
pub fn record_protocol_violation() {
    counter!("odin_feed_protocol_violations_total").increment(1);
}

/// Record a control request written to the transport.
pub fn record_control_request(action: ControlAction, mode: Option<SubscriptionMode>) {
    counter!(
        "odin_feed_control_requests_total",
        "action" => action.as_str(),
        "mode" => mode.map_or("none", |m| m.as_str())
    )
    .increment(1);
}

/// Record a rejected control request.
pub fn record_negative_ack(action: ControlAction) {
    counter!("odin_feed_negative_acks_total", "action" => action.as_str()).increment(1);
}

/// Publish subscription counts.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(stats: &SubscriptionStats) {
    for mode in SubscriptionMode::all() {
        gauge!("odin_feed_subscriptions", "mode" => mode.as_str())
            .set(stats.for_mode(*mode) as f64);
    }
}

/// Publish the session state.
pub fn set_connection_state(state: ConnectionState) {
    let value = match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Closing => 3.0,
    };
    gauge!("odin_feed_connection_state").set(value);
}

/// Record frame processing duration.
pub fn record_processing_duration(duration: Duration) {
    histogram!("odin_feed_frame_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
