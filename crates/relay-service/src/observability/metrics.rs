//! Metrics definitions for Signal Relay.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Every label is bounded by code, never by client input:
//! - `outcome`: delivered, mailbox_full, mailbox_closed, relayed, dropped
//! - `reason`: mailbox_full, mailbox_closed, not_local, relay_disabled, malformed
//! - `kind`: offer, answer, ice, new_client, leave_client
//! - `operation`: publish, subscribe, decode

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metric is recorded.
///
/// # Errors
///
/// Returns error if the recorder cannot be installed (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Bus publish is a single round trip to Redis
        .set_buckets_for_metric(
            Matcher::Prefix("relay_bus_publish".to_string()),
            &[
                0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250,
            ],
        )
        .map_err(|e| format!("Failed to set bus publish buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Set the number of open client connections.
///
/// Metric: `relay_connections_active`
pub fn set_connections_active(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_connections_active").set(count as f64);
}

/// Set the number of rooms held by this instance's registry.
///
/// Metric: `relay_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_rooms_active").set(count as f64);
}

/// Record the routing decision made for one message.
///
/// Metric: `relay_messages_routed_total`
/// Labels: `outcome`
pub fn record_message_routed(outcome: &'static str) {
    counter!("relay_messages_routed_total", "outcome" => outcome).increment(1);
}

/// Record a message that was lost.
///
/// Metric: `relay_messages_dropped_total`
/// Labels: `reason`
///
/// Loss under backpressure is accepted. A sustained non-zero rate of
/// `mailbox_full` means clients are not draining fast enough.
pub fn record_message_dropped(reason: &'static str) {
    counter!("relay_messages_dropped_total", "reason" => reason).increment(1);
}

/// Record an envelope published to the bus, with its round-trip time.
///
/// Metrics: `relay_bus_published_total` (labels: `kind`),
/// `relay_bus_publish_duration_seconds`
pub fn record_bus_published(kind: &'static str, duration: Duration) {
    counter!("relay_bus_published_total", "kind" => kind).increment(1);
    histogram!("relay_bus_publish_duration_seconds").record(duration.as_secs_f64());
}

/// Record an envelope received from the bus.
///
/// Metric: `relay_bus_received_total`
/// Labels: `kind`
pub fn record_bus_received(kind: &'static str) {
    counter!("relay_bus_received_total", "kind" => kind).increment(1);
}

/// Record a bus failure.
///
/// Metric: `relay_bus_errors_total`
/// Labels: `operation`
pub fn record_bus_error(operation: &'static str) {
    counter!("relay_bus_errors_total", "operation" => operation).increment(1);
}
