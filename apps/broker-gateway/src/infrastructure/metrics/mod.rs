//! Prometheus Metrics Module
//!
//! Two layers:
//!
//! - [`MetricsRecorder`]: in-process counters and a rolling latency window,
//!   readable as a [`MetricsSnapshot`] through the gateway façade.
//! - The `metrics` facade, mirrored on every record call and rendered by the
//!   Prometheus exporter at `/metrics` on the health server port.

mod recorder;

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::{ConnectionStatus, OrderStatus};

pub use recorder::{LatencySummary, MetricsRecorder, MetricsSnapshot};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics initialization error.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The global recorder could not be installed.
    #[error("failed to install Prometheus recorder: {0}")]
    Install(String),
}

/// Initialize the Prometheus metrics recorder.
///
/// Idempotent: later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
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
        "broker_gateway_requests_total",
        "Gateway requests by kind and outcome"
    );
    describe_histogram!(
        "broker_gateway_request_duration_seconds",
        "Latency of successful gateway requests"
    );
    describe_counter!(
        "broker_gateway_circuit_trips_total",
        "Times the circuit breaker opened"
    );
    describe_counter!(
        "broker_gateway_circuit_rejections_total",
        "Calls denied by an open circuit breaker"
    );
    describe_counter!(
        "broker_gateway_reconnect_attempts_total",
        "Gateway reconnection attempts"
    );
    describe_counter!(
        "broker_gateway_late_responses_total",
        "Vendor responses discarded because the request was already evicted"
    );
    describe_gauge!(
        "broker_gateway_connection_status",
        "0 disconnected, 1 connecting, 2 connected, 3 reconnecting"
    );
    describe_counter!(
        "broker_gateway_order_transitions_total",
        "Order status transitions by target status"
    );
    describe_gauge!(
        "broker_gateway_active_orders",
        "Orders currently tracked as non-terminal"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Update the connection status gauge.
pub fn set_connection_status(status: ConnectionStatus) {
    gauge!("broker_gateway_connection_status").set(status.as_gauge());
}

/// Record an order status transition.
pub fn record_order_transition(to: OrderStatus) {
    counter!(
        "broker_gateway_order_transitions_total",
        "status" => order_status_label(to)
    )
    .increment(1);
}

/// Update the active order gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_orders(count: usize) {
    gauge!("broker_gateway_active_orders").set(count as f64);
}

const fn order_status_label(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::PendingSubmit => "pending_submit",
        OrderStatus::Submitted => "submitted",
        OrderStatus::PartiallyFilled => "partially_filled",
        OrderStatus::Filled => "filled",
        OrderStatus::Cancelled => "cancelled",
        OrderStatus::Rejected => "rejected",
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_labels() {
        assert_eq!(order_status_label(OrderStatus::PartiallyFilled), "partially_filled");
        assert_eq!(order_status_label(OrderStatus::Rejected), "rejected");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        set_connection_status(ConnectionStatus::Connected);
        record_order_transition(OrderStatus::Filled);
        set_active_orders(3);
    }
}
