//! In-process request metrics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, histogram};
use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::RequestKind;
use crate::error::GatewayError;

/// Counters and a bounded rolling latency window.
///
/// Shared by the executor and the connection; every method holds at most
/// one short critical section.
#[derive(Debug)]
pub struct MetricsRecorder {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    circuit_trips: AtomicU64,
    circuit_rejections: AtomicU64,
    reconnect_attempts: AtomicU64,
    timeouts: AtomicU64,
    late_responses: AtomicU64,
    window_size: usize,
    latencies: Mutex<VecDeque<Duration>>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MetricsRecorder {
    /// Create a recorder keeping the last `window_size` latency samples.
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            circuit_trips: AtomicU64::new(0),
            circuit_rejections: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            late_responses: AtomicU64::new(0),
            window_size,
            latencies: Mutex::new(VecDeque::with_capacity(window_size)),
        }
    }

    /// Record a successful request and its latency.
    pub fn record_success(&self, kind: RequestKind, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);

        let mut window = self.latencies.lock();
        if window.len() == self.window_size {
            window.pop_front();
        }
        window.push_back(latency);
        drop(window);

        counter!(
            "broker_gateway_requests_total",
            "kind" => kind.as_str(),
            "outcome" => "success"
        )
        .increment(1);
        histogram!(
            "broker_gateway_request_duration_seconds",
            "kind" => kind.as_str()
        )
        .record(latency.as_secs_f64());
    }

    /// Record a failed request.
    pub fn record_failure(&self, kind: RequestKind, error: &GatewayError) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        if matches!(error, GatewayError::Timeout { .. }) {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }

        counter!(
            "broker_gateway_requests_total",
            "kind" => kind.as_str(),
            "outcome" => error.code().reason()
        )
        .increment(1);
    }

    /// Record the breaker opening.
    pub fn record_circuit_trip(&self) {
        self.circuit_trips.fetch_add(1, Ordering::Relaxed);
        counter!("broker_gateway_circuit_trips_total").increment(1);
    }

    /// Record a call denied by the breaker (`operation` is a request kind or `connect`).
    pub fn record_circuit_rejection(&self, operation: &'static str) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
        counter!(
            "broker_gateway_circuit_rejections_total",
            "operation" => operation
        )
        .increment(1);
    }

    /// Record a reconnection attempt.
    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        counter!("broker_gateway_reconnect_attempts_total").increment(1);
    }

    /// Record a vendor response discarded because its request was evicted.
    pub fn record_late_response(&self) {
        self.late_responses.fetch_add(1, Ordering::Relaxed);
        counter!("broker_gateway_late_responses_total").increment(1);
    }

    /// Read-only snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples: Vec<Duration> = self.latencies.lock().iter().copied().collect();

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            circuit_trips: self.circuit_trips.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            late_responses_discarded: self.late_responses.load(Ordering::Relaxed),
            latency: LatencySummary::from_samples(samples),
        }
    }
}

/// Point-in-time metrics view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Requests executed.
    pub total_requests: u64,
    /// Requests that returned a result.
    pub successful_requests: u64,
    /// Requests that returned an error.
    pub failed_requests: u64,
    /// Times the breaker opened.
    pub circuit_trips: u64,
    /// Calls denied by the breaker.
    pub circuit_rejections: u64,
    /// Reconnection attempts.
    pub reconnect_attempts: u64,
    /// Requests that timed out.
    pub timeouts: u64,
    /// Vendor responses discarded after eviction.
    pub late_responses_discarded: u64,
    /// Latency over the rolling window.
    pub latency: LatencySummary,
}

/// Latency statistics over the rolling window, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Samples in the window.
    pub count: usize,
    /// Mean latency.
    pub mean_ms: f64,
    /// Median latency.
    pub p50_ms: f64,
    /// 95th percentile latency.
    pub p95_ms: f64,
    /// Maximum latency.
    pub max_ms: f64,
}

impl LatencySummary {
    #[allow(clippy::cast_precision_loss)]
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_unstable();

        let count = samples.len();
        let to_ms = |d: Duration| d.as_secs_f64() * 1000.0;
        let total: f64 = samples.iter().copied().map(to_ms).sum();
        // Nearest-rank percentile.
        let rank = |p: f64| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let idx = ((p * count as f64).ceil() as usize).clamp(1, count) - 1;
            to_ms(samples[idx])
        };

        Self {
            count,
            mean_ms: total / count as f64,
            p50_ms: rank(0.50),
            p95_ms: rank(0.95),
            max_ms: to_ms(samples[count - 1]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CorrelationId;

    #[test]
    fn counts_outcomes() {
        let recorder = MetricsRecorder::new(8);
        recorder.record_success(RequestKind::AccountQuery, Duration::from_millis(10));
        recorder.record_failure(
            RequestKind::PlaceOrder,
            &GatewayError::Timeout {
                kind: RequestKind::PlaceOrder,
                correlation_id: CorrelationId::new(1),
                timeout: Duration::from_secs(1),
            },
        );
        recorder.record_failure(RequestKind::MarketQuote, &GatewayError::CircuitOpen);
        recorder.record_circuit_trip();
        recorder.record_circuit_rejection("market_quote");
        recorder.record_reconnect_attempt();
        recorder.record_late_response();

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.failed_requests, 2);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.circuit_trips, 1);
        assert_eq!(snapshot.circuit_rejections, 1);
        assert_eq!(snapshot.reconnect_attempts, 1);
        assert_eq!(snapshot.late_responses_discarded, 1);
    }

    #[test]
    fn latency_window_is_bounded() {
        let recorder = MetricsRecorder::new(4);
        for ms in 1..=10 {
            recorder.record_success(RequestKind::AccountQuery, Duration::from_millis(ms));
        }
        let latency = recorder.snapshot().latency;
        assert_eq!(latency.count, 4);
        assert!((latency.max_ms - 10.0).abs() < 1e-9);
        assert!((latency.mean_ms - 8.5).abs() < 1e-9);
    }

    #[test]
    fn percentiles_use_nearest_rank() {
        let samples = (1..=100).map(Duration::from_millis).collect();
        let summary = LatencySummary::from_samples(samples);
        assert!((summary.p50_ms - 50.0).abs() < 1e-9);
        assert!((summary.p95_ms - 95.0).abs() < 1e-9);
        assert_eq!(LatencySummary::from_samples(Vec::new()), LatencySummary::default());
    }
}
