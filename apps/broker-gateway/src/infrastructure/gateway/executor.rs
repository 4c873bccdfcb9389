//! Correlated request execution.
//!
//! Every gateway call goes through [`RequestExecutor::execute`]:
//!
//! 1. ensure a session exists (errors propagate unchanged)
//! 2. ask the circuit breaker (fail fast when denied)
//! 3. register a pending entry, write the request, await the reply under the
//!    caller's timeout
//! 4. report the outcome to the breaker and the metrics recorder
//!
//! Only link failures (transport errors, timeouts, lost sessions, garbled
//! replies) count against the breaker. A vendor rejection is a complete
//! round trip and is reported as a success.
//!
//! There are no automatic retries. A timed-out entry is evicted so a reply
//! that arrives afterwards is discarded by the listener.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::connection::GatewayConnection;
use super::pending::PendingRequests;
use super::requests::GatewayRequest;
use crate::error::GatewayError;
use crate::infrastructure::metrics::MetricsRecorder;
use crate::infrastructure::resilience::CircuitBreaker;

/// Executes typed operations against the gateway.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    connection: Arc<GatewayConnection>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsRecorder>,
    pending: Arc<PendingRequests>,
}

impl RequestExecutor {
    /// Create an executor sharing the connection's breaker and pending table.
    #[must_use]
    pub const fn new(
        connection: Arc<GatewayConnection>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<MetricsRecorder>,
        pending: Arc<PendingRequests>,
    ) -> Self {
        Self {
            connection,
            breaker,
            metrics,
            pending,
        }
    }

    /// Execute one operation and wait at most `timeout` for its reply.
    ///
    /// # Errors
    ///
    /// - Connection errors from `ensure_connected`, unchanged
    /// - `CircuitOpen` when the breaker denies the call (nothing is sent)
    /// - `Timeout`, `Rejected`, `ConnectionLost` or `Unknown` otherwise
    pub async fn execute<R: GatewayRequest>(
        &self,
        request: R,
        timeout: Duration,
    ) -> Result<R::Output, GatewayError> {
        let kind = R::KIND;

        if let Err(e) = self.connection.ensure_connected().await {
            self.metrics.record_failure(kind, &e);
            tracing::warn!(kind = %kind, error = %e, "Gateway unavailable");
            return Err(e);
        }

        let Some(permit) = self.breaker.try_acquire() else {
            self.metrics.record_circuit_rejection(kind.as_str());
            let err = GatewayError::CircuitOpen;
            self.metrics.record_failure(kind, &err);
            tracing::warn!(kind = %kind, "Request denied, circuit open");
            return Err(err);
        };

        let (guard, slot) = self.pending.register(kind, request.client_ref());
        let correlation_id = guard.id();
        let started = Instant::now();

        let result = match self.connection.send(correlation_id, request.into_vendor()).await {
            Err(e) => Err(e),
            Ok(()) => match tokio::time::timeout(timeout, slot).await {
                Ok(Ok(reply)) => reply.and_then(R::decode),
                Ok(Err(_)) => Err(GatewayError::unknown(
                    "pending request dropped without a reply",
                )),
                Err(_) => Err(GatewayError::Timeout {
                    kind,
                    correlation_id,
                    timeout,
                }),
            },
        };
        // Evicts the entry if nothing else did; a later reply is discarded.
        drop(guard);

        match result {
            Ok(output) => {
                self.breaker.record_success(permit);
                self.metrics.record_success(kind, started.elapsed());
                tracing::debug!(
                    kind = %kind,
                    correlation_id = %correlation_id,
                    latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Request completed"
                );
                Ok(output)
            }
            Err(e) if !e.is_link_failure() => {
                self.breaker.record_success(permit);
                self.metrics.record_failure(kind, &e);
                tracing::info!(
                    kind = %kind,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Request rejected by vendor"
                );
                Err(e)
            }
            Err(e) => {
                if self.breaker.record_failure(permit) {
                    self.metrics.record_circuit_trip();
                    tracing::error!(
                        breaker = self.breaker.name(),
                        failures = self.breaker.failure_count(),
                        "Circuit breaker opened"
                    );
                }
                self.metrics.record_failure(kind, &e);
                tracing::warn!(
                    kind = %kind,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Request failed"
                );
                Err(e)
            }
        }
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    use super::*;
    use crate::application::ports::{
        GatewayEndpoint, MockVendorClient, VendorEvent, VendorResponse,
    };
    use crate::application::services::OrderTracker;
    use crate::domain::AccountSummary;
    use crate::infrastructure::gateway::dispatcher::EventDispatcher;
    use crate::infrastructure::gateway::requests::{AccountQuery, PositionsQuery};
    use crate::infrastructure::resilience::{
        CircuitBreakerConfig, CircuitBreakerState, ReconnectConfig, ReconnectPolicy,
    };

    type Senders = Arc<Mutex<Vec<mpsc::Sender<VendorEvent>>>>;

    fn account() -> AccountSummary {
        AccountSummary {
            account_id: "DU1".to_string(),
            net_liquidation: dec!(1000),
            buying_power: dec!(4000),
            cash: dec!(1000),
            currency: "USD".to_string(),
        }
    }

    /// Vendor that answers every request with an account summary when
    /// `respond` is set, and never answers otherwise.
    fn vendor(senders: &Senders, respond: bool) -> MockVendorClient {
        let mut vendor = MockVendorClient::new();
        vendor.expect_is_connected().return_const(false);
        vendor.expect_disconnect().return_const(());
        let connect_senders = Arc::clone(senders);
        vendor.expect_connect().returning(move |_| {
            let (tx, rx) = mpsc::channel(16);
            connect_senders.lock().push(tx);
            Ok(rx)
        });
        let send_senders = Arc::clone(senders);
        vendor.expect_send().returning(move |correlation_id, _request| {
            if respond {
                let tx = send_senders.lock().last().cloned();
                if let Some(tx) = tx {
                    let _ = tx.try_send(VendorEvent::Response {
                        correlation_id,
                        response: VendorResponse::Account(account()),
                    });
                }
            }
            Ok(())
        });
        vendor
    }

    /// Vendor that refuses every request.
    fn rejecting_vendor(senders: &Senders) -> MockVendorClient {
        let mut vendor = MockVendorClient::new();
        vendor.expect_is_connected().return_const(false);
        vendor.expect_disconnect().return_const(());
        let connect_senders = Arc::clone(senders);
        vendor.expect_connect().returning(move |_| {
            let (tx, rx) = mpsc::channel(16);
            connect_senders.lock().push(tx);
            Ok(rx)
        });
        let send_senders = Arc::clone(senders);
        vendor.expect_send().returning(move |correlation_id, _request| {
            let tx = send_senders.lock().last().cloned();
            if let Some(tx) = tx {
                let _ = tx.try_send(VendorEvent::Error {
                    correlation_id: Some(correlation_id),
                    code: 321,
                    message: "request not permitted".to_string(),
                });
            }
            Ok(())
        });
        vendor
    }

    fn executor(vendor: MockVendorClient, threshold: u32) -> (RequestExecutor, Arc<MetricsRecorder>) {
        let breaker = Arc::new(CircuitBreaker::new(
            "gateway",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_secs(30),
            },
        ));
        let metrics = Arc::new(MetricsRecorder::default());
        let pending = Arc::new(PendingRequests::new());
        let dispatcher = EventDispatcher::new(
            Arc::clone(&pending),
            Arc::new(OrderTracker::default()),
            Arc::clone(&metrics),
        );
        let connection = GatewayConnection::new(
            Arc::new(vendor),
            GatewayEndpoint {
                host: "127.0.0.1".to_string(),
                port: 4002,
                client_id: 1,
                connect_timeout: Duration::from_secs(1),
            },
            ReconnectPolicy::new(ReconnectConfig::default()),
            Arc::clone(&breaker),
            Arc::clone(&metrics),
            Arc::clone(&pending),
            dispatcher,
        );
        let executor = RequestExecutor::new(connection, breaker, Arc::clone(&metrics), pending);
        (executor, metrics)
    }

    #[tokio::test]
    async fn successful_request_records_latency() {
        let senders = Senders::default();
        let (executor, metrics) = executor(vendor(&senders, true), 5);

        let result = executor
            .execute(AccountQuery, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result, account());
        assert_eq!(executor.in_flight(), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.latency.count, 1);
    }

    #[tokio::test]
    async fn mismatched_reply_is_unknown_and_counted() {
        let senders = Senders::default();
        let (executor, metrics) = executor(vendor(&senders, true), 5);

        let err = executor
            .execute(PositionsQuery, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Unknown);
        assert_eq!(executor.breaker.failure_count(), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.timeouts, 0);
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_trip_breaker_then_fail_fast() {
        let senders = Senders::default();
        let (executor, metrics) = executor(vendor(&senders, false), 3);

        for _ in 0..3 {
            let err = executor
                .execute(AccountQuery, Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(matches!(err, GatewayError::Timeout { .. }));
        }
        assert_eq!(executor.breaker.state(), CircuitBreakerState::Open);

        let err = executor
            .execute(AccountQuery, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::CircuitOpen);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.circuit_trips, 1);
        assert_eq!(snapshot.circuit_rejections, 1);
        assert_eq!(snapshot.failed_requests, 4);
    }

    #[tokio::test]
    async fn vendor_rejections_do_not_trip_breaker() {
        let senders = Senders::default();
        let (executor, metrics) = executor(rejecting_vendor(&senders), 2);

        for _ in 0..5 {
            let err = executor
                .execute(AccountQuery, Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(
                matches!(err, GatewayError::Rejected { code: Some(321), .. }),
                "{err:?}"
            );
        }
        assert_eq!(executor.breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(executor.breaker.failure_count(), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failed_requests, 5);
        assert_eq!(snapshot.circuit_trips, 0);
    }
}
