//! Broker gateway façade.
//!
//! [`BrokerGateway`] is the one handle external callers hold. It is built
//! once at process start from a [`GatewayConfig`] and a vendor client, and
//! shared by `Arc`. Every operation returns a value or a classified
//! [`GatewayError`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::GatewayConnection;
use super::dispatcher::EventDispatcher;
use super::executor::RequestExecutor;
use super::pending::PendingRequests;
use super::reconciler::{OrderReconciler, ReconcileReport};
use super::requests::{
    AccountQuery, CancelOrder, MarketQuote, OrderStatusQuery, PlaceOrder, PositionsQuery,
};
use crate::application::ports::VendorClient;
use crate::application::services::{CancelDecision, OrderTracker};
use crate::domain::{
    AccountSummary, ConnectionEvent, ConnectionSnapshot, Order, OrderId, OrderLookup, OrderSpec,
    OrderStatus, Position, Quote, RequestKind, Symbol,
};
use crate::error::GatewayError;
use crate::infrastructure::config::GatewayConfig;
use crate::infrastructure::metrics::{self, MetricsRecorder, MetricsSnapshot};
use crate::infrastructure::resilience::{
    CircuitBreaker, CircuitBreakerMetrics, CircuitBreakerState, ReconnectPolicy,
};

/// Result of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The vendor accepted the cancel request. The order stays live until
    /// the vendor confirms the cancellation.
    Requested {
        /// Vendor order ID.
        order_id: OrderId,
    },
    /// A cancel is already outstanding for this order.
    AlreadyRequested,
    /// The order is already terminal.
    NotCancellable {
        /// Final status.
        status: OrderStatus,
    },
}

/// Handle to the broker connection resilience layer.
pub struct BrokerGateway {
    config: GatewayConfig,
    connection: Arc<GatewayConnection>,
    executor: RequestExecutor,
    reconciler: OrderReconciler,
    tracker: Arc<OrderTracker>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsRecorder>,
    started: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for BrokerGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerGateway")
            .field("connection", &self.connection)
            .field("breaker", &self.breaker.state())
            .field("active_orders", &self.tracker.active_count())
            .finish_non_exhaustive()
    }
}

impl BrokerGateway {
    /// Wire the gateway over `vendor`. Nothing is dialled until [`start`] or
    /// the first request.
    ///
    /// [`start`]: BrokerGateway::start
    #[must_use]
    pub fn new(config: GatewayConfig, vendor: Arc<dyn VendorClient>) -> Self {
        let metrics = Arc::new(MetricsRecorder::new(config.latency_window));
        let breaker = Arc::new(CircuitBreaker::new(
            "gateway",
            config.circuit_breaker.clone(),
        ));
        let tracker = Arc::new(OrderTracker::new(config.order_tracker.clone()));
        let pending = Arc::new(PendingRequests::new());

        let dispatcher = EventDispatcher::new(
            Arc::clone(&pending),
            Arc::clone(&tracker),
            Arc::clone(&metrics),
        );
        let connection = GatewayConnection::new(
            vendor,
            config.gateway_endpoint(),
            ReconnectPolicy::new(config.reconnect.clone()),
            Arc::clone(&breaker),
            Arc::clone(&metrics),
            Arc::clone(&pending),
            dispatcher,
        );
        let executor = RequestExecutor::new(
            Arc::clone(&connection),
            Arc::clone(&breaker),
            Arc::clone(&metrics),
            Arc::clone(&pending),
        );
        let reconciler = OrderReconciler::new(
            executor.clone(),
            Arc::clone(&tracker),
            pending,
            config.timeouts.request,
        );

        Self {
            config,
            connection,
            executor,
            reconciler,
            tracker,
            breaker,
            metrics,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start background reconciliation and, unless lazy connect is
    /// configured, establish the first session. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the connect error of an eager start. The gateway stays usable
    /// and the next request retries the connection.
    pub async fn start(&self) -> Result<(), GatewayError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let handle = self
            .reconciler
            .clone()
            .spawn(self.connection.subscribe(), self.cancel.child_token());
        self.tasks.lock().push(handle);

        tracing::info!(
            endpoint = %self.connection.endpoint(),
            lazy_connect = self.config.endpoint.lazy_connect,
            "Broker gateway started"
        );
        if self.config.endpoint.lazy_connect {
            return Ok(());
        }
        self.connection.ensure_connected().await
    }

    /// Stop background tasks, drain the listener and release the session.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.connection.shutdown().await;

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }
        tracing::info!("Broker gateway stopped");
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Account summary.
    ///
    /// # Errors
    ///
    /// Any classified gateway error.
    pub async fn get_account(&self) -> Result<AccountSummary, GatewayError> {
        self.executor
            .execute(AccountQuery, self.config.timeouts.request)
            .await
    }

    /// Open positions.
    ///
    /// # Errors
    ///
    /// Any classified gateway error.
    pub async fn get_positions(&self) -> Result<Vec<Position>, GatewayError> {
        self.executor
            .execute(PositionsQuery, self.config.timeouts.request)
            .await
    }

    /// Quote snapshot for `symbol`.
    ///
    /// # Errors
    ///
    /// `Rejected` for a blank symbol, otherwise any classified gateway error.
    pub async fn get_quote(&self, symbol: impl Into<Symbol>) -> Result<Quote, GatewayError> {
        let symbol = symbol.into();
        if symbol.is_empty() {
            return Err(GatewayError::rejected(
                RequestKind::MarketQuote,
                "symbol must not be empty",
            ));
        }
        self.executor
            .execute(MarketQuote { symbol }, self.config.timeouts.request)
            .await
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Validate, track and submit an order.
    ///
    /// Returns the tracked order after the vendor acknowledged it. On
    /// `Timeout`, `ConnectionLost` or `Unknown` the order may or may not have
    /// reached the vendor; it stays tracked as `PENDING_SUBMIT` and its real
    /// state must be learned with [`refresh_order`] before resubmitting.
    ///
    /// [`refresh_order`]: BrokerGateway::refresh_order
    ///
    /// # Errors
    ///
    /// `Rejected` for an invalid order spec (nothing is sent) or a vendor refusal,
    /// otherwise any classified gateway error.
    pub async fn place_order(&self, spec: OrderSpec) -> Result<Order, GatewayError> {
        if let Err(reason) = spec.validate() {
            tracing::warn!(symbol = %spec.symbol, reason = %reason, "Order spec rejected");
            return Err(GatewayError::rejected(RequestKind::PlaceOrder, reason));
        }

        let client_ref = self.tracker.submit(spec.clone());
        metrics::set_active_orders(self.tracker.active_count());
        tracing::info!(
            client_ref = %client_ref,
            symbol = %spec.symbol,
            side = %spec.side,
            quantity = %spec.quantity,
            "Submitting order"
        );

        let request = PlaceOrder {
            client_ref: client_ref.clone(),
            spec,
        };
        if let Err(e) = self
            .executor
            .execute(request, self.config.timeouts.order)
            .await
        {
            if e.is_definitely_unsent() {
                self.tracker.abandon(&client_ref);
                metrics::set_active_orders(self.tracker.active_count());
            }
            return Err(e);
        }

        // The acknowledgement was applied by the listener before the reply
        // was released.
        self.tracker
            .status_of(&OrderLookup::ClientRef(client_ref))
            .ok_or_else(|| GatewayError::unknown("acknowledged order is no longer tracked"))
    }

    /// Request cancellation of an order.
    ///
    /// The order's status changes only when the vendor confirms. A cancel for
    /// an order that is already terminal is a no-op.
    ///
    /// # Errors
    ///
    /// `Rejected` if the order is unknown or not yet acknowledged, otherwise
    /// any classified gateway error.
    pub async fn cancel_order(
        &self,
        lookup: impl Into<OrderLookup>,
    ) -> Result<CancelOutcome, GatewayError> {
        let lookup = lookup.into();
        let order_id = match self.tracker.request_cancel(&lookup) {
            CancelDecision::Submit { order_id } => order_id,
            CancelDecision::AlreadyRequested => return Ok(CancelOutcome::AlreadyRequested),
            CancelDecision::Terminal { status } => {
                tracing::info!(lookup = %lookup, status = %status, "Cancel ignored, order already terminal");
                return Ok(CancelOutcome::NotCancellable { status });
            }
            CancelDecision::NotAcknowledged => {
                return Err(GatewayError::rejected(
                    RequestKind::CancelOrder,
                    "order not yet acknowledged by the vendor",
                ));
            }
            CancelDecision::Unknown => match &lookup {
                // The vendor may know an order this process never saw.
                OrderLookup::OrderId(order_id) => order_id.clone(),
                OrderLookup::ClientRef(_) => {
                    return Err(GatewayError::rejected(
                        RequestKind::CancelOrder,
                        format!("unknown order {lookup}"),
                    ));
                }
            },
        };

        let request = CancelOrder {
            order_id: order_id.clone(),
        };
        match self
            .executor
            .execute(request, self.config.timeouts.order)
            .await
        {
            Ok(_) => Ok(CancelOutcome::Requested { order_id }),
            Err(e) => {
                self.tracker.clear_cancel_request(&order_id);
                Err(e)
            }
        }
    }

    /// Tracked state of an order, querying the vendor if it is not tracked.
    ///
    /// # Errors
    ///
    /// Errors from [`refresh_order`](BrokerGateway::refresh_order).
    pub async fn get_order(&self, lookup: impl Into<OrderLookup>) -> Result<Order, GatewayError> {
        let lookup = lookup.into();
        if let Some(order) = self.tracker.status_of(&lookup) {
            return Ok(order);
        }
        self.refresh_order(lookup).await
    }

    /// Query the vendor for an order's state and fold it into the tracker.
    ///
    /// # Errors
    ///
    /// Any classified gateway error.
    pub async fn refresh_order(
        &self,
        lookup: impl Into<OrderLookup>,
    ) -> Result<Order, GatewayError> {
        let lookup = lookup.into();
        let report = self
            .executor
            .execute(
                OrderStatusQuery {
                    lookup: lookup.clone(),
                },
                self.config.timeouts.request,
            )
            .await?;

        let tracked = self
            .tracker
            .status_of(&lookup)
            .or_else(|| self.tracker.status_of(&OrderLookup::OrderId(report.order_id.clone())));
        Ok(tracked.unwrap_or_else(|| Order::from_report(&report)))
    }

    /// Snapshots of all non-terminal orders, oldest first.
    #[must_use]
    pub fn active_orders(&self) -> Vec<Order> {
        self.tracker.active_orders()
    }

    /// Run one reconciliation pass against the vendor's open orders now.
    ///
    /// # Errors
    ///
    /// Error of the open-order query.
    pub async fn reconcile_orders(&self) -> Result<ReconcileReport, GatewayError> {
        self.reconciler.reconcile_once().await
    }

    // =========================================================================
    // Connection and observability
    // =========================================================================

    /// Establish a session now (breaker-guarded, with backoff).
    ///
    /// # Errors
    ///
    /// Errors of [`GatewayConnection::ensure_connected`].
    pub async fn connect(&self) -> Result<(), GatewayError> {
        self.connection.ensure_connected().await
    }

    /// Release the session. The next request reconnects.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Connection status snapshot.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionSnapshot {
        self.connection.status()
    }

    /// Subscribe to connection events.
    #[must_use]
    pub fn subscribe_connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    /// Current breaker state.
    #[must_use]
    pub fn breaker_state(&self) -> CircuitBreakerState {
        self.breaker.state()
    }

    /// Breaker counters.
    #[must_use]
    pub fn breaker_metrics(&self) -> CircuitBreakerMetrics {
        self.breaker.metrics()
    }

    /// Request metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::ports::MockVendorClient;
    use crate::domain::{ClientRef, OrderSide};

    /// A vendor with no expectations: any call panics.
    fn untouched_gateway() -> BrokerGateway {
        BrokerGateway::new(GatewayConfig::default(), Arc::new(MockVendorClient::new()))
    }

    #[tokio::test]
    async fn invalid_order_is_rejected_locally() {
        let gateway = untouched_gateway();

        let err = gateway
            .place_order(OrderSpec::market("AAPL", OrderSide::Buy, dec!(0)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Rejected);
        assert_eq!(
            err.user_message(),
            "order rejected: quantity must be positive, got 0"
        );

        let err = gateway
            .place_order(OrderSpec::limit("  ", OrderSide::Sell, dec!(1), dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { .. }));
        assert!(gateway.active_orders().is_empty());
    }

    #[tokio::test]
    async fn blank_quote_symbol_is_rejected() {
        let gateway = untouched_gateway();
        let err = gateway.get_quote(" ").await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Rejected {
                kind: RequestKind::MarketQuote,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancel_of_unknown_client_ref_is_rejected() {
        let gateway = untouched_gateway();
        let err = gateway
            .cancel_order(ClientRef::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Rejected {
                kind: RequestKind::CancelOrder,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn lazy_start_does_not_connect() {
        let gateway = untouched_gateway();
        gateway.start().await.unwrap();
        gateway.start().await.unwrap();
        assert!(!gateway.connection_status().is_connected());
        assert_eq!(gateway.breaker_state(), CircuitBreakerState::Closed);
    }
}
