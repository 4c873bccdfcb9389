//! Order reconciliation on (re)connect.
//!
//! Events sent while a session was down are lost, so each new session starts
//! by pulling the vendor's open order list. Locally active orders the vendor
//! no longer lists are queried one by one; replies flow through the
//! dispatcher into the tracker like any other reply.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::executor::RequestExecutor;
use super::pending::PendingRequests;
use super::requests::{OpenOrdersQuery, OrderStatusQuery};
use crate::application::services::OrderTracker;
use crate::domain::{ConnectionEvent, OrderLookup, OrderStatus};
use crate::error::GatewayError;
use crate::infrastructure::metrics;

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Orders the vendor listed as open.
    pub open_orders: usize,
    /// Missing orders successfully queried.
    pub refreshed: usize,
    /// Unacknowledged orders the vendor never received.
    pub rejected: usize,
    /// Missing orders whose status query failed.
    pub failed: usize,
}

/// Re-syncs the order tracker with the vendor after every connect.
#[derive(Debug, Clone)]
pub struct OrderReconciler {
    executor: RequestExecutor,
    tracker: Arc<OrderTracker>,
    pending: Arc<PendingRequests>,
    timeout: Duration,
}

impl OrderReconciler {
    /// Create a reconciler issuing queries with `timeout`.
    #[must_use]
    pub const fn new(
        executor: RequestExecutor,
        tracker: Arc<OrderTracker>,
        pending: Arc<PendingRequests>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            tracker,
            pending,
            timeout,
        }
    }

    /// Reconcile on every `Connected` event until `cancel` fires.
    pub fn spawn(
        self,
        mut events: broadcast::Receiver<ConnectionEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(ConnectionEvent::Connected { session_id }) => {
                        match self.reconcile_once().await {
                            Ok(report) => tracing::info!(
                                session_id,
                                open_orders = report.open_orders,
                                refreshed = report.refreshed,
                                rejected = report.rejected,
                                failed = report.failed,
                                "Orders reconciled"
                            ),
                            Err(e) => tracing::warn!(
                                session_id,
                                error = %e,
                                "Order reconciliation failed"
                            ),
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Reconciler lagged behind connection events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Order reconciler stopped");
        })
    }

    /// Run one reconciliation pass.
    ///
    /// # Errors
    ///
    /// Returns the error of the open-order query. Failures of individual
    /// status queries are counted in the report instead.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, GatewayError> {
        // The reply is applied to the tracker by the dispatcher.
        let open = self.executor.execute(OpenOrdersQuery, self.timeout).await?;
        let mut report = ReconcileReport {
            open_orders: open.len(),
            ..ReconcileReport::default()
        };

        for lookup in self.tracker.missing_from(&open) {
            if let OrderLookup::ClientRef(client_ref) = &lookup
                && self.pending.has_order_in_flight(client_ref)
            {
                continue;
            }

            let query = OrderStatusQuery {
                lookup: lookup.clone(),
            };
            match self.executor.execute(query, self.timeout).await {
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    // Unacknowledged and unknown to the vendor: it never arrived.
                    if let (GatewayError::Rejected { .. }, OrderLookup::ClientRef(client_ref)) =
                        (&e, &lookup)
                        && !self.pending.has_order_in_flight(client_ref)
                        && self.tracker.mark_rejected(client_ref, "not received by vendor")
                    {
                        metrics::record_order_transition(OrderStatus::Rejected);
                        report.rejected += 1;
                        continue;
                    }
                    tracing::warn!(lookup = %lookup, error = %e, "Order status refresh failed");
                    report.failed += 1;
                }
            }
        }
        metrics::set_active_orders(self.tracker.active_count());
        Ok(report)
    }
}
