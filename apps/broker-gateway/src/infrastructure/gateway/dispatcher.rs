//! Session event listener.
//!
//! One dispatcher task runs per session. It is the only consumer of the
//! vendor event stream and never awaits anything but the stream itself, so a
//! slow caller can never stall other requests.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::pending::PendingRequests;
use crate::application::ports::{VendorEvent, VendorResponse};
use crate::application::services::{ApplyOutcome, OrderTracker};
use crate::domain::{CorrelationId, OrderStatus, OrderUpdate, RequestKind};
use crate::error::GatewayError;
use crate::infrastructure::metrics::{self, MetricsRecorder};

/// Why a session's listener stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The session was released on request.
    Released,
    /// The session dropped unexpectedly.
    Lost {
        /// Reason reported by the vendor, or stream closure.
        reason: String,
    },
}

/// Fans vendor events out to pending requests and the order tracker.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    pending: Arc<PendingRequests>,
    tracker: Arc<OrderTracker>,
    metrics: Arc<MetricsRecorder>,
}

impl EventDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub const fn new(
        pending: Arc<PendingRequests>,
        tracker: Arc<OrderTracker>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            pending,
            tracker,
            metrics,
        }
    }

    /// Consume `events` until the session ends or `cancel` fires.
    ///
    /// On cancellation, events already buffered are still processed so no
    /// delivered reply is lost.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<VendorEvent>,
        cancel: CancellationToken,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    events.close();
                    while let Ok(event) = events.try_recv() {
                        let _ = self.handle(event);
                    }
                    return SessionEnd::Released;
                }

                event = events.recv() => match event {
                    Some(event) => {
                        if let Some(end) = self.handle(event) {
                            return end;
                        }
                    }
                    None => {
                        return SessionEnd::Lost {
                            reason: "vendor event stream closed".to_string(),
                        };
                    }
                },
            }
        }
    }

    /// Handle one event. Returns `Some` when the event ends the session.
    pub fn handle(&self, event: VendorEvent) -> Option<SessionEnd> {
        match event {
            VendorEvent::Response {
                correlation_id,
                response,
            } => self.on_response(correlation_id, response),
            VendorEvent::Error {
                correlation_id: Some(correlation_id),
                code,
                message,
            } => self.on_request_error(correlation_id, code, message),
            VendorEvent::Error {
                correlation_id: None,
                code,
                message,
            } => {
                tracing::warn!(code, message = %message, "Vendor error");
            }
            VendorEvent::OrderStatus(update) => self.apply_order_update(&update),
            VendorEvent::ConnectionLost { reason } => {
                tracing::warn!(reason = %reason, "Vendor reported connection lost");
                return Some(SessionEnd::Lost { reason });
            }
        }
        None
    }

    fn on_response(&self, correlation_id: CorrelationId, response: VendorResponse) {
        let Some(entry) = self.pending.take(correlation_id) else {
            self.discard_late(correlation_id, response.name());
            return;
        };

        // Order state is updated before the caller is released, so a caller
        // reading the tracker right after `execute` returns sees the reply.
        match &response {
            VendorResponse::OrderAck(update) => self.apply_order_update(update),
            VendorResponse::OrderStatus(report) => {
                self.tracker.reconcile(std::slice::from_ref(report));
            }
            VendorResponse::OpenOrders(reports) => {
                let summary = self.tracker.reconcile(reports);
                tracing::debug!(
                    updated = summary.updated,
                    adopted = summary.adopted,
                    unchanged = summary.unchanged,
                    "Open orders reconciled"
                );
            }
            VendorResponse::CancelAck { order_id } => {
                tracing::debug!(order_id = %order_id, "Cancel accepted by vendor");
            }
            VendorResponse::Account(_) | VendorResponse::Positions(_) | VendorResponse::Quote(_) => {}
        }
        metrics::set_active_orders(self.tracker.active_count());

        let kind = entry.kind;
        if !entry.resolve(Ok(response)) {
            tracing::debug!(correlation_id = %correlation_id, kind = %kind, "Caller gone before reply");
        }
    }

    fn on_request_error(&self, correlation_id: CorrelationId, code: i32, message: String) {
        let Some(entry) = self.pending.take(correlation_id) else {
            self.discard_late(correlation_id, "error");
            return;
        };

        tracing::warn!(
            correlation_id = %correlation_id,
            kind = %entry.kind,
            code,
            message = %message,
            "Vendor rejected request"
        );

        if entry.kind == RequestKind::PlaceOrder
            && let Some(client_ref) = &entry.client_ref
            && self.tracker.mark_rejected(client_ref, &message)
        {
            metrics::record_order_transition(OrderStatus::Rejected);
            metrics::set_active_orders(self.tracker.active_count());
        }

        let kind = entry.kind;
        entry.resolve(Err(GatewayError::Rejected {
            kind,
            code: Some(code),
            reason: message,
        }));
    }

    fn apply_order_update(&self, update: &OrderUpdate) {
        if let ApplyOutcome::Applied { to, .. } = self.tracker.apply(update) {
            metrics::record_order_transition(to);
            metrics::set_active_orders(self.tracker.active_count());
        }
    }

    fn discard_late(&self, correlation_id: CorrelationId, what: &'static str) {
        self.metrics.record_late_response();
        tracing::debug!(
            correlation_id = %correlation_id,
            response = what,
            "Discarding reply for evicted request"
        );
    }
}
