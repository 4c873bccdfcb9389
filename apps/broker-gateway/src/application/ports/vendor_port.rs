//! Vendor Port (Driven Port)
//!
//! Interface to the brokerage SDK. The wire protocol is opaque: a session is
//! opened with `connect`, outbound requests are written with `send`, and
//! everything the vendor says comes back on the session's event receiver.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{
    AccountSummary, ClientRef, CorrelationId, OrderId, OrderLookup, OrderSpec, OrderStatusReport,
    OrderUpdate, Position, Quote, RequestKind, Symbol,
};

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Client identifier presented at handshake.
    pub client_id: u32,
    /// Handshake timeout.
    pub connect_timeout: Duration,
}

impl std::fmt::Display for GatewayEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} (client {})", self.host, self.port, self.client_id)
    }
}

/// Typed outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorRequest {
    /// Account summary.
    AccountSummary,
    /// Open positions.
    Positions,
    /// Place an order.
    PlaceOrder {
        /// Local reference the vendor echoes back.
        client_ref: ClientRef,
        /// What to trade.
        spec: OrderSpec,
    },
    /// Cancel an order.
    CancelOrder {
        /// Vendor order ID.
        order_id: OrderId,
    },
    /// Full status of one order.
    OrderStatus {
        /// Order to look up.
        lookup: OrderLookup,
    },
    /// Quote snapshot.
    MarketQuote {
        /// Symbol to quote.
        symbol: Symbol,
    },
    /// All orders the vendor considers open.
    OpenOrders,
}

impl VendorRequest {
    /// Operation kind of this request.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::AccountSummary => RequestKind::AccountQuery,
            Self::Positions => RequestKind::PositionsQuery,
            Self::PlaceOrder { .. } => RequestKind::PlaceOrder,
            Self::CancelOrder { .. } => RequestKind::CancelOrder,
            Self::OrderStatus { .. } => RequestKind::OrderStatus,
            Self::MarketQuote { .. } => RequestKind::MarketQuote,
            Self::OpenOrders => RequestKind::OpenOrders,
        }
    }
}

/// Correlated vendor reply payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorResponse {
    /// Account summary.
    Account(AccountSummary),
    /// Open positions.
    Positions(Vec<Position>),
    /// Order accepted; carries the vendor order ID.
    OrderAck(OrderUpdate),
    /// Cancel request accepted (not yet confirmed).
    CancelAck {
        /// Order the cancel was accepted for.
        order_id: OrderId,
    },
    /// Single order status.
    OrderStatus(OrderStatusReport),
    /// Quote snapshot.
    Quote(Quote),
    /// Open order list.
    OpenOrders(Vec<OrderStatusReport>),
}

impl VendorResponse {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Account(_) => "account",
            Self::Positions(_) => "positions",
            Self::OrderAck(_) => "order_ack",
            Self::CancelAck { .. } => "cancel_ack",
            Self::OrderStatus(_) => "order_status",
            Self::Quote(_) => "quote",
            Self::OpenOrders(_) => "open_orders",
        }
    }
}

/// Event delivered on a session's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorEvent {
    /// Reply to a request.
    Response {
        /// Correlation id the request was sent with.
        correlation_id: CorrelationId,
        /// Reply payload.
        response: VendorResponse,
    },
    /// Vendor error, correlated or not.
    Error {
        /// Correlation id, when the error concerns a request.
        correlation_id: Option<CorrelationId>,
        /// Vendor error code.
        code: i32,
        /// Vendor message.
        message: String,
    },
    /// Unsolicited order status change.
    OrderStatus(OrderUpdate),
    /// Vendor reports the session is gone.
    ConnectionLost {
        /// Reason given by the vendor.
        reason: String,
    },
}

/// Vendor port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VendorError {
    /// Gateway refused or could not be reached.
    #[error("Connection refused by {endpoint}: {message}")]
    ConnectionRefused {
        /// Endpoint attempted.
        endpoint: String,
        /// Error details.
        message: String,
    },

    /// No session is open.
    #[error("Vendor session not connected")]
    NotConnected,

    /// Write to the session failed.
    #[error("Vendor transport error: {message}")]
    Transport {
        /// Error details.
        message: String,
    },

    /// Vendor sent something unintelligible.
    #[error("Vendor protocol error: {message}")]
    Protocol {
        /// Error details.
        message: String,
    },
}

/// Port for the brokerage SDK session.
///
/// One session at a time. `connect` returns the receiving end of the
/// session's event stream; the stream ends when the session does.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VendorClient: Send + Sync {
    /// Open a session.
    async fn connect(
        &self,
        endpoint: &GatewayEndpoint,
    ) -> Result<mpsc::Receiver<VendorEvent>, VendorError>;

    /// Close the session, if any. Idempotent.
    async fn disconnect(&self);

    /// Returns true while a session is open.
    fn is_connected(&self) -> bool;

    /// Write one request to the session.
    async fn send(
        &self,
        correlation_id: CorrelationId,
        request: VendorRequest,
    ) -> Result<(), VendorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::domain::OrderSide;

    #[test]
    fn request_kinds() {
        let place = VendorRequest::PlaceOrder {
            client_ref: ClientRef::new("c-1"),
            spec: OrderSpec::market("AAPL", OrderSide::Buy, dec!(1)),
        };
        assert_eq!(place.kind(), RequestKind::PlaceOrder);
        assert_eq!(VendorRequest::OpenOrders.kind(), RequestKind::OpenOrders);
        assert_eq!(
            VendorRequest::MarketQuote {
                symbol: Symbol::new("SPY")
            }
            .kind(),
            RequestKind::MarketQuote
        );
    }

    #[test]
    fn endpoint_display() {
        let endpoint = GatewayEndpoint {
            host: "127.0.0.1".to_string(),
            port: 4002,
            client_id: 7,
            connect_timeout: Duration::from_secs(5),
        };
        assert_eq!(endpoint.to_string(), "127.0.0.1:4002 (client 7)");
    }
}
