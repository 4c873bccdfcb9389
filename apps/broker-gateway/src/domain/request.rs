//! Request kinds and correlation identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Token linking an outbound gateway request to its asynchronous response.
///
/// Allocated from a process-wide monotonic counter, so it is unique per
/// outstanding request for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Wrap a raw correlation value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of operation issued against the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    /// Account summary query.
    AccountQuery,
    /// Open positions query.
    PositionsQuery,
    /// Order placement.
    PlaceOrder,
    /// Order cancellation.
    CancelOrder,
    /// Single order status query.
    OrderStatus,
    /// Market quote snapshot.
    MarketQuote,
    /// Vendor's list of open orders (used for reconciliation).
    OpenOrders,
}

impl RequestKind {
    /// Returns true if the operation may change state on the vendor side.
    ///
    /// Mutating operations are never retried automatically.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        matches!(self, Self::PlaceOrder | Self::CancelOrder)
    }

    /// Metric/log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccountQuery => "account_query",
            Self::PositionsQuery => "positions_query",
            Self::PlaceOrder => "place_order",
            Self::CancelOrder => "cancel_order",
            Self::OrderStatus => "order_status",
            Self::MarketQuote => "market_quote",
            Self::OpenOrders => "open_orders",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
