//! Order lifecycle as tracked by the gateway layer.
//!
//! # State Machine
//!
//! ```text
//! PENDING_SUBMIT → SUBMITTED → (PARTIALLY_FILLED)* → FILLED | CANCELLED | REJECTED
//! ```
//!
//! Status never moves backward and `filled_quantity` never decreases.
//! Terminal orders accept only re-deliveries of the same event, or a fill that
//! strictly advances `filled_quantity`.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::identifiers::{ClientRef, OrderId, Symbol};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order status in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created locally, not yet acknowledged by the vendor.
    PendingSubmit,
    /// Acknowledged by the vendor, working.
    Submitted,
    /// Some quantity filled.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancelled (vendor confirmed).
    Cancelled,
    /// Rejected by the vendor.
    Rejected,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    /// Returns true if the order is still working or awaiting acknowledgment.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Position in the forward-only lifecycle. Terminal states share a rank.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::PendingSubmit => 0,
            Self::Submitted => 1,
            Self::PartiallyFilled => 2,
            Self::Filled | Self::Cancelled | Self::Rejected => 3,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingSubmit => write!(f, "PENDING_SUBMIT"),
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            Self::Filled => write!(f, "FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Caller-supplied description of an order to place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Symbol to trade.
    pub symbol: Symbol,
    /// Order side.
    pub side: OrderSide,
    /// Quantity to trade.
    pub quantity: Decimal,
    /// Limit price; `None` for market orders.
    pub limit_price: Option<Decimal>,
}

impl OrderSpec {
    /// Create a market order spec.
    #[must_use]
    pub fn market(symbol: impl Into<Symbol>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            limit_price: None,
        }
    }

    /// Create a limit order spec.
    #[must_use]
    pub fn limit(
        symbol: impl Into<Symbol>,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            limit_price: Some(limit_price),
        }
    }

    /// Check the order before it is sent anywhere.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the order is malformed.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.is_empty() {
            return Err("symbol must not be empty".to_string());
        }
        if self.quantity <= Decimal::ZERO {
            return Err(format!("quantity must be positive, got {}", self.quantity));
        }
        if let Some(price) = self.limit_price
            && price <= Decimal::ZERO
        {
            return Err(format!("limit price must be positive, got {price}"));
        }
        Ok(())
    }
}

/// Lookup key for an order: vendor ID or local client reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderLookup {
    /// Vendor-assigned order ID.
    OrderId(OrderId),
    /// Local client reference.
    ClientRef(ClientRef),
}

impl fmt::Display for OrderLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrderId(id) => write!(f, "order_id={id}"),
            Self::ClientRef(r) => write!(f, "client_ref={r}"),
        }
    }
}

impl From<OrderId> for OrderLookup {
    fn from(value: OrderId) -> Self {
        Self::OrderId(value)
    }
}

impl From<ClientRef> for OrderLookup {
    fn from(value: ClientRef) -> Self {
        Self::ClientRef(value)
    }
}

/// Asynchronous order status event delivered by the vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Vendor order ID.
    pub order_id: OrderId,
    /// Client reference echoed back, when the vendor knows it.
    pub client_ref: Option<ClientRef>,
    /// Reported status.
    pub status: OrderStatus,
    /// Cumulative filled quantity as reported by the vendor.
    pub filled_quantity: Decimal,
    /// Size of the fill that triggered this event, if any.
    pub last_fill_quantity: Option<Decimal>,
    /// Rejection or cancellation reason.
    pub reason: Option<String>,
    /// Vendor event time.
    pub timestamp: DateTime<Utc>,
}

/// Full order state as reported by a vendor status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    /// Vendor order ID.
    pub order_id: OrderId,
    /// Client reference, when the vendor knows it.
    pub client_ref: Option<ClientRef>,
    /// Symbol.
    pub symbol: Symbol,
    /// Side.
    pub side: OrderSide,
    /// Total quantity.
    pub quantity: Decimal,
    /// Limit price.
    pub limit_price: Option<Decimal>,
    /// Current status.
    pub status: OrderStatus,
    /// Cumulative filled quantity.
    pub filled_quantity: Decimal,
    /// Rejection or cancellation reason.
    pub reason: Option<String>,
    /// Time of the last vendor-side change.
    pub timestamp: DateTime<Utc>,
}

impl OrderStatusReport {
    /// View this report as a status event.
    #[must_use]
    pub fn to_update(&self) -> OrderUpdate {
        OrderUpdate {
            order_id: self.order_id.clone(),
            client_ref: self.client_ref.clone(),
            status: self.status,
            filled_quantity: self.filled_quantity,
            last_fill_quantity: None,
            reason: self.reason.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Result of applying an event to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed.
    Applied {
        /// Status before the event.
        from: OrderStatus,
        /// Status after the event.
        to: OrderStatus,
    },
    /// Same state re-delivered; nothing changed.
    Duplicate,
    /// Event would move the order backward; ignored.
    Stale,
}

impl Transition {
    /// Returns true if the order changed.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Tracked order (subset of vendor truth).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Vendor order ID, once acknowledged.
    pub order_id: Option<OrderId>,
    /// Local client reference.
    pub client_ref: ClientRef,
    /// Symbol.
    pub symbol: Symbol,
    /// Side.
    pub side: OrderSide,
    /// Total quantity.
    pub quantity: Decimal,
    /// Limit price.
    pub limit_price: Option<Decimal>,
    /// Current status.
    pub status: OrderStatus,
    /// Cumulative filled quantity.
    pub filled_quantity: Decimal,
    /// A cancel has been sent and not yet confirmed.
    pub cancel_requested: bool,
    /// Rejection reason, if rejected.
    pub reject_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last state change.
    pub last_update_at: DateTime<Utc>,
}

impl Order {
    /// Create a locally submitted order awaiting acknowledgment.
    #[must_use]
    pub fn pending(client_ref: ClientRef, spec: OrderSpec, now: DateTime<Utc>) -> Self {
        Self {
            order_id: None,
            client_ref,
            symbol: spec.symbol,
            side: spec.side,
            quantity: spec.quantity,
            limit_price: spec.limit_price,
            status: OrderStatus::PendingSubmit,
            filled_quantity: Decimal::ZERO,
            cancel_requested: false,
            reject_reason: None,
            created_at: now,
            last_update_at: now,
        }
    }

    /// Rebuild an order from a vendor report (used when adopting orders the
    /// process did not submit, e.g. after a restart).
    #[must_use]
    pub fn from_report(report: &OrderStatusReport) -> Self {
        let client_ref = report
            .client_ref
            .clone()
            .unwrap_or_else(|| ClientRef::new(format!("vendor-{}", report.order_id)));
        let filled = report.filled_quantity.min(report.quantity).max(Decimal::ZERO);
        let status = if report.quantity > Decimal::ZERO && filled == report.quantity {
            OrderStatus::Filled
        } else {
            report.status
        };

        Self {
            order_id: Some(report.order_id.clone()),
            client_ref,
            symbol: report.symbol.clone(),
            side: report.side,
            quantity: report.quantity,
            limit_price: report.limit_price,
            status,
            filled_quantity: filled,
            cancel_requested: false,
            reject_reason: report.reason.clone().filter(|_| status == OrderStatus::Rejected),
            created_at: report.timestamp,
            last_update_at: report.timestamp,
        }
    }

    /// Quantity still open.
    #[must_use]
    pub fn remaining_quantity(&self) -> Decimal {
        (self.quantity - self.filled_quantity).max(Decimal::ZERO)
    }

    /// Returns true if the order is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark the order rejected before it was ever acknowledged.
    pub fn reject(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Transition {
        if self.status.is_terminal() {
            return if self.status == OrderStatus::Rejected {
                Transition::Duplicate
            } else {
                Transition::Stale
            };
        }
        let from = self.status;
        self.status = OrderStatus::Rejected;
        self.reject_reason = Some(reason.into());
        self.cancel_requested = false;
        self.last_update_at = now;
        Transition::Applied {
            from,
            to: OrderStatus::Rejected,
        }
    }

    /// Apply a vendor status event.
    pub fn apply(&mut self, update: &OrderUpdate) -> Transition {
        let from = self.status;
        let mut changed = false;

        if self.order_id.is_none() {
            self.order_id = Some(update.order_id.clone());
            changed = true;
        }

        if update.filled_quantity > self.quantity {
            tracing::warn!(
                order_id = %update.order_id,
                reported = %update.filled_quantity,
                quantity = %self.quantity,
                "Vendor reported fill above order quantity, clamping"
            );
        }
        let filled = update
            .filled_quantity
            .min(self.quantity)
            .max(self.filled_quantity);
        let advances_fill = filled > self.filled_quantity;

        if self.status.is_terminal() {
            // Only strictly-advancing fills are accepted after a terminal state.
            if !advances_fill {
                return if update.status == self.status && !changed {
                    Transition::Duplicate
                } else {
                    Transition::Stale
                };
            }
            self.filled_quantity = filled;
            if filled == self.quantity {
                self.status = OrderStatus::Filled;
            }
            self.last_update_at = update.timestamp;
            return Transition::Applied {
                from,
                to: self.status,
            };
        }

        let target = self.target_status(update.status, filled);
        let next = if target.rank() >= self.status.rank() {
            target
        } else {
            self.status
        };

        if next == self.status && !advances_fill && !changed {
            return if update.status == self.status {
                Transition::Duplicate
            } else {
                Transition::Stale
            };
        }

        self.filled_quantity = filled;
        self.status = next;
        self.last_update_at = update.timestamp;
        if next.is_terminal() {
            self.cancel_requested = false;
        }
        if next == OrderStatus::Rejected {
            self.reject_reason.clone_from(&update.reason);
        }

        Transition::Applied { from, to: next }
    }

    /// Status implied by a reported status and the (clamped) cumulative fill.
    fn target_status(&self, reported: OrderStatus, filled: Decimal) -> OrderStatus {
        if filled == self.quantity {
            return OrderStatus::Filled;
        }
        match reported {
            OrderStatus::Cancelled | OrderStatus::Rejected => reported,
            OrderStatus::Filled => {
                tracing::warn!(
                    client_ref = %self.client_ref,
                    filled = %filled,
                    quantity = %self.quantity,
                    "Vendor reported FILLED with open quantity"
                );
                if filled > Decimal::ZERO {
                    OrderStatus::PartiallyFilled
                } else {
                    // Nothing has filled; the vendor knows the order, no more.
                    self.status.max_rank(OrderStatus::Submitted)
                }
            }
            OrderStatus::PendingSubmit | OrderStatus::Submitted | OrderStatus::PartiallyFilled => {
                if filled > Decimal::ZERO {
                    OrderStatus::PartiallyFilled
                } else {
                    reported.max_rank(OrderStatus::Submitted)
                }
            }
        }
    }
}

impl OrderStatus {
    /// The later of two non-terminal statuses.
    const fn max_rank(self, other: Self) -> Self {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn order(quantity: Decimal) -> Order {
        Order::pending(
            ClientRef::new("c-1"),
            OrderSpec::limit("AAPL", OrderSide::Buy, quantity, dec!(150)),
            Utc::now(),
        )
    }

    fn update(status: OrderStatus, filled: Decimal) -> OrderUpdate {
        OrderUpdate {
            order_id: OrderId::new("SIM-1"),
            client_ref: Some(ClientRef::new("c-1")),
            status,
            filled_quantity: filled,
            last_fill_quantity: None,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn spec_validation() {
        assert!(OrderSpec::market("AAPL", OrderSide::Buy, dec!(10)).validate().is_ok());
        assert!(OrderSpec::market("", OrderSide::Buy, dec!(10)).validate().is_err());
        assert!(OrderSpec::market("AAPL", OrderSide::Buy, dec!(0)).validate().is_err());
        assert!(
            OrderSpec::limit("AAPL", OrderSide::Sell, dec!(1), dec!(-1))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn ack_moves_pending_to_submitted() {
        let mut o = order(dec!(10));
        let t = o.apply(&update(OrderStatus::Submitted, dec!(0)));
        assert_eq!(
            t,
            Transition::Applied {
                from: OrderStatus::PendingSubmit,
                to: OrderStatus::Submitted
            }
        );
        assert_eq!(o.order_id, Some(OrderId::new("SIM-1")));
    }

    #[test]
    fn partial_fills_accumulate_then_fill() {
        let mut o = order(dec!(10));
        o.apply(&update(OrderStatus::Submitted, dec!(0)));
        o.apply(&update(OrderStatus::PartiallyFilled, dec!(3)));
        o.apply(&update(OrderStatus::PartiallyFilled, dec!(7)));
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert_eq!(o.filled_quantity, dec!(7));

        o.apply(&update(OrderStatus::Filled, dec!(10)));
        assert_eq!(o.status, OrderStatus::Filled);
        assert_eq!(o.remaining_quantity(), dec!(0));
    }

    #[test]
    fn terminal_redelivery_is_duplicate() {
        let mut o = order(dec!(10));
        o.apply(&update(OrderStatus::Filled, dec!(10)));
        let snapshot = o.clone();
        assert_eq!(
            o.apply(&update(OrderStatus::Filled, dec!(10))),
            Transition::Duplicate
        );
        assert_eq!(o, snapshot);
    }

    #[test]
    fn stale_event_does_not_move_backward() {
        let mut o = order(dec!(10));
        o.apply(&update(OrderStatus::PartiallyFilled, dec!(5)));
        let t = o.apply(&update(OrderStatus::Submitted, dec!(2)));
        assert_eq!(t, Transition::Stale);
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert_eq!(o.filled_quantity, dec!(5));
    }

    #[test]
    fn late_fill_after_cancel_advances_quantity_only() {
        let mut o = order(dec!(10));
        o.apply(&update(OrderStatus::Cancelled, dec!(2)));
        assert_eq!(o.status, OrderStatus::Cancelled);

        let t = o.apply(&update(OrderStatus::PartiallyFilled, dec!(4)));
        assert!(t.is_applied());
        assert_eq!(o.status, OrderStatus::Cancelled);
        assert_eq!(o.filled_quantity, dec!(4));
    }

    #[test]
    fn fill_above_quantity_is_clamped() {
        let mut o = order(dec!(10));
        o.apply(&update(OrderStatus::Filled, dec!(12)));
        assert_eq!(o.filled_quantity, dec!(10));
        assert_eq!(o.status, OrderStatus::Filled);
    }

    #[test]
    fn filled_report_without_fills_keeps_working_status() {
        let mut o = order(dec!(10));
        o.apply(&update(OrderStatus::Filled, dec!(0)));
        assert_eq!(o.status, OrderStatus::Submitted);
        assert_eq!(o.order_id, Some(OrderId::new("SIM-1")));

        assert_eq!(
            o.apply(&update(OrderStatus::Filled, dec!(0))),
            Transition::Stale
        );
        assert_eq!(o.status, OrderStatus::Submitted);
        assert_eq!(o.filled_quantity, dec!(0));

        o.apply(&update(OrderStatus::Filled, dec!(4)));
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        assert_eq!(o.filled_quantity, dec!(4));
    }

    #[test_case(OrderStatus::Cancelled ; "cancel")]
    #[test_case(OrderStatus::Rejected ; "reject")]
    fn terminal_events_close_working_order(status: OrderStatus) {
        let mut o = order(dec!(10));
        o.apply(&update(OrderStatus::Submitted, dec!(0)));
        o.cancel_requested = true;
        o.apply(&update(status, dec!(0)));
        assert_eq!(o.status, status);
        assert!(!o.cancel_requested);
    }

    #[test]
    fn reject_before_ack() {
        let mut o = order(dec!(10));
        let t = o.reject("insufficient buying power", Utc::now());
        assert!(t.is_applied());
        assert_eq!(o.reject_reason.as_deref(), Some("insufficient buying power"));
        assert_eq!(o.reject("again", Utc::now()), Transition::Duplicate);
    }

    #[test]
    fn from_report_normalizes_fill() {
        let report = OrderStatusReport {
            order_id: OrderId::new("V-9"),
            client_ref: None,
            symbol: Symbol::new("msft"),
            side: OrderSide::Sell,
            quantity: dec!(5),
            limit_price: None,
            status: OrderStatus::PartiallyFilled,
            filled_quantity: dec!(5),
            reason: None,
            timestamp: Utc::now(),
        };
        let o = Order::from_report(&report);
        assert_eq!(o.status, OrderStatus::Filled);
        assert_eq!(o.client_ref.as_str(), "vendor-V-9");
    }

    proptest::proptest! {
        #[test]
        fn status_and_fill_are_monotonic(
            events in proptest::collection::vec((0u8..5, 0u32..=12), 1..40)
        ) {
            let mut o = order(dec!(10));
            let mut prev_rank = o.status.rank();
            let mut prev_filled = o.filled_quantity;
            for (s, filled) in events {
                let status = match s {
                    0 => OrderStatus::Submitted,
                    1 => OrderStatus::PartiallyFilled,
                    2 => OrderStatus::Filled,
                    3 => OrderStatus::Cancelled,
                    _ => OrderStatus::Rejected,
                };
                o.apply(&update(status, Decimal::from(filled)));
                proptest::prop_assert!(o.status.rank() >= prev_rank);
                proptest::prop_assert!(o.filled_quantity >= prev_filled);
                proptest::prop_assert!(o.filled_quantity <= o.quantity);
                proptest::prop_assert_eq!(
                    o.status == OrderStatus::Filled,
                    o.filled_quantity == o.quantity
                );
                prev_rank = o.status.rank();
                prev_filled = o.filled_quantity;
            }
        }
    }
}
