//! Account, position and quote snapshots returned by read-only queries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::identifiers::Symbol;

/// Account summary as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Vendor account identifier.
    pub account_id: String,
    /// Net liquidation value.
    pub net_liquidation: Decimal,
    /// Buying power.
    pub buying_power: Decimal,
    /// Settled cash.
    pub cash: Decimal,
    /// Base currency.
    pub currency: String,
}

/// An open position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Symbol held.
    pub symbol: Symbol,
    /// Signed quantity (negative for short).
    pub quantity: Decimal,
    /// Average cost per unit.
    pub average_cost: Decimal,
    /// Current market value.
    pub market_value: Decimal,
}

impl Position {
    /// Returns true for a short position.
    #[must_use]
    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }
}

/// Top-of-book quote snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Symbol quoted.
    pub symbol: Symbol,
    /// Best bid.
    pub bid: Decimal,
    /// Best ask.
    pub ask: Decimal,
    /// Last trade price.
    pub last: Decimal,
    /// Quote time.
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Mid price.
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Bid/ask spread.
    #[must_use]
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quote_mid_and_spread() {
        let quote = Quote {
            symbol: Symbol::new("AAPL"),
            bid: dec!(100.00),
            ask: dec!(100.10),
            last: dec!(100.05),
            timestamp: Utc::now(),
        };
        assert_eq!(quote.mid(), dec!(100.05));
        assert_eq!(quote.spread(), dec!(0.10));
    }

    #[test]
    fn short_position() {
        let position = Position {
            symbol: Symbol::new("TSLA"),
            quantity: dec!(-5),
            average_cost: dec!(200),
            market_value: dec!(-1000),
        };
        assert!(position.is_short());
    }
}
