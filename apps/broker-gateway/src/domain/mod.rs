//! Domain Layer - Orders, requests and connection state.
//!
//! Pure types with serialization support. Nothing here performs I/O.

/// Connection status and events.
pub mod connection;

/// Strongly-typed identifiers.
pub mod identifiers;

/// Account, position and quote snapshots.
pub mod market;

/// Order lifecycle and vendor order events.
pub mod order;

/// Request kinds and correlation identifiers.
pub mod request;

pub use connection::{ConnectionEvent, ConnectionSnapshot, ConnectionStatus};
pub use identifiers::{ClientRef, OrderId, Symbol};
pub use market::{AccountSummary, Position, Quote};
pub use order::{
    Order, OrderLookup, OrderSide, OrderSpec, OrderStatus, OrderStatusReport, OrderUpdate,
    Transition,
};
pub use request::{CorrelationId, RequestKind};
