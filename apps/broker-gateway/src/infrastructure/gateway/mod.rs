//! Gateway Connection Layer
//!
//! The session to the brokerage gateway and everything that runs over it.
//!
//! ```text
//! BrokerGateway ──► RequestExecutor ──► GatewayConnection ──► VendorClient
//!                         │                    │
//!                         ▼                    ▼ (one listener per session)
//!                  PendingRequests ◄──── EventDispatcher ────► OrderTracker
//! ```
//!
//! - `connection`: session lifecycle, breaker-guarded connects, reconnect
//! - `dispatcher`: per-session listener fanning vendor events out
//! - `pending`: correlation table of in-flight requests
//! - `executor`: correlated, timed, breaker-guarded execution
//! - `requests`: typed operations
//! - `reconciler`: order re-sync on every connect
//! - `facade`: the `BrokerGateway` handle

pub mod connection;
pub mod dispatcher;
pub mod executor;
pub mod facade;
pub mod pending;
pub mod reconciler;
pub mod requests;

pub use connection::GatewayConnection;
pub use dispatcher::{EventDispatcher, SessionEnd};
pub use executor::RequestExecutor;
pub use facade::{BrokerGateway, CancelOutcome};
pub use pending::{PendingGuard, PendingRequests, PendingResult};
pub use reconciler::{OrderReconciler, ReconcileReport};
pub use requests::{
    AccountQuery, CancelOrder, GatewayRequest, MarketQuote, OpenOrdersQuery, OrderStatusQuery,
    PlaceOrder, PositionsQuery,
};
