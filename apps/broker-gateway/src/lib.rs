#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::default_trait_access
    )
)]

//! Broker Gateway - Connection Resilience Layer
//!
//! Owns the single persistent session to a brokerage trading gateway and
//! shields the rest of the trading system from its failures.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Orders, identifiers, market snapshots, connection state
//!
//! - **Application**: Port definitions and services
//!   - `ports`: the `VendorClient` session port
//!   - `services`: `OrderTracker`, the in-memory order view
//!
//! - **Infrastructure**: Adapters and runtime machinery
//!   - `gateway`: connection lifecycle, correlated execution, reconciliation
//!   - `resilience`: circuit breaker and reconnect backoff
//!   - `vendor`: simulated gateway
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Request Flow
//!
//! ```text
//! caller ──► BrokerGateway ──► ensure_connected ──► breaker ──► send
//!                 ▲                                               │
//!                 │           PendingRequests ◄── listener ◄──────┘
//!                 └──── typed result / GatewayError ◄──┘
//!
//! Handshakes inside `ensure_connected` are breaker-guarded too; the breaker
//! check that follows admits the request itself.
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Orders, requests and connection state.
pub mod domain;

/// Application layer - Port definitions and services.
pub mod application;

/// Infrastructure layer - Adapters and runtime machinery.
pub mod infrastructure;

/// Classified gateway errors.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::{
    AccountSummary, ClientRef, ConnectionEvent, ConnectionSnapshot, ConnectionStatus,
    CorrelationId, Order, OrderId, OrderLookup, OrderSide, OrderSpec, OrderStatus,
    OrderStatusReport, OrderUpdate, Position, Quote, RequestKind, Symbol,
};

// Errors
pub use error::{ErrorCode, ErrorResponse, GatewayError};

// Ports and services
pub use application::ports::{
    GatewayEndpoint, VendorClient, VendorError, VendorEvent, VendorRequest, VendorResponse,
};
pub use application::services::{OrderTracker, OrderTrackerConfig};

// Gateway
pub use infrastructure::gateway::{BrokerGateway, CancelOutcome, ReconcileReport};

// Resilience
pub use infrastructure::resilience::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerState,
    ReconnectConfig, ReconnectPolicy,
};

// Configuration
pub use infrastructure::config::{ConfigError, EndpointSettings, GatewayConfig, TimeoutSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::{MetricsSnapshot, init_metrics};

// Simulated vendor (binary and integration tests)
pub use infrastructure::vendor::SimulatedVendor;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
