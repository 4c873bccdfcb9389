//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the gateway session machinery and the concrete
//! implementations of the port interfaces defined in the application layer.

/// Configuration loaded from the environment.
pub mod config;

/// Gateway session, request execution and the `BrokerGateway` handle.
pub mod gateway;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Circuit breaker and reconnect backoff.
pub mod resilience;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Vendor client adapters.
pub mod vendor;
