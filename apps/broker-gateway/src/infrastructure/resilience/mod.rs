//! Resilience primitives: circuit breaker and reconnect backoff.

pub mod circuit_breaker;
pub mod reconnect;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerState,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
