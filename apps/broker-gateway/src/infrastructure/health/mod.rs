//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, gateway status reporting, and Prometheus
//! metrics. Used by container orchestrators and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (gateway session up, breaker not open)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::{ConnectionSnapshot, ConnectionStatus};
use crate::infrastructure::gateway::BrokerGateway;
use crate::infrastructure::metrics::{MetricsSnapshot, get_metrics_handle};
use crate::infrastructure::resilience::{CircuitBreakerMetrics, CircuitBreakerState};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Gateway session status.
    pub connection: ConnectionSnapshot,
    /// Circuit breaker counters.
    pub circuit_breaker: CircuitBreakerMetrics,
    /// Non-terminal orders tracked.
    pub active_orders: usize,
    /// Request metrics.
    pub requests: MetricsSnapshot,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Session up, breaker closed.
    Healthy,
    /// Reconnecting, not yet connected, or breaker probing.
    Degraded,
    /// Breaker open: gateway calls are suspended.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    gateway: Arc<BrokerGateway>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, gateway: Arc<BrokerGateway>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            gateway,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
#[must_use]
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let connection = state.gateway.connection_status();
    let breaker = state.gateway.breaker_state();

    if is_ready(connection.status, breaker) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connection = state.gateway.connection_status();
    let circuit_breaker = state.gateway.breaker_metrics();
    let status = determine_health_status(connection.status, circuit_breaker.state);

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connection,
        circuit_breaker,
        active_orders: state.gateway.active_orders().len(),
        requests: state.gateway.metrics(),
    }
}

fn determine_health_status(
    connection: ConnectionStatus,
    breaker: CircuitBreakerState,
) -> HealthStatus {
    match (connection, breaker) {
        (_, CircuitBreakerState::Open) => HealthStatus::Unhealthy,
        (ConnectionStatus::Connected, CircuitBreakerState::Closed) => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

fn is_ready(connection: ConnectionStatus, breaker: CircuitBreakerState) -> bool {
    connection == ConnectionStatus::Connected && breaker != CircuitBreakerState::Open
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test_case(ConnectionStatus::Connected, CircuitBreakerState::Closed, HealthStatus::Healthy ; "connected and closed")]
    #[test_case(ConnectionStatus::Connected, CircuitBreakerState::HalfOpen, HealthStatus::Degraded ; "probing")]
    #[test_case(ConnectionStatus::Reconnecting, CircuitBreakerState::Closed, HealthStatus::Degraded ; "reconnecting")]
    #[test_case(ConnectionStatus::Disconnected, CircuitBreakerState::Closed, HealthStatus::Degraded ; "lazy not yet connected")]
    #[test_case(ConnectionStatus::Connected, CircuitBreakerState::Open, HealthStatus::Unhealthy ; "breaker open")]
    fn health_status(
        connection: ConnectionStatus,
        breaker: CircuitBreakerState,
        expected: HealthStatus,
    ) {
        assert_eq!(determine_health_status(connection, breaker), expected);
    }

    #[test]
    fn readiness_needs_session_and_usable_breaker() {
        assert!(is_ready(ConnectionStatus::Connected, CircuitBreakerState::Closed));
        assert!(is_ready(ConnectionStatus::Connected, CircuitBreakerState::HalfOpen));
        assert!(!is_ready(ConnectionStatus::Connected, CircuitBreakerState::Open));
        assert!(!is_ready(ConnectionStatus::Reconnecting, CircuitBreakerState::Closed));
    }
}
