//! Broker Gateway Binary
//!
//! Runs the connection resilience layer over the simulated paper gateway and
//! serves health and metrics.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin broker-gateway
//! ```
//!
//! # Environment Variables
//!
//! - `GATEWAY_HOST` / `GATEWAY_PORT` / `GATEWAY_CLIENT_ID`: gateway endpoint
//!   (default: 127.0.0.1:4002, client 1)
//! - `GATEWAY_LAZY_CONNECT`: defer connecting until the first request (default: true)
//! - `GATEWAY_MAX_RECONNECT_ATTEMPTS`, `GATEWAY_BACKOFF_*`: reconnect schedule
//! - `GATEWAY_CIRCUIT_FAILURE_THRESHOLD`, `GATEWAY_CIRCUIT_COOLDOWN_MS`: breaker
//! - `GATEWAY_REQUEST_TIMEOUT_MS`, `GATEWAY_ORDER_TIMEOUT_MS`: deadlines
//! - `GATEWAY_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: cream-broker-gateway)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use broker_gateway::infrastructure::health::{HealthServer, HealthServerState};
use broker_gateway::infrastructure::telemetry;
use broker_gateway::{BrokerGateway, GatewayConfig, SimulatedVendor, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Broker Gateway");

    // Initialize Prometheus metrics
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus metrics unavailable");
    }

    let config = GatewayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let vendor = Arc::new(SimulatedVendor::new());
    let gateway = Arc::new(BrokerGateway::new(config.clone(), vendor));

    if let Err(e) = gateway.start().await {
        tracing::error!(
            error = %e,
            code = %e.code(),
            "Initial gateway connect failed, requests will retry on demand"
        );
    }

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&gateway),
    ));
    let health_server = HealthServer::new(
        config.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Broker gateway ready");

    await_shutdown(shutdown_token).await;

    let drain = async {
        gateway.shutdown().await;
        let _ = health_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Graceful shutdown timed out"
        );
    }

    tracing::info!("Broker gateway stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        endpoint = %config.gateway_endpoint(),
        lazy_connect = config.endpoint.lazy_connect,
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        reconnect_enabled = config.reconnect.enabled,
        max_reconnect_attempts = config.reconnect.max_attempts,
        backoff_base_ms = config.reconnect.base_delay.as_millis(),
        circuit_failure_threshold = config.circuit_breaker.failure_threshold,
        circuit_cooldown_ms = config.circuit_breaker.cooldown.as_millis(),
        request_timeout_ms = config.timeouts.request.as_millis(),
        order_timeout_ms = config.timeouts.order.as_millis(),
        "Resilience settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
