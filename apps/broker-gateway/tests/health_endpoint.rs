//! Health Endpoint Integration Tests
//!
//! Exercises the health router in-process with `tower::ServiceExt::oneshot`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use broker_gateway::infrastructure::health::router;
use broker_gateway::{
    BrokerGateway, GatewayConfig, HealthServerState, SimulatedVendor, VendorClient,
};

fn setup(config: GatewayConfig) -> (Arc<SimulatedVendor>, Arc<BrokerGateway>, axum::Router) {
    let vendor = Arc::new(SimulatedVendor::new());
    let client: Arc<dyn VendorClient> = vendor.clone();
    let gateway = Arc::new(BrokerGateway::new(config, client));
    let state = Arc::new(HealthServerState::new(
        "test-0.0.1".to_string(),
        Arc::clone(&gateway),
    ));
    (vendor, gateway, router(state))
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn liveness_is_always_ok() {
    let (_vendor, _gateway, app) = setup(GatewayConfig::default());
    let (status, body) = get(&app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn readiness_follows_the_session() {
    let (_vendor, gateway, app) = setup(GatewayConfig::default());

    let (status, _) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    gateway.connect().await.unwrap();
    let (status, body) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"READY");

    gateway.shutdown().await;
}

#[tokio::test]
async fn health_reports_gateway_state() {
    let (_vendor, gateway, app) = setup(GatewayConfig::default());

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["version"], "test-0.0.1");
    assert_eq!(json["connection"]["status"], "DISCONNECTED");

    gateway.get_account().await.unwrap();
    let (_, body) = get(&app, "/health").await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["connection"]["status"], "CONNECTED");
    assert_eq!(json["requests"]["successful_requests"], 1);
    assert_eq!(json["active_orders"], 0);

    gateway.shutdown().await;
}

#[tokio::test]
async fn open_breaker_is_unhealthy() {
    let mut config = GatewayConfig::default();
    config.circuit_breaker.failure_threshold = 1;
    config.reconnect.enabled = false;
    let (vendor, gateway, app) = setup(config);
    vendor.set_refuse_connections(true);

    gateway.connect().await.unwrap_err();

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["circuit_breaker"]["state"], "OPEN");

    let (status, _) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    gateway.shutdown().await;
}
