//! Health check handlers for queue workers.
//!
//! This module provides reusable Axum handlers for:
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`)
//! - Declared broker topology (`/topology`)
//! - Prometheus metrics (`/metrics`)

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::broker::MessageBroker;
use crate::metrics;
use crate::topology::Topology;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Broker whose connection decides readiness.
    pub broker: Arc<dyn MessageBroker>,
    /// Application name.
    pub app_name: String,
    /// Application version.
    pub app_version: String,
    /// Everything the application declared at startup.
    pub topology: Arc<Topology>,
}

impl HealthState {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        topology: Topology,
    ) -> Self {
        Self {
            broker,
            app_name: app_name.into(),
            app_version: app_version.into(),
            topology: Arc::new(topology),
        }
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status (always "healthy" if responding).
    pub status: String,
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
}

/// Liveness probe handler.
///
/// Always returns OK if the server is running.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe handler.
///
/// Ready while the broker connection is open.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let broker = state.broker.name();

    if state.broker.is_connected() {
        Ok((
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": {
                    "broker": "ok",
                    "broker_kind": broker
                }
            })),
        ))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": {
                    "broker": "disconnected",
                    "broker_kind": broker
                }
            })),
        ))
    }
}

/// Exchanges, queues and bindings declared at startup.
pub async fn topology_handler(State(state): State<HealthState>) -> Json<Topology> {
    Json((*state.topology).clone())
}

/// Prometheus metrics endpoint handler.
///
/// Returns metrics in Prometheus text format for scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Create a standard health router.
///
/// - `/health`, `/healthz` - Liveness probe
/// - `/ready`, `/readyz` - Readiness probe
/// - `/topology` - Declared exchanges, queues and bindings
/// - `/metrics` - Prometheus metrics
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/topology", get(topology_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
