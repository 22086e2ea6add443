//! HTTP server for health, status and metrics endpoints
//!
//! - GET /health, /status - relay status (JSON)
//! - GET /healthz - liveness
//! - GET /readyz - ready once running and one poll succeeded
//! - GET /metrics - Prometheus metrics

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics::Metrics;
use crate::orchestrator::{RelayState, SharedStatus};

/// Combined app state
#[derive(Clone)]
pub struct AppState {
    pub status: SharedStatus,
    pub metrics: Arc<Metrics>,
    pub source_chain: String,
    pub destination_chain: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub state: RelayState,
    pub source_chain: String,
    pub destination_chain: String,
    pub last_processed_block: u64,
    pub chain_head: Option<u64>,
    pub queue_depth: usize,
    pub registered_nonces: usize,
    pub successful_polls: u64,
    pub consecutive_failures: u32,
    pub mints_confirmed: u64,
    pub dead_letters: u64,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.status.read().await;
    let label = if status.consecutive_failures > 0 {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: label.to_string(),
        state: status.state,
        source_chain: state.source_chain.clone(),
        destination_chain: state.destination_chain.clone(),
        last_processed_block: status.last_processed_block,
        chain_head: status.chain_head,
        queue_depth: status.queue_depth,
        registered_nonces: status.registered_nonces,
        successful_polls: status.successful_polls,
        consecutive_failures: status.consecutive_failures,
        mints_confirmed: state.metrics.mints_confirmed_total.get(),
        dead_letters: state.metrics.dead_letters_total.get(),
    })
}

/// Liveness check (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Readiness check
async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let status = state.status.read().await;
    if status.state == RelayState::Running && status.successful_polls > 0 {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
    }
}

async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

/// Start the HTTP server; returns once `shutdown` is cancelled
pub async fn start_server(
    bind_address: &str,
    port: u16,
    state: AppState,
    shutdown: CancellationToken,
) -> eyre::Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .map_err(|e| eyre!("Invalid bind address {}:{}: {}", bind_address, port, e))?;
    info!("Health server listening on {}", addr);
    info!("  /health  - Full relay status (JSON)");
    info!("  /metrics - Prometheus metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
