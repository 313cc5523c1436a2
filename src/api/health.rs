//! Health check and statistics endpoints.

use std::time::{Duration, Instant};

use axum::{extract::State, Json};
use serde::Serialize;

use crate::connection_manager::BackendStats;
use crate::error::Result;
use crate::pool::{BackendKind, PoolStatus};
use crate::resilience::CircuitState;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub pools: Vec<PoolStatus>,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub backends: Vec<BackendReadiness>,
}

#[derive(Debug, Serialize)]
pub struct BackendReadiness {
    pub backend: BackendKind,
    pub session_id: u64,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub backends: Vec<BackendStats>,
}

/// GET /
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "sqlbridge connection service is running".to_string(),
    })
}

/// GET /health - liveness plus pool occupancy; never touches a database
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pools = state.connection_manager.statuses();
    let degraded = pools
        .iter()
        .any(|p| p.closed || p.circuit == CircuitState::Open);

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        pools,
    })
}

/// GET /health/ready - check out and return one session per backend
pub async fn ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>> {
    let timeout = Duration::from_millis(state.settings.server.readiness_timeout_ms);
    let manager = &state.connection_manager;
    let mut backends = Vec::new();

    for kind in manager.backends() {
        let start = Instant::now();
        let conn = manager.acquire(kind, timeout).await?;
        let session_id = conn.id();
        manager.release(conn)?;

        backends.push(BackendReadiness {
            backend: kind,
            session_id,
            latency_ms: start.elapsed().as_millis() as u64,
        });
    }

    Ok(Json(ReadyResponse {
        status: "ready".to_string(),
        backends,
    }))
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        backends: state.connection_manager.stats(),
    })
}
