use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::{health, ready, root, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        // Health & Stats
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
}
