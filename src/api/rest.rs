// =============================================================================
// REST status surface — Axum
// =============================================================================
//
// Internal read-only surface for operators: liveness, current open positions,
// and the active runtime config. No control endpoints — trading mode changes
// happen by editing the config file on disk and letting the engine reload it,
// not through this process.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/config", get(config))
        .route("/api/v1/rate-limit", get(rate_limit))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    server_time_ms: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.uptime_seconds(),
        server_time_ms: chrono::Utc::now().timestamp_millis(),
    })
}

async fn positions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.position_manager.get_open_positions())
}

async fn config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.read().clone())
}

async fn rate_limit(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.client.rate_limit_snapshot())
}
