//! Health handler

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub node: String,
    pub workers_running: bool,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    let workers_running = state.query.is_running().await && state.bulk.is_running().await;
    Json(HealthCheckResponse {
        status: if workers_running { "healthy" } else { "degraded" }.to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        node: state.query.node().to_string(),
        workers_running,
    })
}
