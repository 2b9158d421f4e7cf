//! Health check endpoints.

use super::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

static START_TIME: std::sync::OnceLock<u64> = std::sync::OnceLock::new();

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn init_start_time() {
    START_TIME.get_or_init(now_secs);
}

/// GET /health - Agent and engine status
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = now_secs().saturating_sub(*START_TIME.get().unwrap_or(&0));
    let status = state.orchestrator.status().await;

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "agent_id": state.agent_id,
        "uptime_secs": uptime,
        "busy": status.busy,
        "engine_running": status.engine_running,
        "node_id": status.node_id,
        "cluster_name": status.cluster_name,
    }))
}

/// GET /version - Version information endpoint
pub async fn version() -> impl IntoResponse {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": env!("CARGO_PKG_NAME"),
    }))
}
