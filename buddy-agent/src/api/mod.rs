//! HTTP API module for the buddy agent.

pub mod error;
pub mod health;
pub mod snapshots;

use crate::orchestrator::SnapshotOrchestrator;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SnapshotOrchestrator>,
    pub agent_id: String,
}

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        // Snapshot endpoints
        .route("/snapshots/create", post(snapshots::create))
        .route("/snapshots/restore", post(snapshots::restore))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
