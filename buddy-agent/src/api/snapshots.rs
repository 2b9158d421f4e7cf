//! Snapshot create / restore endpoints.

use super::AppState;
use crate::orchestrator::{CreateReply, CreateRequest, RestoreReply, RestoreRequest};
use crate::Result;
use axum::{extract::State, Json};

/// POST /snapshots/create - Snapshot the node and upload it
pub async fn create(
    State(state): State<AppState>,
    body: Option<Json<CreateRequest>>,
) -> Result<Json<CreateReply>> {
    let request = body.map(|Json(req)| req).unwrap_or_default();
    tracing::info!("Create requested (name: {:?})", request.name);

    let reply = state.orchestrator.create(request).await?;
    Ok(Json(reply))
}

/// POST /snapshots/restore - Replace local data with a stored backup
pub async fn restore(
    State(state): State<AppState>,
    Json(request): Json<RestoreRequest>,
) -> Result<Json<RestoreReply>> {
    tracing::info!(
        "Restore requested (name: {:?}, path: {:?}, keyspaces: {:?})",
        request.name,
        request.path,
        request.keyspaces
    );

    let reply = state.orchestrator.restore(request).await?;
    Ok(Json(reply))
}
