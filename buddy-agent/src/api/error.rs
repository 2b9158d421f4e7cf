//! Maps agent errors onto HTTP responses.

use crate::AgentError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

impl AgentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::Validation(_) => StatusCode::BAD_REQUEST,
            AgentError::Busy(_) => StatusCode::CONFLICT,
            AgentError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
