//! Mapping of engine errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use aicanvas_core::error::CanvasError;

#[derive(Debug)]
pub enum ApiError {
    Canvas(CanvasError),
    BadRequest(String),
}

impl From<CanvasError> for ApiError {
    fn from(e: CanvasError) -> Self {
        ApiError::Canvas(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Canvas(e) => match e {
                CanvasError::InvalidEdge { .. }
                | CanvasError::DuplicateNode(_)
                | CanvasError::CyclePresent { .. } => StatusCode::BAD_REQUEST,
                CanvasError::NodeNotFound(_) | CanvasError::GraphNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                CanvasError::Concurrency { .. } => StatusCode::CONFLICT,
                CanvasError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                CanvasError::Backend { .. }
                | CanvasError::Format { .. }
                | CanvasError::StreamProtocol { .. }
                | CanvasError::StreamingUnsupported(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::BadRequest(message) => json!({ "status": "error", "message": message }),
            ApiError::Canvas(CanvasError::CyclePresent { cycles }) => json!({
                "status": "error",
                "message": self.to_string(),
                "details": { "cycles": cycles },
            }),
            ApiError::Canvas(CanvasError::InvalidEdge { from, to, reason }) => json!({
                "status": "error",
                "message": self.to_string(),
                "details": { "source": from, "target": to, "reason": reason },
            }),
            ApiError::Canvas(_) => json!({ "status": "error", "message": self.to_string() }),
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Canvas(e) => write!(f, "{e}"),
            ApiError::BadRequest(m) => write!(f, "{m}"),
        }
    }
}
