use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::auth::AuthError;
use crate::search::ValidationError;
use crate::worker::GatewayError;

/// Errors surfaced to HTTP callers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error(transparent)]
    InvalidRequest(#[from] ValidationError),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Search processing failed: {source}")]
    Search {
        source: GatewayError,
        /// Configured worker deadline in ms
        timeout_ms: u64,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized(e) => {
                debug!("Rejected token: {}", e);
                let message = match e {
                    AuthError::MissingToken => "Authorization token required",
                    _ => "Invalid or expired token",
                };
                (
                    StatusCode::UNAUTHORIZED,
                    json!({ "success": false, "message": message }),
                )
            }
            ApiError::InvalidRequest(e) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid request", "details": e.to_string() }),
            ),
            ApiError::MalformedPayload(details) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Invalid request", "details": details }),
            ),
            ApiError::Search { source, timeout_ms } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Search processing failed",
                    "details": source.to_string(),
                    "timeout": timeout_ms,
                }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
