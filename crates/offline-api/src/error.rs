//! API error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use offline_core::CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forwarding loop: {0}")]
    LoopDetected(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::LoopDetected(msg) => {
                (StatusCode::LOOP_DETECTED, "LOOP_DETECTED", msg.clone())
            }
            ApiError::Core(e) => match e {
                CoreError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
                CoreError::BadRequest(msg) | CoreError::InvalidUrl(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
                }
                // Only pass-through requests surface network failures
                CoreError::Proxy(_) => (StatusCode::BAD_GATEWAY, "NETWORK_ERROR", e.to_string()),
                CoreError::InvalidState(msg) => {
                    (StatusCode::CONFLICT, "INVALID_STATE", msg.clone())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    e.to_string(),
                ),
            },
        };

        let body = axum::Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
