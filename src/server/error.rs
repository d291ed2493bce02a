use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::jobs::QueueError;
use crate::round::RoundError;

const LOG_TARGET: &str = "server::error";

/// Failure of an operator call.
///
/// Business rejections are part of the API contract and travel as HTTP 200
/// with their numeric code; everything else is a transport-level failure.
#[derive(Debug)]
pub enum ApiError {
    Business { code: u32, message: String },
    NotFound(String),
    Internal(String),
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }
}

impl From<RoundError> for ApiError {
    fn from(err: RoundError) -> Self {
        if err.is_business() {
            ApiError::Business {
                code: err.code(),
                message: err.to_string(),
            }
        } else {
            ApiError::internal(err.to_string())
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Business { code, message } => {
                (StatusCode::OK, Json(json!({ "code": code, "message": message }))).into_response()
            }
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message).into_response(),
            ApiError::Internal(message) => {
                error!(target: LOG_TARGET, %message, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
            }
        }
    }
}
