//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use loopclip_media::MediaError;
use loopclip_models::ValidationError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("acquisition failed: {0}")]
    Acquisition(MediaError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Queue error: {0}")]
    Queue(#[from] loopclip_queue::QueueError),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) | ApiError::Validation(_) | ApiError::Acquisition(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Internal(_) | ApiError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Acquisition problems are the caller's; local I/O failures are ours.
impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        if e.is_acquisition() {
            ApiError::Acquisition(e)
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let error = match &self {
            ApiError::Internal(_) | ApiError::Queue(_) => {
                tracing::error!("Request failed: {}", self);
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" {
                    "An internal error occurred".to_string()
                } else {
                    self.to_string()
                }
            }
            _ => self.to_string(),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}
