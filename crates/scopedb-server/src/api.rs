//! HTTP error mapping shared by all handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scopedb_session::{ExecutorError, SessionError};

/// Error type returned by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::MissingFactory(ref missing) => {
                tracing::error!(key = missing.key, "session factory not configured");
                ApiError::InternalServerError("session factory not configured".to_string())
            }
            SessionError::Database(rusqlite::Error::SqliteFailure(code, _))
                if code.code == rusqlite::ffi::ErrorCode::ConstraintViolation =>
            {
                ApiError::Conflict("record already exists".to_string())
            }
            other => {
                tracing::error!(error = %other, "session operation failed");
                ApiError::InternalServerError("database error".to_string())
            }
        }
    }
}

impl From<ExecutorError> for ApiError {
    fn from(err: ExecutorError) -> Self {
        tracing::error!(error = %err, "blocking job failed");
        ApiError::InternalServerError("worker pool unavailable".to_string())
    }
}
