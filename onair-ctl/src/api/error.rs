//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::error::Error;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] Error),

    /// Missing or unknown API key
    #[error("missing or invalid API key")]
    Unauthenticated,

    /// Authenticated, but the role may not call this route
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Core(err) => match err {
                Error::InvalidPriority(_) => (StatusCode::BAD_REQUEST, "INVALID_PRIORITY"),
                Error::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"),
                Error::TokenAlreadyUsed => (StatusCode::CONFLICT, "TOKEN_ALREADY_USED"),
                Error::Unauthorized(_) => (StatusCode::FORBIDDEN, "UNAUTHORIZED"),
                Error::NoActiveSources(_) => (StatusCode::NOT_FOUND, "NO_ACTIVE_SOURCES"),
                Error::SourceNotFound { .. } => (StatusCode::NOT_FOUND, "SOURCE_NOT_FOUND"),
                Error::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
                Error::ExecutorNotFound(_) => (StatusCode::NOT_FOUND, "EXECUTOR_NOT_FOUND"),
                Error::SessionInactive(_) => (StatusCode::CONFLICT, "SESSION_INACTIVE"),
                Error::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
                Error::Pipeline(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PIPELINE_ERROR"),
                Error::Store { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
                Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.parts();
        if status.is_server_error() {
            error!(code = error_code, error = %self, "request failed");
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
