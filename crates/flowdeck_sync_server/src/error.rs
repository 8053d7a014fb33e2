//! Error types for the sync server.

use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use flowdeck_sync_protocol::ProtocolError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that fail a whole request.
///
/// Per-operation failures never surface here; they are reported inside
/// the bulk sync result next to the operations that succeeded.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Request could not be parsed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request parsed but failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ProtocolError),

    /// Missing or invalid credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The persistence layer did not answer in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Persistence failure outside a per-operation scope.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::Validation(_)
                | ServerError::AuthenticationFailed(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns true if the client may resend the same request.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServerError::Timeout(_) => true,
            ServerError::Store(e) => e.is_transient(),
            _ => false,
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) | ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            ServerError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Store(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Store(_) | ServerError::Internal(_) | ServerError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::Validation(_) => "validation_error",
            ServerError::AuthenticationFailed(_) => "unauthorized",
            ServerError::Timeout(_) => "timeout",
            ServerError::Store(_) => "persistence_failure",
            ServerError::Internal(_) | ServerError::Io(_) => "internal_error",
        }
    }
}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code.
    pub error: String,
    /// Human readable message.
    pub message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if self.is_server_error() {
            tracing::error!(error = %self, "request failed");
            match &self {
                ServerError::Timeout(_) | ServerError::Store(_) => self.to_string(),
                _ => "an internal error occurred".to_string(),
            }
        } else {
            tracing::debug!(error = %self, "request rejected");
            self.to_string()
        };

        let body = Json(ErrorBody {
            error: self.code().to_string(),
            message,
        });
        (status, body).into_response()
    }
}
