//! Error types for stockwell-import
//!
//! Two layers: `ImportError` is the workflow taxonomy; `ApiError` is its
//! HTTP projection.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for workflow operations
pub type Result<T> = std::result::Result<T, ImportError>;

/// Import workflow error taxonomy
///
/// Propagation policy: `TransientIo` and `Reasoning` are absorbed at the
/// orchestrator boundary and converted to recoverable states; `Validation`
/// and `Conflict` always surface to the caller with enough detail to act;
/// `ApprovalRequired` is a normal blocked state, not a failure. Learning-sink
/// failures are logged and swallowed before ever becoming an `ImportError`.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Network/storage/service unavailability; retried with bounded backoff
    #[error("Transient IO failure: {0}")]
    TransientIo(String),

    /// Schema mismatch, malformed file, or row-level rejection; surfaced
    /// verbatim and never retried automatically
    #[error("Validation failure: {0}")]
    Validation(String),

    /// The content-understanding service errored or returned an unusable
    /// response; triggers the HIL recovery fallback, not a hard error
    #[error("Reasoning service failure: {0}")]
    Reasoning(String),

    /// Stale write on a session; caller must reload and retry
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// A schema or answer gate is not satisfied; names the unresolved item
    #[error("Approval required: {0}")]
    ApprovalRequired(String),

    /// Session unknown or TTL-expired
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invariant violation or unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<stockwell_common::Error> for ImportError {
    fn from(err: stockwell_common::Error) -> Self {
        match err {
            stockwell_common::Error::NotFound(msg) => ImportError::NotFound(msg),
            stockwell_common::Error::InvalidInput(msg) => ImportError::Validation(msg),
            stockwell_common::Error::Io(e) => ImportError::TransientIo(e.to_string()),
            other => ImportError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for ImportError {
    fn from(err: sqlx::Error) -> Self {
        ImportError::Internal(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::Internal(format!("Serialization error: {}", err))
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - stale session write or unsatisfied gate
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upstream service failure (502)
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Row/file validation failure (422)
    #[error("Validation failure: {0}")]
    Validation(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::NotFound(msg) => ApiError::NotFound(msg),
            ImportError::Validation(msg) => ApiError::Validation(msg),
            ImportError::Conflict(msg) => {
                ApiError::Conflict(format!("{} (reload the session and retry)", msg))
            }
            ImportError::ApprovalRequired(msg) => ApiError::Conflict(msg),
            ImportError::TransientIo(msg) | ImportError::Reasoning(msg) => ApiError::Upstream(msg),
            ImportError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Validation(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_FAILURE", msg)
            }
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_FAILURE", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;
