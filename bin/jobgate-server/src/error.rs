//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a `{"error": ...}` JSON
//! body with a matching status code.
//!
//! Backend and internal failures are logged with full detail; the caller
//! only sees which step failed, never the raw Kubernetes response.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use jobgate_core::{StoreError, SubmitError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// All errors that can occur in the jobgate-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The caller referenced a job that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an incomplete or malformed submission.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The uploaded archive exceeds the configured limit.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// The route exists but not for this method.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// The backend refused one of the job's objects. The message names the
    /// failed step only.
    #[error("backend error: {0}")]
    Backend(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ServerError::PayloadTooLarge(m) => (StatusCode::PAYLOAD_TOO_LARGE, m),
            ServerError::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                "method not allowed".to_owned(),
            ),
            ServerError::Backend(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<SubmitError> for ServerError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Validation(m) => ServerError::BadRequest(m),
            SubmitError::Creation { stage, source } => {
                error!(%stage, error = %source, "backend refused submission");
                ServerError::Backend(format!("failed to {stage}"))
            }
            e @ (SubmitError::Conflict(_) | SubmitError::Registration { .. }) => {
                ServerError::Internal(e.to_string())
            }
        }
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ServerError::NotFound(format!("job {id} not found")),
            other => ServerError::Internal(other.to_string()),
        }
    }
}
