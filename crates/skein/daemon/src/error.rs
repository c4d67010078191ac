//! Error types for skeind

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use skein_types::{SkeinError, TaskFailure};
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] SkeinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Skein(#[from] SkeinError),

    /// The workflow ran and ended in `Failed`
    #[error("Workflow {instance_id} failed: {}", failure.reason)]
    WorkflowFailed {
        instance_id: String,
        failure: TaskFailure,
    },

    #[error("Workflow {0} was cancelled")]
    Cancelled(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

fn skein_status(err: &SkeinError) -> StatusCode {
    match err {
        SkeinError::Validation(_) | SkeinError::UnsupportedFilterField(_) => StatusCode::BAD_REQUEST,
        SkeinError::NotFound(_) | SkeinError::InstanceNotFound(_) | SkeinError::Expired(_) => {
            StatusCode::NOT_FOUND
        }
        SkeinError::InvalidTransition { .. } => StatusCode::CONFLICT,
        SkeinError::NotOwner { .. } => StatusCode::MISDIRECTED_REQUEST,
        SkeinError::Retryable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, details) = match &self {
            ApiError::Skein(err) => {
                let details = match err {
                    SkeinError::NotOwner { owner, .. } => Some(json!({ "owner": owner })),
                    _ => None,
                };
                (skein_status(err), err.code().to_string(), details)
            }
            ApiError::WorkflowFailed {
                instance_id,
                failure,
            } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                failure.code.clone(),
                Some(json!({ "instanceId": instance_id })),
            ),
            ApiError::Cancelled(instance_id) => (
                StatusCode::CONFLICT,
                "CANCELLED".to_string(),
                Some(json!({ "instanceId": instance_id })),
            ),
        };

        if status.is_server_error() {
            tracing::error!(code = %code, error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code,
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
