//! Error types for the Skein layer

use crate::{TaskStage, WorkflowInstanceId};

/// Errors that can occur in workflow and query operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkeinError {
    /// Malformed input. Fails the instance immediately, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient failure (network, availability, temporary quota).
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Permanent rejection (duplicate resource, max attempts exceeded).
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// A state-machine ordering defect.
    #[error("Invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStage, to: TaskStage },

    #[error("Unsupported filter field: {0}")]
    UnsupportedFilterField(String),

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(WorkflowInstanceId),

    #[error("Instance {instance} is owned by node {owner}")]
    NotOwner {
        instance: WorkflowInstanceId,
        owner: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Expired: {0}")]
    Expired(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SkeinError {
    /// Whether the operation that raised this error may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Short machine-readable code for API responses and failure records
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Retryable(_) => "RETRYABLE_ERROR",
            Self::Terminal(_) => "TERMINAL_ERROR",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::UnsupportedFilterField(_) => "UNSUPPORTED_FILTER_FIELD",
            Self::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            Self::NotOwner { .. } => "NOT_OWNER",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Expired(_) => "EXPIRED",
            Self::Store(_) => "STORE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<serde_json::Error> for SkeinError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for Skein operations
pub type SkeinResult<T> = Result<T, SkeinError>;
