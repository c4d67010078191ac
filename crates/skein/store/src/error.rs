//! Store error types

use skein_types::SkeinError;
use thiserror::Error;

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict (e.g., already exists)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Query error
    #[error("Query error: {0}")]
    Query(String),

    /// Backend unavailable; the operation may succeed later
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::InvalidData(err.to_string())
    }
}

impl From<StoreError> for SkeinError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => SkeinError::NotFound(what),
            StoreError::Conflict(what) => SkeinError::Terminal(format!("Conflict: {}", what)),
            StoreError::Unavailable(what) => SkeinError::Retryable(what),
            other => SkeinError::Store(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
