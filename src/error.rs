// src/error.rs
// Standardized error types for Trans-Hub

use thiserror::Error;

/// Main error type for the Trans-Hub library.
///
/// Every error the crate surfaces is a variant here, so callers can match on
/// one type at the integration boundary.
#[derive(Error, Debug)]
pub enum TransHubError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown engine: {0}")]
    EngineNotFound(String),

    #[error("engine API error: {0}")]
    Api(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("uniqueness conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task cancelled")]
    Cancelled,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using TransHubError
pub type Result<T> = std::result::Result<T, TransHubError>;

impl From<tokio::task::JoinError> for TransHubError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            TransHubError::Cancelled
        } else {
            TransHubError::Storage(err.to_string())
        }
    }
}

impl From<String> for TransHubError {
    fn from(s: String) -> Self {
        TransHubError::Storage(s)
    }
}
