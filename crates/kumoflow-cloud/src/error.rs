//! Core error types

use thiserror::Error;

/// Errors shared by every provider.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("Dependency violation (retryable): {0}")]
    DependencyViolation(String),

    #[error("Unrecognized {kind} status {value:?}")]
    UnrecognizedStatus { kind: &'static str, value: String },

    #[error("Invalid resource id: {0}")]
    InvalidResourceId(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Convergence failed: {0}")]
    Converge(#[from] crate::poll::ConvergeError),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
