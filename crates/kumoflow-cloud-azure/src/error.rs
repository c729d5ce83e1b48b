//! Azure provider error types

use kumoflow_cloud::{CloudError, ConvergeError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AzureError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Management API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Unexpected API response: {0}")]
    UnexpectedResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Convergence failed: {0}")]
    Converge(#[from] ConvergeError),
}

impl AzureError {
    /// Fold into the core error space at the lifecycle trait boundary,
    /// preserving the variants callers inspect.
    pub fn into_cloud(self) -> CloudError {
        match self {
            AzureError::Cloud(error) => error,
            AzureError::Converge(error) => CloudError::Converge(error),
            AzureError::AlreadyExists(id) => CloudError::ResourceAlreadyExists(id),
            other => CloudError::ApiError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AzureError>;
