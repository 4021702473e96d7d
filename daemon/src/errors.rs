//! Error types for the deployment daemon

use thiserror::Error;

/// Main error type for the daemon
#[derive(Error, Debug)]
pub enum DeploydError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for DeploydError {
    fn from(err: anyhow::Error) -> Self {
        DeploydError::Internal(err.to_string())
    }
}
