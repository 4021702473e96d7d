//! Configuration bundle sources

pub mod directory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::deployment::ConfigurationBundle;

pub use directory::DirectoryBundleSource;

/// Bundle lookup failure
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("No configuration bundle for reference {0}")]
    NotFound(String),

    #[error("Invalid bundle reference {0:?}")]
    InvalidReference(String),

    #[error("Failed to read bundle {reference}: {message}")]
    Unreadable { reference: String, message: String },
}

/// Supplies the files generated for a reference id
#[async_trait]
pub trait BundleSource: Send + Sync {
    async fn fetch(&self, reference_id: &str) -> Result<ConfigurationBundle, BundleError>;
}
