//! Deployment orchestration

pub mod credentials;
pub mod demo;
pub mod executor;
pub mod fsm;
pub mod outputs;
pub mod probe;
pub mod process;
pub mod staging;

use thiserror::Error;

use crate::deploy::outputs::OutputParseError;

/// Why a stage could not complete
///
/// Every variant except `OutputParseFailure` ends the job as `failed`.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{tool} is not installed or not executable")]
    ToolUnavailable { tool: String },

    #[error("No usable cloud credential")]
    CredentialFailure { diagnostics: Vec<String> },

    #[error("Staging failed: {0}")]
    StagingFailure(String),

    #[error("`{command}` failed with exit code {exit_code}")]
    ToolInvocationFailure {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("Could not read deployment outputs: {0}")]
    OutputParseFailure(#[from] OutputParseError),

    #[error("Deployment cancelled")]
    Cancelled,

    #[error("{0}")]
    InvalidTransition(String),
}

impl StageError {
    /// Raw diagnostics attached to the failing update
    pub fn details(&self) -> Option<String> {
        match self {
            StageError::CredentialFailure { diagnostics } => Some(diagnostics.join("\n")),
            StageError::ToolInvocationFailure { output, .. } if !output.is_empty() => {
                Some(output.clone())
            }
            _ => None,
        }
    }
}
