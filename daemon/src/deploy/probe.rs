//! Tool availability probe

use std::sync::Arc;

use tracing::debug;

use crate::deploy::process::{Invocation, ProcessError, ProcessRunner};

/// Checks that an external binary can be launched before a stage depends on it
#[derive(Clone)]
pub struct ToolProbe {
    runner: Arc<dyn ProcessRunner>,
}

impl ToolProbe {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Runs `<tool> version`; only a launch failure counts as unavailable
    pub async fn is_available(&self, tool: &str) -> bool {
        match self.runner.run(Invocation::new(tool, ["version"])).await {
            Ok(_) => true,
            Err(ProcessError::Launch { source, .. }) => {
                debug!("{} is not available: {}", tool, source);
                false
            }
            Err(e) => {
                debug!("{} launched but the version check failed: {}", tool, e);
                true
            }
        }
    }
}
