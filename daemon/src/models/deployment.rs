//! Deployment models

use std::collections::BTreeMap;

use chrono::Utc;
use deploy_api::{Deployment, DeploymentMode, DeploymentStatus, StatusUpdate};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm};

/// One file of a configuration bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
    /// Relative path inside the working directory
    pub name: String,

    /// Written verbatim
    pub content: String,
}

impl BundleFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Files produced by the code-generation pipeline for one deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationBundle {
    pub files: Vec<BundleFile>,
}

impl ConfigurationBundle {
    pub fn new(files: Vec<BundleFile>) -> Self {
        Self { files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// The registry's record of one job
///
/// Owns the state machine and the published document together so the status
/// can only move through `transition`, which also appends the matching update.
#[derive(Debug, Clone)]
pub struct DeploymentRecord {
    fsm: DeploymentFsm,
    document: Deployment,
}

impl DeploymentRecord {
    pub fn new(
        id: impl Into<String>,
        subject_name: impl Into<String>,
        reference_id: impl Into<String>,
        mode: DeploymentMode,
    ) -> Self {
        let subject_name = subject_name.into();
        let reference_id = reference_id.into();
        let mut record = Self {
            fsm: DeploymentFsm::new(),
            document: Deployment {
                id: id.into(),
                subject_name: subject_name.clone(),
                reference_id: reference_id.clone(),
                mode,
                status: DeploymentStatus::Initializing,
                started_at: Utc::now(),
                finished_at: None,
                working_directory: None,
                outputs: BTreeMap::new(),
                error: None,
                updates: Vec::new(),
                aggregated_log: String::new(),
            },
        };
        record.push(
            format!("Deployment of {} requested from bundle {}", subject_name, reference_id),
            None,
        );
        record
    }

    pub fn id(&self) -> &str {
        &self.document.id
    }

    pub fn status(&self) -> DeploymentStatus {
        self.fsm.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.fsm.is_terminal()
    }

    /// Move to the next state and record why
    pub fn transition(
        &mut self,
        event: DeploymentEvent,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Result<DeploymentStatus, String> {
        let status = self.fsm.process(event)?;
        self.document.status = status;
        if status.is_terminal() {
            self.document.finished_at = Some(Utc::now());
        }
        if let Some(error) = self.fsm.error() {
            self.document.error = Some(error.to_string());
        }
        self.push(message.into(), details);
        Ok(status)
    }

    /// Append a log line under the current status
    pub fn log(&mut self, message: impl Into<String>, details: Option<String>) {
        self.push(message.into(), details);
    }

    pub fn set_working_directory(&mut self, dir: impl Into<String>) {
        self.document.working_directory = Some(dir.into());
    }

    pub fn set_outputs(&mut self, outputs: BTreeMap<String, String>) {
        self.document.outputs = outputs;
    }

    /// Copy of the published document
    pub fn snapshot(&self) -> Deployment {
        self.document.clone()
    }

    fn push(&mut self, message: String, details: Option<String>) {
        let update = StatusUpdate {
            status: self.fsm.state(),
            message,
            details,
            timestamp: Utc::now(),
        };

        let log = &mut self.document.aggregated_log;
        log.push_str(&format!(
            "[{}] [{}] {}\n",
            update.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            update.status,
            update.message
        ));
        if let Some(details) = &update.details {
            log.push_str(details);
            if !details.ends_with('\n') {
                log.push('\n');
            }
        }

        self.document.updates.push(update);
    }
}
