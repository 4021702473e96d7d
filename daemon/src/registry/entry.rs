//! A single job's slot in the registry

use std::collections::BTreeMap;
use std::sync::RwLock;

use deploy_api::{Deployment, DeploymentMode, DeploymentStatus};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::deploy::fsm::DeploymentEvent;
use crate::deploy::StageError;
use crate::models::deployment::DeploymentRecord;

/// Shared handle to one job
///
/// The job's driver task is the only writer; pollers take snapshots. The lock
/// guards this job alone, so a slow writer never stalls readers of other jobs.
#[derive(Debug)]
pub struct JobEntry {
    id: String,
    subject_name: String,
    mode: DeploymentMode,
    record: RwLock<DeploymentRecord>,
    cancel: CancellationToken,
    status_tx: watch::Sender<DeploymentStatus>,
}

impl JobEntry {
    pub fn new(record: DeploymentRecord) -> Self {
        let document = record.snapshot();
        let (status_tx, _) = watch::channel(record.status());
        Self {
            id: document.id,
            subject_name: document.subject_name,
            mode: document.mode,
            record: RwLock::new(record),
            cancel: CancellationToken::new(),
            status_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subject_name(&self) -> &str {
        &self.subject_name
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    pub fn status(&self) -> DeploymentStatus {
        self.record.read().unwrap_or_else(|e| e.into_inner()).status()
    }

    pub fn snapshot(&self) -> Deployment {
        self.record.read().unwrap_or_else(|e| e.into_inner()).snapshot()
    }

    pub fn transition(
        &self,
        event: DeploymentEvent,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Result<DeploymentStatus, StageError> {
        let status = {
            let mut record = self.record.write().unwrap_or_else(|e| e.into_inner());
            record
                .transition(event, message, details)
                .map_err(StageError::InvalidTransition)?
        };
        self.status_tx.send_replace(status);
        Ok(status)
    }

    pub fn log(&self, message: impl Into<String>, details: Option<String>) {
        self.record
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .log(message, details);
    }

    pub fn set_working_directory(&self, dir: impl Into<String>) {
        self.record
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set_working_directory(dir);
    }

    pub fn set_outputs(&self, outputs: BTreeMap<String, String>) {
        self.record
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set_outputs(outputs);
    }

    /// Request cancellation; the driver notices at its next await point
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve once the job reaches `completed` or `failed`
    pub async fn wait(&self) -> Deployment {
        let mut rx = self.status_tx.subscribe();
        // The sender lives as long as `self`
        let _ = rx.wait_for(|status| status.is_terminal()).await;
        self.snapshot()
    }
}
