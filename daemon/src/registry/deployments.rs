//! Deployment registry

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use deploy_api::{Deployment, DeploymentMode};
use tracing::{debug, info};

use crate::deploy::executor::DeploymentExecutor;
use crate::models::deployment::{ConfigurationBundle, DeploymentRecord};
use crate::registry::entry::JobEntry;
use crate::utils::generate_uuid;

/// Everything needed to start a job
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub subject_name: String,
    pub reference_id: String,
    pub mode: DeploymentMode,
    pub bundle: ConfigurationBundle,
}

/// Owns every job for the life of the process
pub struct DeploymentRegistry {
    jobs: RwLock<HashMap<String, Arc<JobEntry>>>,
    executor: Arc<DeploymentExecutor>,
}

impl DeploymentRegistry {
    pub fn new(executor: Arc<DeploymentExecutor>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            executor,
        }
    }

    /// Start a `deploy`-mode job for an inline bundle
    pub fn create(&self, subject_name: &str, bundle: ConfigurationBundle) -> String {
        self.create_with(NewDeployment {
            subject_name: subject_name.to_string(),
            reference_id: subject_name.to_string(),
            mode: DeploymentMode::Deploy,
            bundle,
        })
    }

    /// Register the job and spawn its driver; returns without waiting for any
    /// stage. Must be called from within a tokio runtime.
    pub fn create_with(&self, request: NewDeployment) -> String {
        let id = generate_uuid();
        let record = DeploymentRecord::new(&id, &request.subject_name, &request.reference_id, request.mode);
        let entry = Arc::new(JobEntry::new(record));

        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), entry.clone());

        info!(
            "Created deployment {} for {} ({:?} mode)",
            id, request.subject_name, request.mode
        );
        let executor = self.executor.clone();
        tokio::spawn(async move {
            executor.run(entry, request.bundle).await;
        });
        id
    }

    pub fn entry(&self, id: &str) -> Option<Arc<JobEntry>> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn get(&self, id: &str) -> Option<Deployment> {
        self.entry(id).map(|entry| entry.snapshot())
    }

    /// All jobs, oldest first
    pub fn list(&self) -> Vec<Deployment> {
        let mut deployments: Vec<Deployment> = self
            .entries()
            .iter().map(|e| e.snapshot()).collect();
        deployments.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        deployments
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `false` if the id is unknown; cancelling a finished job is a no-op
    pub fn cancel(&self, id: &str) -> bool {
        match self.entry(id) {
            Some(entry) => {
                if !entry.status().is_terminal() {
                    info!("Cancelling deployment {}", id);
                    entry.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Cancel every running job, returning how many were signalled
    pub fn cancel_all(&self) -> usize {
        let running: Vec<Arc<JobEntry>> = self
            .entries()
            .into_iter()
            .filter(|e| !e.status().is_terminal())
            .collect();
        for entry in &running {
            entry.cancel();
        }
        debug!("Cancelled {} running deployments", running.len());
        running.len()
    }

    /// Resolve once the job is terminal; `None` for unknown ids
    pub async fn wait(&self, id: &str) -> Option<Deployment> {
        let entry = self.entry(id)?;
        Some(entry.wait().await)
    }

    /// Resolve once every job known at call time is terminal
    pub async fn wait_all(&self) {
        for entry in self.entries() {
            entry.wait().await;
        }
    }

    fn entries(&self) -> Vec<Arc<JobEntry>> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}
