//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::bundle::{BundleSource, DirectoryBundleSource};
use crate::deploy::credentials::{CliCredentialGate, CredentialGate};
use crate::deploy::demo::DemoRunner;
use crate::deploy::executor::DeploymentExecutor;
use crate::deploy::process::{ProcessRunner, SystemRunner};
use crate::deploy::staging::ArtifactWriter;
use crate::errors::DeploydError;
use crate::registry::DeploymentRegistry;

/// Main application state
pub struct AppState {
    /// Every deployment job
    pub registry: Arc<DeploymentRegistry>,

    /// Where configuration bundles come from
    pub bundles: Arc<dyn BundleSource>,
}

impl AppState {
    /// Build the runner, gate and registry from options
    pub async fn init(options: &AppOptions) -> Result<Self, DeploydError> {
        options.layout.setup().await?;

        let runner: Arc<dyn ProcessRunner> = if options.demo_mode {
            warn!("Demo mode enabled: no external tool will be executed");
            Arc::new(DemoRunner::new())
        } else {
            Arc::new(SystemRunner::new())
        };

        Ok(Self::with_runner(options, runner))
    }

    /// Same as `init` with an explicit process runner; does not touch disk
    pub fn with_runner(options: &AppOptions, runner: Arc<dyn ProcessRunner>) -> Self {
        let gate: Arc<dyn CredentialGate> = Arc::new(CliCredentialGate::new(
            runner.clone(),
            options.auth.clone(),
            options.credential_material.clone(),
        ));
        let writer = ArtifactWriter::new(
            options.layout.workspaces_dir(),
            options.terraform.plan_file.clone(),
        );
        let executor = Arc::new(DeploymentExecutor::new(
            runner,
            gate,
            writer,
            options.terraform.clone(),
        ));
        let bundles: Arc<dyn BundleSource> =
            Arc::new(DirectoryBundleSource::new(options.layout.bundles_dir()));

        info!(
            "Bundles from {}, workspaces under {}",
            options.layout.bundles_dir().path().display(),
            options.layout.workspaces_dir().path().display()
        );

        Self {
            registry: Arc::new(DeploymentRegistry::new(executor)),
            bundles,
        }
    }

    /// Cancel in-flight jobs and wait for them to record their final state
    pub async fn shutdown(&self) -> Result<(), DeploydError> {
        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            info!("Waiting for {} cancelled deployments to stop", cancelled);
        }
        self.registry.wait_all().await;
        Ok(())
    }
}
