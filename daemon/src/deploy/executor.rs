//! Deployment job driver
//!
//! Runs one job through authenticate, prepare, plan and apply, then collects
//! the tool's outputs. Stages are strictly sequential and every failure is
//! terminal for the job.

use std::collections::BTreeMap;
use std::sync::Arc;

use deploy_api::DeploymentMode;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::deploy::credentials::CredentialGate;
use crate::deploy::fsm::DeploymentEvent;
use crate::deploy::outputs::parse_outputs;
use crate::deploy::probe::ToolProbe;
use crate::deploy::process::{Credentials, Invocation, OutputSink, ProcessError, ProcessRunner};
use crate::deploy::staging::{ArtifactWriter, Workspace};
use crate::deploy::StageError;
use crate::models::deployment::ConfigurationBundle;
use crate::registry::entry::JobEntry;
use crate::storage::settings::TerraformSettings;

/// Drives deployment jobs; shared by every job task
pub struct DeploymentExecutor {
    runner: Arc<dyn ProcessRunner>,
    probe: ToolProbe,
    gate: Arc<dyn CredentialGate>,
    writer: ArtifactWriter,
    terraform: TerraformSettings,
}

impl DeploymentExecutor {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        gate: Arc<dyn CredentialGate>,
        writer: ArtifactWriter,
        terraform: TerraformSettings,
    ) -> Self {
        Self {
            probe: ToolProbe::new(runner.clone()),
            runner,
            gate,
            writer,
            terraform,
        }
    }

    /// Run the job to a terminal state. Never fails; errors end up in the
    /// job's updates.
    pub async fn run(&self, job: Arc<JobEntry>, bundle: ConfigurationBundle) {
        let span = info_span!("deployment", job_id = %job.id());
        async {
            info!("Starting deployment of {}", job.subject_name());
            match self.drive(&job, &bundle).await {
                Ok(()) => info!("Deployment completed"),
                Err(e) => self.fail(&job, e),
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, job: &Arc<JobEntry>, bundle: &ConfigurationBundle) -> Result<(), StageError> {
        // Authenticating
        job.transition(DeploymentEvent::Authenticate, "Checking cloud credentials", None)?;
        let credentials = self.authenticate(job).await?;
        checkpoint(job)?;

        // Preparing
        let workspace = self.prepare(job, bundle).await?;
        checkpoint(job)?;
        job.transition(
            DeploymentEvent::Prepared,
            format!(
                "Staged {} files into {}",
                bundle.files.len(),
                workspace.dir.path().display()
            ),
            None,
        )?;

        // Planning
        self.plan(job, &workspace, &credentials).await?;
        checkpoint(job)?;
        job.transition(DeploymentEvent::Planned, "Applying planned changes", None)?;

        // Applying
        self.ensure_plan(job, &workspace, &credentials).await?;
        checkpoint(job)?;
        self.terraform(
            job,
            &workspace,
            &credentials,
            vec![
                "apply".to_string(),
                "-input=false".to_string(),
                "-no-color".to_string(),
                "-auto-approve".to_string(),
                workspace.plan_file_name(),
            ],
        )
        .await?;
        checkpoint(job)?;

        let outputs = self.collect_outputs(job, &workspace, &credentials).await?;
        let count = outputs.len();
        job.set_outputs(outputs);
        job.transition(
            DeploymentEvent::Applied,
            format!("Deployment completed with {} outputs", count),
            None,
        )?;
        Ok(())
    }

    async fn authenticate(&self, job: &Arc<JobEntry>) -> Result<Credentials, StageError> {
        let auth = self
            .gate
            .authenticate(job.cancel_token(), Some(self.sink(job)))
            .await;
        if job.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        if !auth.success {
            return Err(StageError::CredentialFailure {
                diagnostics: auth.diagnostic_lines,
            });
        }

        let identity = auth
            .diagnostic_lines
            .last()
            .cloned()
            .unwrap_or_else(|| "Authenticated".to_string());
        job.transition(
            DeploymentEvent::Authenticated,
            identity,
            Some(auth.diagnostic_lines.join("\n")),
        )?;
        Ok(auth.credentials)
    }

    async fn prepare(&self, job: &Arc<JobEntry>, bundle: &ConfigurationBundle) -> Result<Workspace, StageError> {
        let tool = self.terraform.binary.as_str();
        if !self.probe.is_available(tool).await {
            return Err(StageError::ToolUnavailable {
                tool: tool.to_string(),
            });
        }
        job.log(format!("{} is available", tool), None);

        let workspace = self.writer.stage(job.subject_name(), job.id(), bundle).await?;
        job.set_working_directory(workspace.dir.path().display().to_string());
        debug!("Working directory: {}", workspace.dir.path().display());
        Ok(workspace)
    }

    /// Init, then plan into the workspace's plan artifact
    async fn plan(&self, job: &Arc<JobEntry>, workspace: &Workspace, credentials: &Credentials) -> Result<(), StageError> {
        self.terraform(
            job,
            workspace,
            credentials,
            vec!["init".to_string(), "-input=false".to_string(), "-no-color".to_string()],
        )
        .await?;
        checkpoint(job)?;

        if job.mode() == DeploymentMode::Apply {
            job.log(
                format!(
                    "No valid plan artifact at {}, planning before apply",
                    workspace.plan_file.path().display()
                ),
                None,
            );
        }
        self.run_plan(job, workspace, credentials).await
    }

    /// Re-plan when the artifact the apply step consumes is missing or empty
    async fn ensure_plan(&self, job: &Arc<JobEntry>, workspace: &Workspace, credentials: &Credentials) -> Result<(), StageError> {
        if workspace.has_valid_plan().await {
            return Ok(());
        }
        warn!("Plan artifact missing before apply, re-planning");
        job.log(
            format!(
                "No valid plan artifact at {}, re-planning before apply",
                workspace.plan_file.path().display()
            ),
            None,
        );
        self.run_plan(job, workspace, credentials).await
    }

    async fn run_plan(&self, job: &Arc<JobEntry>, workspace: &Workspace, credentials: &Credentials) -> Result<(), StageError> {
        self.terraform(
            job,
            workspace,
            credentials,
            vec![
                "plan".to_string(),
                "-input=false".to_string(),
                "-no-color".to_string(),
                format!("-out={}", workspace.plan_file_name()),
            ],
        )
        .await?;
        Ok(())
    }

    /// Best effort; only cancellation is fatal here
    async fn collect_outputs(
        &self,
        job: &Arc<JobEntry>,
        workspace: &Workspace,
        credentials: &Credentials,
    ) -> Result<BTreeMap<String, String>, StageError> {
        // Not streamed: the raw document carries sensitive values
        let invocation = Invocation::new(&self.terraform.binary, ["output", "-json", "-no-color"])
            .current_dir(workspace.dir.path())
            .credentials(credentials.clone())
            .cancel_token(job.cancel_token());

        let raw = match self.runner.run(invocation).await {
            Ok(raw) => raw,
            Err(ProcessError::Cancelled { .. }) => return Err(StageError::Cancelled),
            Err(e) => {
                warn!("Output query failed: {}", e);
                job.log(format!("Warning: could not read deployment outputs: {}", e), None);
                return Ok(BTreeMap::new());
            }
        };

        match parse_outputs(&raw) {
            Ok(outputs) => Ok(outputs),
            Err(e) => {
                let e = StageError::from(e);
                warn!("{}", e);
                job.log(format!("Warning: {}", e), None);
                Ok(BTreeMap::new())
            }
        }
    }

    async fn terraform(
        &self,
        job: &Arc<JobEntry>,
        workspace: &Workspace,
        credentials: &Credentials,
        args: Vec<String>,
    ) -> Result<String, StageError> {
        let mut invocation = Invocation::new(&self.terraform.binary, args)
            .current_dir(workspace.dir.path())
            .credentials(credentials.clone())
            .cancel_token(job.cancel_token());
        if self.terraform.stream_output {
            invocation = invocation.on_output(self.sink(job));
        }

        let command = invocation.display();
        job.log(format!("Running {}", command), None);
        debug!("Running {}", command);

        self.runner.run(invocation).await.map_err(|e| match e {
            ProcessError::Cancelled { .. } => StageError::Cancelled,
            ProcessError::Launch { program, .. } => StageError::ToolUnavailable { tool: program },
            ProcessError::Failed { exit_code, output, .. } => StageError::ToolInvocationFailure {
                command,
                exit_code,
                output,
            },
        })
    }

    fn sink(&self, job: &Arc<JobEntry>) -> OutputSink {
        let job = job.clone();
        Arc::new(move |line: &str| job.log(line, None))
    }

    fn fail(&self, job: &JobEntry, e: StageError) {
        let message = e.to_string();
        match &e {
            StageError::Cancelled => info!("Deployment cancelled"),
            _ => error!("Deployment failed: {}", message),
        }
        if let Err(transition_err) = job.transition(DeploymentEvent::Fail(message.clone()), message, e.details()) {
            warn!("Could not record failure: {}", transition_err);
        }
    }
}

fn checkpoint(job: &JobEntry) -> Result<(), StageError> {
    if job.is_cancelled() {
        Err(StageError::Cancelled)
    } else {
        Ok(())
    }
}
