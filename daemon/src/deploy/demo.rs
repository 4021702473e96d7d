//! Simulated process runner
//!
//! Stands in for `terraform` and `az` when the daemon runs in demo mode and in
//! tests. Every command succeeds with canned output unless scripted otherwise.
//! It is never used as a fallback for a failing real runner.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::deploy::process::{Invocation, ProcessError, ProcessRunner};

const DEMO_OUTPUTS: &str = r#"{
  "resource_group": {"sensitive": false, "type": "string", "value": "rg-demo"},
  "endpoint": {"sensitive": false, "type": "string", "value": "https://demo.example.com"}
}"#;

const DEMO_ACCOUNT: &str = r#"{
  "id": "00000000-0000-0000-0000-000000000000",
  "name": "Demo Subscription",
  "tenantId": "11111111-1111-1111-1111-111111111111",
  "user": {"name": "demo@example.com", "type": "user"}
}"#;

/// A command the demo runner was asked to execute
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub credential_names: Vec<String>,
}

impl RecordedInvocation {
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    exit_code: i32,
    output: String,
}

/// Process runner that simulates the infrastructure and auth tools
#[derive(Debug, Default)]
pub struct DemoRunner {
    missing: HashSet<String>,
    failures: HashMap<(String, String), ScriptedFailure>,
    outputs: HashMap<(String, String), String>,
    delays: HashMap<(String, String), Duration>,
    lost_plans: AtomicUsize,
    invocations: Mutex<Vec<RecordedInvocation>>,
}

fn key(program: &str, subcommand: &str) -> (String, String) {
    (program.to_string(), subcommand.to_string())
}

impl DemoRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launching `program` fails as if the binary were not installed
    pub fn missing_tool(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    /// `program subcommand ...` exits with `exit_code`, printing `output`
    pub fn fail_on(mut self, program: &str, subcommand: &str, exit_code: i32, output: &str) -> Self {
        self.failures.insert(
            key(program, subcommand),
            ScriptedFailure {
                exit_code,
                output: output.to_string(),
            },
        );
        self
    }

    /// Replace the canned output of `program subcommand ...`
    pub fn respond(mut self, program: &str, subcommand: &str, output: &str) -> Self {
        self.outputs.insert(key(program, subcommand), output.to_string());
        self
    }

    /// Hold `program subcommand ...` for `delay` before answering
    pub fn delay(mut self, program: &str, subcommand: &str, delay: Duration) -> Self {
        self.delays.insert(key(program, subcommand), delay);
        self
    }

    /// The next `count` plan runs succeed without writing their artifact
    pub fn lose_plan_artifacts(self, count: usize) -> Self {
        self.lost_plans.store(count, Ordering::SeqCst);
        self
    }

    /// Every invocation received so far, in order
    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, invocation: &Invocation) {
        let recorded = RecordedInvocation {
            program: invocation.program.clone(),
            args: invocation.args.clone(),
            working_dir: invocation.working_dir.clone(),
            credential_names: invocation.credentials.names().map(str::to_string).collect(),
        };
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(recorded);
    }

    async fn simulate(&self, invocation: &Invocation, subcommand: &str) -> Result<String, ProcessError> {
        if let Some(output) = self.outputs.get(&key(&invocation.program, subcommand)) {
            return Ok(output.clone());
        }

        let output = match subcommand {
            "version" => format!("{} demo 1.0.0", invocation.program),
            "init" => "Initializing the backend...\nTerraform has been successfully initialized!".to_string(),
            "plan" => {
                let lost = self
                    .lost_plans
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if let Some(plan_file) = plan_out_path(invocation).filter(|_| !lost) {
                    if let Some(parent) = plan_file.parent() {
                        tokio::fs::create_dir_all(parent).await.map_err(|source| {
                            ProcessError::Launch {
                                program: invocation.program.clone(),
                                source,
                            }
                        })?;
                    }
                    tokio::fs::write(&plan_file, b"demo plan").await.map_err(|source| {
                        ProcessError::Launch {
                            program: invocation.program.clone(),
                            source,
                        }
                    })?;
                }
                "Plan: 2 to add, 0 to change, 0 to destroy.".to_string()
            }
            "apply" => {
                if let Some(plan_file) = apply_plan_path(invocation) {
                    if tokio::fs::metadata(&plan_file).await.is_err() {
                        return Err(ProcessError::Failed {
                            program: invocation.program.clone(),
                            exit_code: 1,
                            output: format!("Error: Failed to load \"{}\" as a plan file", plan_file.display()),
                        });
                    }
                }
                "Apply complete! Resources: 2 added, 0 changed, 0 destroyed.".to_string()
            }
            "output" => DEMO_OUTPUTS.to_string(),
            "account" => DEMO_ACCOUNT.to_string(),
            "login" => "Demo login complete.".to_string(),
            _ => String::new(),
        };
        Ok(output)
    }
}

/// `-out=<file>` resolved against the working directory
fn plan_out_path(invocation: &Invocation) -> Option<PathBuf> {
    let name = invocation.args.iter().find_map(|a| a.strip_prefix("-out="))?;
    Some(resolve(invocation, name))
}

/// Trailing non-flag argument of `apply`, i.e. the saved plan
fn apply_plan_path(invocation: &Invocation) -> Option<PathBuf> {
    let last = invocation.args.iter().skip(1).last()?;
    if last.starts_with('-') {
        return None;
    }
    Some(resolve(invocation, last))
}

fn resolve(invocation: &Invocation, name: &str) -> PathBuf {
    match &invocation.working_dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

#[async_trait]
impl ProcessRunner for DemoRunner {
    async fn run(&self, invocation: Invocation) -> Result<String, ProcessError> {
        self.record(&invocation);

        if self.missing.contains(&invocation.program) {
            return Err(ProcessError::Launch {
                program: invocation.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
            });
        }

        let subcommand = invocation.subcommand().unwrap_or_default().to_string();

        if let Some(delay) = self.delays.get(&key(&invocation.program, &subcommand)) {
            tokio::select! {
                _ = tokio::time::sleep(*delay) => {}
                _ = invocation.cancel.cancelled() => {
                    return Err(ProcessError::Cancelled {
                        program: invocation.program.clone(),
                        output: String::new(),
                    });
                }
            }
        }

        if let Some(failure) = self.failures.get(&key(&invocation.program, &subcommand)) {
            for line in failure.output.lines() {
                invocation.emit(line);
            }
            return Err(ProcessError::Failed {
                program: invocation.program.clone(),
                exit_code: failure.exit_code,
                output: failure.output.clone(),
            });
        }

        let output = self.simulate(&invocation, &subcommand).await?;
        for line in output.lines() {
            invocation.emit(line);
        }
        Ok(output)
    }
}
