//! Cloud credential gate
//!
//! Tries each credential source in turn and records a diagnostic line for
//! every attempt, so a failed job explains itself from its log alone.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::deploy::process::{Credentials, Invocation, OutputSink, ProcessError, ProcessRunner};
use crate::storage::settings::AuthSettings;

pub const ENV_CLIENT_ID: &str = "ARM_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "ARM_CLIENT_SECRET";
pub const ENV_TENANT_ID: &str = "ARM_TENANT_ID";
pub const ENV_SUBSCRIPTION_ID: &str = "ARM_SUBSCRIPTION_ID";

/// Service principal material supplied out-of-band, captured once at startup
#[derive(Clone, Default)]
pub struct CredentialMaterial {
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    tenant_id: Option<String>,
    subscription_id: Option<String>,
}

impl CredentialMaterial {
    /// Read the `ARM_*` variables from the daemon's environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            client_id: get(ENV_CLIENT_ID),
            client_secret: get(ENV_CLIENT_SECRET).map(SecretString::from),
            tenant_id: get(ENV_TENANT_ID),
            subscription_id: get(ENV_SUBSCRIPTION_ID),
        }
    }

    /// All four variables are set
    pub fn is_present(&self) -> bool {
        self.missing().is_empty()
    }

    /// None of the variables are set
    pub fn is_empty(&self) -> bool {
        self.missing().len() == 4
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.client_id.is_none() {
            missing.push(ENV_CLIENT_ID);
        }
        if self.client_secret.is_none() {
            missing.push(ENV_CLIENT_SECRET);
        }
        if self.tenant_id.is_none() {
            missing.push(ENV_TENANT_ID);
        }
        if self.subscription_id.is_none() {
            missing.push(ENV_SUBSCRIPTION_ID);
        }
        missing
    }

    /// IDs that are not GUIDs, by variable name
    fn malformed(&self) -> Vec<&'static str> {
        [
            (ENV_CLIENT_ID, &self.client_id),
            (ENV_TENANT_ID, &self.tenant_id),
            (ENV_SUBSCRIPTION_ID, &self.subscription_id),
        ]
        .into_iter()
        .filter(|(_, value)| {
            value
                .as_deref()
                .is_some_and(|v| uuid::Uuid::parse_str(v.trim()).is_err())
        })
        .map(|(name, _)| name)
        .collect()
    }

    fn to_credentials(&self) -> Option<Credentials> {
        Some(
            Credentials::new()
                .with_var(ENV_CLIENT_ID, SecretString::from(self.client_id.clone()?))
                .with_var(ENV_CLIENT_SECRET, self.client_secret.clone()?)
                .with_var(ENV_TENANT_ID, SecretString::from(self.tenant_id.clone()?))
                .with_var(ENV_SUBSCRIPTION_ID, SecretString::from(self.subscription_id.clone()?)),
        )
    }
}

impl std::fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialMaterial")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("tenant_id", &self.tenant_id)
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

/// Outcome of the credential gate
#[derive(Debug, Clone, Default)]
pub struct AuthResult {
    /// A usable credential was obtained
    pub success: bool,

    /// The auth tool holds an active session
    pub is_logged_in: bool,

    /// One or more lines per credential source attempted
    pub diagnostic_lines: Vec<String>,

    /// Variables the infrastructure tool needs for this job
    pub credentials: Credentials,
}

/// Obtains a credential before any infrastructure change is attempted
#[async_trait]
pub trait CredentialGate: Send + Sync {
    /// Never fails; an unusable credential is reported through `success`
    async fn authenticate(&self, cancel: CancellationToken, on_output: Option<OutputSink>) -> AuthResult;
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    user: Option<AccountUser>,
}

#[derive(Debug, Deserialize)]
struct AccountUser {
    name: String,
}

impl AccountInfo {
    fn label(&self) -> String {
        let user = self
            .user
            .as_ref()
            .map(|u| u.name.as_str())
            .unwrap_or("unknown identity");
        match &self.name {
            Some(name) => format!("{} (subscription {}, {})", user, name, self.id),
            None => format!("{} (subscription {})", user, self.id),
        }
    }
}

enum SessionCheck {
    Active(AccountInfo),
    Inactive,
    ToolMissing,
    Cancelled,
}

/// Credential gate backed by the Azure CLI and `ARM_*` service principal
/// variables
pub struct CliCredentialGate {
    runner: Arc<dyn ProcessRunner>,
    settings: AuthSettings,
    material: CredentialMaterial,
}

impl CliCredentialGate {
    pub fn new(runner: Arc<dyn ProcessRunner>, settings: AuthSettings, material: CredentialMaterial) -> Self {
        Self {
            runner,
            settings,
            material,
        }
    }

    fn check_environment(&self, lines: &mut Vec<String>) -> Option<Credentials> {
        if self.material.is_empty() {
            lines.push(format!(
                "Environment: no service principal variables set ({}, {}, {}, {})",
                ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_TENANT_ID, ENV_SUBSCRIPTION_ID
            ));
            return None;
        }

        let missing = self.material.missing();
        if !missing.is_empty() {
            lines.push(format!(
                "Environment: service principal incomplete, missing {}",
                missing.join(", ")
            ));
            return None;
        }

        let malformed = self.material.malformed();
        if !malformed.is_empty() {
            lines.push(format!(
                "Environment: service principal rejected, {} must be GUIDs",
                malformed.join(", ")
            ));
            return None;
        }

        let credentials = self.material.to_credentials()?;
        lines.push(format!(
            "Environment: using service principal {} (tenant {}, subscription {})",
            self.material.client_id.as_deref().unwrap_or_default(),
            self.material.tenant_id.as_deref().unwrap_or_default(),
            self.material.subscription_id.as_deref().unwrap_or_default(),
        ));
        Some(credentials)
    }

    async fn check_session(&self, cancel: &CancellationToken, lines: &mut Vec<String>) -> SessionCheck {
        let invocation = Invocation::new(&self.settings.binary, ["account", "show", "--output", "json"])
            .cancel_token(cancel.clone());

        match self.runner.run(invocation).await {
            Ok(output) => match serde_json::from_str::<AccountInfo>(output.trim()) {
                Ok(account) => SessionCheck::Active(account),
                Err(e) => {
                    lines.push(format!(
                        "Session: `{} account show` returned unreadable output: {}",
                        self.settings.binary, e
                    ));
                    SessionCheck::Inactive
                }
            },
            Err(ProcessError::Launch { source, .. }) => {
                lines.push(format!(
                    "Session: {} not found or not executable ({})",
                    self.settings.binary, source
                ));
                SessionCheck::ToolMissing
            }
            Err(ProcessError::Failed { exit_code, output, .. }) => {
                let reason = output
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .unwrap_or("no output");
                lines.push(format!(
                    "Session: no active {} session (exit code {}): {}",
                    self.settings.binary, exit_code, reason
                ));
                SessionCheck::Inactive
            }
            Err(ProcessError::Cancelled { .. }) => SessionCheck::Cancelled,
        }
    }

    async fn login(
        &self,
        cancel: &CancellationToken,
        on_output: Option<OutputSink>,
        lines: &mut Vec<String>,
    ) -> Result<(), SessionCheck> {
        if self.settings.disable_login {
            lines.push("Login: interactive login disabled by configuration".to_string());
            return Err(SessionCheck::Inactive);
        }

        info!("No usable credential found, starting {} login flow", self.settings.binary);
        let captured = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink_captured = captured.clone();
        let sink: OutputSink = Arc::new(move |line: &str| {
            sink_captured
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(format!("Login: {}", line));
            if let Some(forward) = &on_output {
                forward(line);
            }
        });

        let invocation = Invocation::new(&self.settings.binary, self.settings.login_args.clone())
            .on_output(sink)
            .cancel_token(cancel.clone());
        let result = self.runner.run(invocation).await;

        lines.extend(captured.lock().unwrap_or_else(|e| e.into_inner()).drain(..));

        match result {
            Ok(_) => Ok(()),
            Err(ProcessError::Cancelled { .. }) => Err(SessionCheck::Cancelled),
            Err(ProcessError::Launch { source, .. }) => {
                lines.push(format!("Login: could not start {} ({})", self.settings.binary, source));
                Err(SessionCheck::ToolMissing)
            }
            Err(ProcessError::Failed { exit_code, .. }) => {
                lines.push(format!(
                    "Login: `{} {}` failed with exit code {}",
                    self.settings.binary,
                    self.settings.login_args.join(" "),
                    exit_code
                ));
                Err(SessionCheck::Inactive)
            }
        }
    }

    fn session_result(account: AccountInfo, mut lines: Vec<String>, how: &str) -> AuthResult {
        lines.push(format!("Session: {} as {}", how, account.label()));
        AuthResult {
            success: true,
            is_logged_in: true,
            diagnostic_lines: lines,
            credentials: Credentials::new()
                .with_var(ENV_SUBSCRIPTION_ID, SecretString::from(account.id)),
        }
    }

    fn cancelled(mut lines: Vec<String>) -> AuthResult {
        lines.push("Authentication cancelled".to_string());
        AuthResult {
            diagnostic_lines: lines,
            ..Default::default()
        }
    }
}

#[async_trait]
impl CredentialGate for CliCredentialGate {
    async fn authenticate(&self, cancel: CancellationToken, on_output: Option<OutputSink>) -> AuthResult {
        let mut lines = Vec::new();

        // 1. Service principal from the environment
        if let Some(credentials) = self.check_environment(&mut lines) {
            debug!("Authenticated with environment service principal");
            return AuthResult {
                success: true,
                is_logged_in: false,
                diagnostic_lines: lines,
                credentials,
            };
        }

        // 2. Existing CLI session
        match self.check_session(&cancel, &mut lines).await {
            SessionCheck::Active(account) => {
                return Self::session_result(account, lines, "authenticated with existing session");
            }
            SessionCheck::Cancelled => return Self::cancelled(lines),
            SessionCheck::ToolMissing => {
                lines.push("Login: skipped, auth tool unavailable".to_string());
                warn!("Authentication failed: {} is not available", self.settings.binary);
                return AuthResult {
                    diagnostic_lines: lines,
                    ..Default::default()
                };
            }
            SessionCheck::Inactive => {}
        }

        // 3. Login flow, then read back the identity
        match self.login(&cancel, on_output, &mut lines).await {
            Ok(()) => {}
            Err(SessionCheck::Cancelled) => return Self::cancelled(lines),
            Err(_) => {
                warn!("Authentication failed after {} attempts", lines.len());
                return AuthResult {
                    diagnostic_lines: lines,
                    ..Default::default()
                };
            }
        }

        match self.check_session(&cancel, &mut lines).await {
            SessionCheck::Active(account) => Self::session_result(account, lines, "logged in"),
            SessionCheck::Cancelled => Self::cancelled(lines),
            _ => {
                lines.push("Login: completed but no active session was found afterwards".to_string());
                AuthResult {
                    diagnostic_lines: lines,
                    ..Default::default()
                }
            }
        }
    }
}
