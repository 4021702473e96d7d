//! Settings file management

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::DeploydError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write rolling log files under the layout's logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Infrastructure tool configuration
    #[serde(default)]
    pub terraform: TerraformSettings,

    /// Cloud authentication tool configuration
    #[serde(default)]
    pub auth: AuthSettings,

    /// Replace every external process with the simulated runner
    #[serde(default)]
    pub demo_mode: bool,

    /// Grace period for shutdown in seconds
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: ServerSettings::default(),
            terraform: TerraformSettings::default(),
            auth: AuthSettings::default(),
            demo_mode: false,
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file does not exist
    pub async fn load_or_default(file: &File) -> Result<Self, DeploydError> {
        if !file.exists().await {
            info!("No settings file at {}, using defaults", file.path().display());
            return Ok(Self::default());
        }
        file.read_json::<Settings>().await.map_err(|e| {
            DeploydError::ConfigError(format!(
                "Invalid settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Infrastructure-as-code tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerraformSettings {
    /// Binary name or path
    #[serde(default = "default_terraform_binary")]
    pub binary: String,

    /// Plan artifact file name inside each working directory
    #[serde(default = "default_plan_file")]
    pub plan_file: String,

    /// Append every tool output line to the job's updates as it arrives
    #[serde(default = "default_true")]
    pub stream_output: bool,
}

fn default_terraform_binary() -> String {
    "terraform".to_string()
}

fn default_plan_file() -> String {
    "tfplan".to_string()
}

impl Default for TerraformSettings {
    fn default() -> Self {
        Self {
            binary: default_terraform_binary(),
            plan_file: default_plan_file(),
            stream_output: true,
        }
    }
}

/// Cloud authentication tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Binary name or path
    #[serde(default = "default_auth_binary")]
    pub binary: String,

    /// Arguments for the login flow used when no credential is present
    #[serde(default = "default_login_args")]
    pub login_args: Vec<String>,

    /// Skip the login flow entirely; only pre-existing credentials are accepted
    #[serde(default)]
    pub disable_login: bool,
}

fn default_auth_binary() -> String {
    "az".to_string()
}

fn default_login_args() -> Vec<String> {
    vec!["login".to_string(), "--use-device-code".to_string()]
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            binary: default_auth_binary(),
            login_args: default_login_args(),
            disable_login: false,
        }
    }
}
