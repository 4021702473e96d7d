//! Application configuration options

use std::time::Duration;

use crate::deploy::credentials::CredentialMaterial;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{AuthSettings, Settings, TerraformSettings};

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Server configuration
    pub server: ServerOptions,

    /// Infrastructure tool configuration
    pub terraform: TerraformSettings,

    /// Cloud authentication tool configuration
    pub auth: AuthSettings,

    /// Service principal captured from the environment at startup
    pub credential_material: CredentialMaterial,

    /// Simulate every external tool
    pub demo_mode: bool,
}

impl AppOptions {
    /// Options from a settings file, with CLI overrides applied by the caller
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.shutdown_grace_secs),
            },
            layout,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            terraform: settings.terraform.clone(),
            auth: settings.auth.clone(),
            credential_material: CredentialMaterial::default(),
            demo_mode: settings.demo_mode,
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, including cancelled jobs winding
    /// down
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
