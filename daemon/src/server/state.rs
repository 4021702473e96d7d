//! Server state

use std::sync::Arc;

use crate::bundle::BundleSource;
use crate::registry::DeploymentRegistry;

/// Server state shared across handlers
pub struct ServerState {
    pub registry: Arc<DeploymentRegistry>,
    pub bundles: Arc<dyn BundleSource>,
}

impl ServerState {
    pub fn new(registry: Arc<DeploymentRegistry>, bundles: Arc<dyn BundleSource>) -> Self {
        Self { registry, bundles }
    }
}
