//! In-memory registry of deployment jobs

pub mod deployments;
pub mod entry;

pub use deployments::{DeploymentRegistry, NewDeployment};
pub use entry::JobEntry;
