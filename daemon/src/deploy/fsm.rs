//! Finite State Machine for a deployment job

use deploy_api::DeploymentStatus;

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Start the credential check
    Authenticate,

    /// A usable credential was obtained
    Authenticated,

    /// Configuration staged and tool available
    Prepared,

    /// Plan artifact ready
    Planned,

    /// Changes applied
    Applied,

    /// Any stage failed
    Fail(String),
}

/// Deployment FSM
///
/// `failed` is reachable from every non-terminal state; terminal states accept
/// no events.
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in initializing state
    pub fn new() -> Self {
        Self {
            state: DeploymentStatus::Initializing,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStatus, String> {
        let new_state = match (self.state, &event) {
            (DeploymentStatus::Initializing, DeploymentEvent::Authenticate) => DeploymentStatus::Authenticating,
            (DeploymentStatus::Authenticating, DeploymentEvent::Authenticated) => DeploymentStatus::Preparing,
            (DeploymentStatus::Preparing, DeploymentEvent::Prepared) => DeploymentStatus::Planning,
            (DeploymentStatus::Planning, DeploymentEvent::Planned) => DeploymentStatus::Applying,
            (DeploymentStatus::Applying, DeploymentEvent::Applied) => DeploymentStatus::Completed,

            (state, DeploymentEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
