//! Finite State Machine for server creation

use serde::{Deserialize, Serialize};

/// Creation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreationState {
    /// Nothing started yet
    Pending,

    /// VM and network being built
    Provisioning,

    /// Payload being mirrored and launched
    Deploying,

    /// Target being written to the registry
    Registering,

    /// Server is up and registered
    Completed,

    /// A stage failed; see [`CreationFsm::failed_in`]
    Failed,
}

impl CreationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CreationState::Completed | CreationState::Failed)
    }
}

impl std::fmt::Display for CreationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CreationState::Pending => "pending",
            CreationState::Provisioning => "provisioning",
            CreationState::Deploying => "deploying",
            CreationState::Registering => "registering",
            CreationState::Completed => "completed",
            CreationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Creation event
#[derive(Debug, Clone)]
pub enum CreationEvent {
    /// Start provisioning
    Provision,

    /// VM is ready
    Provisioned,

    /// Payload is running on the VM
    Deployed,

    /// Target stored
    Registered,

    /// The current stage failed
    Fail(String),
}

/// Creation FSM
#[derive(Debug, Clone)]
pub struct CreationFsm {
    state: CreationState,
    failed_in: Option<CreationState>,
    error: Option<String>,
}

impl CreationFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: CreationState::Pending,
            failed_in: None,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> CreationState {
        self.state
    }

    /// Stage that was active when the run failed
    pub fn failed_in(&self) -> Option<CreationState> {
        self.failed_in
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: CreationEvent) -> Result<CreationState, String> {
        let new_state = match (self.state, &event) {
            (CreationState::Pending, CreationEvent::Provision) => CreationState::Provisioning,
            (CreationState::Provisioning, CreationEvent::Provisioned) => CreationState::Deploying,
            (CreationState::Deploying, CreationEvent::Deployed) => CreationState::Registering,
            (CreationState::Registering, CreationEvent::Registered) => CreationState::Completed,

            (state, CreationEvent::Fail(err)) if !state.is_terminal() => {
                self.failed_in = Some(state);
                self.error = Some(err.clone());
                CreationState::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for CreationFsm {
    fn default() -> Self {
        Self::new()
    }
}
