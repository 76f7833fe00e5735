//! Finite state machine for deployments

use chrono::Utc;

use crate::errors::{PipelineError, PipelineResult};
use crate::models::deployment::{Deployment, DeploymentStatus};

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Start publishing
    Deploy,

    /// Deployment completed successfully
    DeploySuccess,

    /// Deployment failed
    DeployFailed(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: DeploymentStatus::Pending,
            error: None,
        }
    }

    /// Resume from a persisted state
    pub fn resume(state: DeploymentStatus) -> Self {
        Self { state, error: None }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // From Pending
            (DeploymentStatus::Pending, DeploymentEvent::Deploy) => {
                self.error = None;
                DeploymentStatus::Deploying
            }

            // From Deploying
            (DeploymentStatus::Deploying, DeploymentEvent::DeploySuccess) => {
                DeploymentStatus::Deployed
            }

            // A pending deployment fails when it never gets to publish
            (
                DeploymentStatus::Pending | DeploymentStatus::Deploying,
                DeploymentEvent::DeployFailed(err),
            ) => {
                if err.trim().is_empty() {
                    return Err("A failed deployment requires a reason".to_string());
                }
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!(
                    "Invalid transition: {:?} -> {:?}",
                    state, event
                ));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl Deployment {
    /// Apply an event; rejected transitions leave the deployment unchanged
    pub fn apply(&mut self, event: DeploymentEvent) -> PipelineResult<()> {
        let mut fsm = DeploymentFsm::resume(self.status);
        fsm.process(event).map_err(|e| {
            PipelineError::Conflict(format!("deployment {}: {}", self.id, e))
        })?;

        let now = Utc::now();
        match fsm.state() {
            DeploymentStatus::Deploying => self.started_at = Some(now),
            DeploymentStatus::Deployed => self.ended_at = Some(now),
            DeploymentStatus::Failed => {
                self.error = fsm.error().map(str::to_string);
                self.ended_at = Some(now);
            }
            DeploymentStatus::Pending => {}
        }
        self.status = fsm.state();
        Ok(())
    }
}
