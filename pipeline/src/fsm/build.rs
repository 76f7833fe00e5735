//! Finite state machine for build jobs

use chrono::Utc;

use crate::errors::{PipelineError, PipelineResult};
use crate::models::build::{BuildJob, BuildOutput, BuildStatus};

/// Build event
#[derive(Debug, Clone)]
pub enum BuildEvent {
    /// A worker picked the job up
    Start,

    /// The builder produced an artifact
    Complete(BuildOutput),

    /// The build failed with a reason
    Fail(String),

    /// Explicit cancel request
    Cancel,
}

impl BuildEvent {
    fn name(&self) -> &'static str {
        match self {
            BuildEvent::Start => "start",
            BuildEvent::Complete(_) => "complete",
            BuildEvent::Fail(_) => "fail",
            BuildEvent::Cancel => "cancel",
        }
    }
}

/// Build FSM
#[derive(Debug, Clone)]
pub struct BuildFsm {
    state: BuildStatus,
}

impl BuildFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: BuildStatus::Pending,
        }
    }

    /// Resume from a persisted state
    pub fn resume(state: BuildStatus) -> Self {
        Self { state }
    }

    /// Get current state
    pub fn state(&self) -> BuildStatus {
        self.state
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: &BuildEvent) -> Result<(), String> {
        let new_state = match (self.state, event) {
            (BuildStatus::Pending, BuildEvent::Start) => BuildStatus::Building,

            (BuildStatus::Building, BuildEvent::Complete(_)) => BuildStatus::Completed,

            (BuildStatus::Pending | BuildStatus::Building, BuildEvent::Fail(reason)) => {
                if reason.trim().is_empty() {
                    return Err("A failed build requires a reason".to_string());
                }
                BuildStatus::Failed
            }

            (BuildStatus::Pending | BuildStatus::Building, BuildEvent::Cancel) => {
                BuildStatus::Cancelled
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!(
                    "Invalid build transition: {} -> {}",
                    state.as_str(),
                    event.name()
                ));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for BuildFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildJob {
    /// Apply an event, updating status and the fields that travel with it.
    ///
    /// The job is left untouched when the transition is rejected.
    pub fn apply(&mut self, event: BuildEvent) -> PipelineResult<()> {
        let mut fsm = BuildFsm::resume(self.status);
        fsm.process(&event).map_err(|e| {
            PipelineError::Conflict(format!("build {}: {}", self.id, e))
        })?;

        let now = Utc::now();
        match event {
            BuildEvent::Start => {
                self.started_at = Some(now);
            }
            BuildEvent::Complete(mut output) => {
                if let Some(started_at) = self.started_at {
                    output.stats.duration_ms = (now - started_at).num_milliseconds().max(0) as u64;
                }
                self.output = Some(output);
                self.ended_at = Some(now);
            }
            BuildEvent::Fail(reason) => {
                self.error = Some(reason);
                self.ended_at = Some(now);
            }
            BuildEvent::Cancel => {
                self.ended_at = Some(now);
            }
        }
        self.status = fsm.state();
        self.updated_at = now;
        Ok(())
    }
}
