//! Server state

use std::sync::Arc;
use std::time::Instant;

use crate::pipeline::Pipeline;

/// Server state shared across handlers
pub struct ServerState {
    pub pipeline: Arc<Pipeline>,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(pipeline: Arc<Pipeline>, started_at: Instant) -> Self {
        Self {
            pipeline,
            started_at,
        }
    }
}
