//! Agent logger (C14): an operator-facing structured-logging facade over
//! `tracing`, distinct from the audited [`crate::proof::ProofLog`] trail.

use crate::types::{Action, State};

#[derive(Debug, Clone, Default)]
pub struct AgentLogger {
    agent_id: String,
}

impl AgentLogger {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }

    pub fn log_state_transition(&self, from: State, to: State, reason: &str) {
        tracing::info!(agent_id = %self.agent_id, ?from, ?to, reason, "state transition");
    }

    pub fn log_decision(&self, app: &str, action: Action, confidence: f64, source: &str) {
        tracing::info!(
            agent_id = %self.agent_id,
            app,
            action = %action,
            confidence,
            source,
            "decision made"
        );
    }

    pub fn log_observation(&self, app: &str, event_type: &str) {
        tracing::debug!(agent_id = %self.agent_id, app, event_type, "perception observed");
    }

    pub fn log_error(&self, operation: &str, error: &str) {
        tracing::error!(agent_id = %self.agent_id, operation, error, "cycle error");
    }
}
