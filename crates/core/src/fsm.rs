//! Agent finite-state machine (C11): the fixed legality table governing
//! which states one cycle may move through, plus JSON persistence keyed by
//! agent id.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, FsmError, State};

/// One recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub timestamp: DateTime<Utc>,
    pub from: State,
    pub to: State,
    pub reason: String,
}

/// Persisted FSM state, written on graceful shutdown and restored on boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStateSnapshot {
    pub agent_id: AgentId,
    pub current: State,
    pub history: Vec<TransitionRecord>,
}

pub struct AgentFsm {
    agent_id: AgentId,
    current: State,
    history: Vec<TransitionRecord>,
}

fn valid_transitions() -> HashMap<State, Vec<State>> {
    use State::*;
    HashMap::from([
        (Idle, vec![Sensing, ShuttingDown]),
        (Sensing, vec![Validating, Idle, Blocked]),
        (Validating, vec![Deciding, Idle, Blocked]),
        (Deciding, vec![Governing, Blocked]),
        (Governing, vec![Executing, Idle, Blocked]),
        (Executing, vec![Observing, Blocked]),
        (Observing, vec![Explaining, Blocked]),
        (Explaining, vec![Idle, Blocked]),
        (Blocked, vec![Idle, ShuttingDown]),
        (ShuttingDown, vec![]),
    ])
}

impl AgentFsm {
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            current: State::Idle,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> State {
        self.current
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Move from the current state to `to`. Illegal transitions are a
    /// programming bug, not an operational failure, so this is the one
    /// place in the cycle that is not absorbed silently at the call site.
    pub fn transition_to(&mut self, to: State, reason: impl Into<String>) -> Result<(), FsmError> {
        let table = valid_transitions();
        let allowed = table.get(&self.current).cloned().unwrap_or_default();
        if !allowed.contains(&to) {
            return Err(FsmError::IllegalTransition {
                from: format!("{:?}", self.current),
                to: format!("{to:?}"),
            });
        }

        self.history.push(TransitionRecord {
            timestamp: Utc::now(),
            from: self.current,
            to,
            reason: reason.into(),
        });
        self.current = to;
        Ok(())
    }

    /// Unconditionally normalize back to `Idle`, used by the cycle's
    /// `finally`-style guard regardless of how the cycle ended. `Idle` is
    /// reachable from every non-terminal state via `Blocked`, so this never
    /// fails in practice; it is written as a fallible call so a future
    /// terminal state added to the table cannot silently wedge the agent.
    pub fn normalize_to_idle(&mut self, reason: impl Into<String>) -> Result<(), FsmError> {
        if self.current == State::Idle {
            return Ok(());
        }
        if self.current != State::Blocked {
            self.transition_to(State::Blocked, "cycle ended abnormally, routing through blocked")?;
        }
        self.transition_to(State::Idle, reason)
    }

    pub fn to_snapshot(&self) -> AgentStateSnapshot {
        AgentStateSnapshot {
            agent_id: self.agent_id,
            current: self.current,
            history: self.history.clone(),
        }
    }

    pub fn from_snapshot(snapshot: AgentStateSnapshot, expected_agent_id: AgentId) -> Result<Self, FsmError> {
        if snapshot.agent_id != expected_agent_id {
            return Err(FsmError::AgentIdMismatch {
                found: snapshot.agent_id.to_string(),
                expected: expected_agent_id.to_string(),
            });
        }
        Ok(Self {
            agent_id: snapshot.agent_id,
            current: snapshot.current,
            history: snapshot.history,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::types::PersistenceError> {
        let snapshot = self.to_snapshot();
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| crate::types::PersistenceError::SerdeError(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| crate::types::PersistenceError::WriteFailed {
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn load<P: AsRef<Path>>(
        path: P,
        expected_agent_id: AgentId,
    ) -> Result<Self, crate::types::PersistenceError> {
        let contents =
            std::fs::read_to_string(&path).map_err(|e| crate::types::PersistenceError::ReadFailed {
                path: path.as_ref().display().to_string(),
                reason: e.to_string(),
            })?;
        let snapshot: AgentStateSnapshot = serde_json::from_str(&contents)
            .map_err(|e| crate::types::PersistenceError::SerdeError(e.to_string()))?;
        Self::from_snapshot(snapshot, expected_agent_id)
            .map_err(|e| crate::types::PersistenceError::SerdeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_path_through_a_full_cycle_succeeds() {
        let mut fsm = AgentFsm::new(AgentId::new());
        fsm.transition_to(State::Sensing, "sense").unwrap();
        fsm.transition_to(State::Validating, "validate").unwrap();
        fsm.transition_to(State::Deciding, "decide").unwrap();
        fsm.transition_to(State::Governing, "govern").unwrap();
        fsm.transition_to(State::Executing, "execute").unwrap();
        fsm.transition_to(State::Observing, "observe").unwrap();
        fsm.transition_to(State::Explaining, "explain").unwrap();
        fsm.transition_to(State::Idle, "idle").unwrap();
        assert_eq!(fsm.current(), State::Idle);
        assert_eq!(fsm.history().len(), 8);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut fsm = AgentFsm::new(AgentId::new());
        let result = fsm.transition_to(State::Executing, "skip ahead");
        assert!(matches!(result, Err(FsmError::IllegalTransition { .. })));
    }

    #[test]
    fn normalize_to_idle_routes_through_blocked_on_abnormal_exit() {
        let mut fsm = AgentFsm::new(AgentId::new());
        fsm.transition_to(State::Sensing, "sense").unwrap();
        fsm.normalize_to_idle("cycle error").unwrap();
        assert_eq!(fsm.current(), State::Idle);
    }

    #[test]
    fn snapshot_round_trip_preserves_state() {
        let agent_id = AgentId::new();
        let mut fsm = AgentFsm::new(agent_id);
        fsm.transition_to(State::Sensing, "sense").unwrap();
        let snapshot = fsm.to_snapshot();
        let restored = AgentFsm::from_snapshot(snapshot, agent_id).unwrap();
        assert_eq!(restored.current(), State::Sensing);
    }

    #[test]
    fn load_rejects_agent_id_mismatch() {
        let mut fsm = AgentFsm::new(AgentId::new());
        fsm.transition_to(State::Sensing, "sense").unwrap();
        let snapshot = fsm.to_snapshot();
        let result = AgentFsm::from_snapshot(snapshot, AgentId::new());
        assert!(matches!(result, Err(FsmError::AgentIdMismatch { .. })));
    }
}
