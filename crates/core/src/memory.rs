//! Agent memory (C2): bounded recall of recent decisions and app state, plus
//! the signals derived from them on demand (never cached across cycles).

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Action, AppStateSnapshot, DecisionOutcome, DecisionRecord, MemorySignals};

/// Two bounded FIFOs: a global decision history and a per-app state history.
pub struct AgentMemory {
    decision_capacity: usize,
    app_state_capacity: usize,
    decisions: VecDeque<DecisionRecord>,
    app_states: HashMap<String, VecDeque<AppStateSnapshot>>,
    total_decisions_seen: u64,
}

/// Plain-data snapshot of `AgentMemory`, used for persistence across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub decision_capacity: usize,
    pub app_state_capacity: usize,
    pub decisions: Vec<DecisionRecord>,
    pub app_states: HashMap<String, Vec<AppStateSnapshot>>,
    pub total_decisions_seen: u64,
}

/// Operator/test-facing counters, mirroring `get_memory_stats()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub decision_count: usize,
    pub decision_capacity: usize,
    pub app_count: usize,
    pub app_state_capacity: usize,
    pub total_decisions_seen: u64,
    pub decisions_evicted: u64,
}

/// The verdict and supporting evidence from `should_override_decision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideResult {
    pub override_applied: bool,
    pub override_decision: Option<Action>,
    pub override_reason: Option<String>,
    pub memory_signals: MemorySignals,
}

impl AgentMemory {
    pub fn new(decision_capacity: usize, app_state_capacity: usize) -> Self {
        Self {
            decision_capacity,
            app_state_capacity,
            decisions: VecDeque::with_capacity(decision_capacity),
            app_states: HashMap::new(),
            total_decisions_seen: 0,
        }
    }

    pub fn remember_decision(&mut self, decision: DecisionRecord) {
        self.total_decisions_seen += 1;
        if self.decisions.len() == self.decision_capacity {
            self.decisions.pop_front();
        }
        self.decisions.push_back(decision);
    }

    pub fn remember_app_state(
        &mut self,
        app_id: &str,
        status: &str,
        health: Value,
        recent_events: Vec<String>,
        metrics: Option<Value>,
    ) {
        let snapshot = AppStateSnapshot {
            timestamp: chrono::Utc::now(),
            app_id: app_id.to_string(),
            status: status.to_string(),
            health,
            recent_events,
            metrics,
        };
        let entry = self
            .app_states
            .entry(app_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.app_state_capacity));
        if entry.len() == self.app_state_capacity {
            entry.pop_front();
        }
        entry.push_back(snapshot);
    }

    pub fn recall_recent_decisions(&self, limit: usize) -> Vec<&DecisionRecord> {
        self.decisions.iter().rev().take(limit).collect()
    }

    pub fn recall_app_history(&self, app: &str, limit: usize) -> Vec<&AppStateSnapshot> {
        self.app_states
            .get(app)
            .map(|history| history.iter().rev().take(limit).collect())
            .unwrap_or_default()
    }

    /// Derive the aggregate signals consulted by self-restraint and the
    /// arbitrator from the last `lookback` decisions, optionally scoped to
    /// one `app`.
    pub fn get_memory_context(&self, app: Option<&str>, lookback: usize) -> MemorySignals {
        // Oldest-to-newest, so `repeated_actions` measures consecutive runs
        // in the order decisions actually happened.
        let recent: Vec<&DecisionRecord> = self
            .decisions
            .iter()
            .rev()
            .filter(|d| app.map(|a| d.app == a).unwrap_or(true))
            .take(lookback)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let recent_failures = recent
            .iter()
            .filter(|d| d.outcome == DecisionOutcome::Failure)
            .count() as u32;
        let recent_successes = recent
            .iter()
            .filter(|d| d.outcome == DecisionOutcome::Success)
            .count() as u32;

        let recent_actions: Vec<Action> = recent.iter().map(|d| d.action).collect();

        let mut repeated_actions: u32 = 0;
        let mut run: u32 = 0;
        let mut last_action: Option<Action> = None;
        for action in &recent_actions {
            if Some(*action) == last_action {
                run += 1;
            } else {
                run = 1;
                last_action = Some(*action);
            }
            repeated_actions = repeated_actions.max(run);
        }

        let total = recent.len() as f64;
        let instability_score = if total == 0.0 {
            0.0
        } else {
            100.0 * recent_failures as f64 / total
        };

        MemorySignals {
            recent_failures,
            recent_successes,
            recent_actions,
            repeated_actions,
            instability_score,
            last_action_outcome: recent.last().map(|d| d.outcome),
        }
    }

    /// The three-rule override check of spec.md §4.2: recent failures win
    /// over repetition suppression, which wins over raw instability.
    pub fn should_override_decision(
        &self,
        app: Option<&str>,
        failure_threshold: u32,
        repetition_threshold: u32,
    ) -> OverrideResult {
        let signals = self.get_memory_context(app, 10);

        if signals.recent_failures >= failure_threshold {
            return OverrideResult {
                override_applied: true,
                override_decision: Some(Action::Noop),
                override_reason: Some("recent failures".to_string()),
                memory_signals: signals,
            };
        }

        if signals.repeated_actions >= repetition_threshold {
            return OverrideResult {
                override_applied: true,
                // `observe` is not part of the action vocabulary; callers
                // read `override_reason`/the absence of `override_decision`
                // semantics via the runtime's `observed_only` flag instead.
                override_decision: None,
                override_reason: Some("repetition suppression".to_string()),
                memory_signals: signals,
            };
        }

        if signals.instability_score > 66.0 {
            return OverrideResult {
                override_applied: true,
                override_decision: Some(Action::Noop),
                override_reason: Some("instability".to_string()),
                memory_signals: signals,
            };
        }

        OverrideResult {
            override_applied: false,
            override_decision: None,
            override_reason: None,
            memory_signals: signals,
        }
    }

    pub fn get_memory_stats(&self) -> MemoryStats {
        MemoryStats {
            decision_count: self.decisions.len(),
            decision_capacity: self.decision_capacity,
            app_count: self.app_states.len(),
            app_state_capacity: self.app_state_capacity,
            total_decisions_seen: self.total_decisions_seen,
            decisions_evicted: self.total_decisions_seen.saturating_sub(self.decisions.len() as u64),
        }
    }

    pub fn clear(&mut self) {
        self.decisions.clear();
        self.app_states.clear();
        self.total_decisions_seen = 0;
    }

    pub fn to_snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            decision_capacity: self.decision_capacity,
            app_state_capacity: self.app_state_capacity,
            decisions: self.decisions.iter().cloned().collect(),
            app_states: self
                .app_states
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().cloned().collect()))
                .collect(),
            total_decisions_seen: self.total_decisions_seen,
        }
    }

    pub fn from_snapshot(snapshot: MemorySnapshot) -> Self {
        Self {
            decision_capacity: snapshot.decision_capacity,
            app_state_capacity: snapshot.app_state_capacity,
            decisions: snapshot.decisions.into_iter().collect(),
            app_states: snapshot
                .app_states
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().collect()))
                .collect(),
            total_decisions_seen: snapshot.total_decisions_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn decision(app: &str, action: Action, outcome: DecisionOutcome) -> DecisionRecord {
        DecisionRecord {
            timestamp: Utc::now(),
            app: app.to_string(),
            env: "dev".to_string(),
            action,
            confidence: 0.5,
            source: "test".to_string(),
            reason: "test".to_string(),
            observed_only: false,
            outcome,
            context: serde_json::json!({}),
        }
    }

    #[test]
    fn decision_fifo_evicts_oldest() {
        let mut mem = AgentMemory::new(2, 2);
        mem.remember_decision(decision("a", Action::Noop, DecisionOutcome::Success));
        mem.remember_decision(decision("a", Action::Restart, DecisionOutcome::Success));
        mem.remember_decision(decision("a", Action::Rollback, DecisionOutcome::Success));

        let recent = mem.recall_recent_decisions(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, Action::Rollback);

        let stats = mem.get_memory_stats();
        assert_eq!(stats.decisions_evicted, 1);
        assert_eq!(stats.total_decisions_seen, 3);
    }

    #[test]
    fn instability_score_is_percent_of_failures() {
        let mut mem = AgentMemory::new(10, 10);
        mem.remember_decision(decision("a", Action::Restart, DecisionOutcome::Failure));
        mem.remember_decision(decision("a", Action::Restart, DecisionOutcome::Success));
        mem.remember_decision(decision("a", Action::Restart, DecisionOutcome::Success));
        mem.remember_decision(decision("a", Action::Restart, DecisionOutcome::Success));

        let signals = mem.get_memory_context(Some("a"), 10);
        assert_eq!(signals.recent_failures, 1);
        assert_eq!(signals.recent_successes, 3);
        assert_eq!(signals.instability_score, 25.0);
    }

    #[test]
    fn repeated_actions_counts_longest_consecutive_run() {
        let mut mem = AgentMemory::new(10, 10);
        mem.remember_decision(decision("a", Action::ScaleUp, DecisionOutcome::Success));
        mem.remember_decision(decision("a", Action::ScaleUp, DecisionOutcome::Success));
        mem.remember_decision(decision("a", Action::Noop, DecisionOutcome::Noop));
        mem.remember_decision(decision("a", Action::ScaleUp, DecisionOutcome::Success));

        let signals = mem.get_memory_context(Some("a"), 10);
        assert_eq!(signals.repeated_actions, 2);
    }

    #[test]
    fn override_fires_on_recent_failures_before_anything_else() {
        let mut mem = AgentMemory::new(10, 10);
        for _ in 0..3 {
            mem.remember_decision(decision("a", Action::Restart, DecisionOutcome::Failure));
        }
        let result = mem.should_override_decision(Some("a"), 3, 3);
        assert!(result.override_applied);
        assert_eq!(result.override_decision, Some(Action::Noop));
        assert_eq!(result.override_reason.as_deref(), Some("recent failures"));
    }

    #[test]
    fn override_suppresses_repetition_when_not_failing() {
        let mut mem = AgentMemory::new(10, 10);
        for _ in 0..3 {
            mem.remember_decision(decision("a", Action::ScaleUp, DecisionOutcome::Success));
        }
        let result = mem.should_override_decision(Some("a"), 3, 3);
        assert!(result.override_applied);
        assert_eq!(result.override_decision, None);
        assert_eq!(result.override_reason.as_deref(), Some("repetition suppression"));
    }

    #[test]
    fn no_override_when_signals_are_healthy() {
        let mut mem = AgentMemory::new(10, 10);
        mem.remember_decision(decision("a", Action::ScaleUp, DecisionOutcome::Success));
        mem.remember_decision(decision("a", Action::ScaleDown, DecisionOutcome::Success));
        let result = mem.should_override_decision(Some("a"), 3, 3);
        assert!(!result.override_applied);
    }

    #[test]
    fn snapshot_round_trip_preserves_state() {
        let mut mem = AgentMemory::new(5, 5);
        mem.remember_decision(decision("a", Action::Restart, DecisionOutcome::Success));
        mem.remember_app_state(
            "a",
            "active",
            serde_json::json!({"last_action": "executed"}),
            vec!["action_executed".to_string(), "loop_0".to_string()],
            None,
        );

        let snapshot = mem.to_snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored_snapshot: MemorySnapshot = serde_json::from_str(&json).unwrap();
        let restored = AgentMemory::from_snapshot(restored_snapshot);

        assert_eq!(restored.get_memory_stats().decision_count, 1);
        assert_eq!(restored.recall_app_history("a", 10).len(), 1);
    }
}
