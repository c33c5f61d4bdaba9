//! Append-only proof log (C1).
//!
//! Every component in the cycle writes one `ProofEvent` per decision point.
//! Writes are best-effort: a failure is counted but never propagated, since
//! a broken audit trail must not stop the agent from acting.

use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::types::ProofEvent;

/// Canonical proof event names. The upper-snake-case constants mirror the
/// literal vocabulary spec.md §3 enumerates (itself grounded in
/// `examples/original_source/core/proof_logger.py`'s `ProofEvents` enum);
/// the lower-snake-case ones are cycle-internal checkpoints the distillation
/// didn't name but the control loop still needs to audit.
pub mod events {
    // Cycle-internal checkpoints (supplementary, not in spec.md's named list).
    pub const CYCLE_STARTED: &str = "cycle_started";
    pub const MEMORY_OVERRIDE: &str = "memory_override";
    pub const ADVISOR_FALLBACK: &str = "advisor_fallback";
    pub const RULE_DECISION: &str = "rule_decision";
    pub const OBSERVE_INSTEAD_OF_ACT: &str = "observe_instead_of_act";
    pub const GOVERNANCE_DECISION: &str = "governance_decision";
    pub const CYCLE_COMPLETED: &str = "cycle_completed";
    pub const CYCLE_BLOCKED: &str = "cycle_blocked";

    // Canonical vocabulary from spec.md §3 / the original `ProofEvents` enum.
    pub const RUNTIME_EMIT: &str = "RUNTIME_EMIT";
    pub const RL_CONSUME: &str = "RL_CONSUME";
    pub const RL_DECISION: &str = "RL_DECISION";
    pub const RL_VALIDATION_PASSED: &str = "RL_VALIDATION_PASSED";
    pub const RL_VALIDATION_FAILED: &str = "RL_VALIDATION_FAILED";
    pub const RL_UNSAFE_REFUSED: &str = "RL_UNSAFE_REFUSED";
    pub const ORCH_EXEC: &str = "ORCH_EXEC";
    pub const ORCH_REFUSE: &str = "ORCH_REFUSE";
    pub const SYSTEM_STABLE: &str = "SYSTEM_STABLE";
    pub const DEMO_MODE_BLOCK: &str = "DEMO_MODE_BLOCK";
    pub const EXECUTION_GATE_PASSED: &str = "EXECUTION_GATE_PASSED";
    pub const UNSAFE_ACTION_REFUSED: &str = "UNSAFE_ACTION_REFUSED";
    pub const RL_INTAKE_VALIDATED: &str = "RL_INTAKE_VALIDATED";
    /// Reserved for fault-injection demo harnesses (out of scope here, per
    /// spec.md's Non-goals on external demo tooling); the core cycle never
    /// writes this itself, but the name is part of the event vocabulary a
    /// proof-log reader must tolerate.
    pub const FAILURE_INJECTED: &str = "FAILURE_INJECTED";
}

/// Append-only JSONL proof log sink.
pub struct ProofLog {
    path: PathBuf,
    file: Mutex<std::fs::File>,
    write_failures: AtomicU64,
    events_written: AtomicU64,
}

impl ProofLog {
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            write_failures: AtomicU64::new(0),
            events_written: AtomicU64::new(0),
        })
    }

    /// Append one proof event. Never returns an error to the caller — on
    /// failure the write is dropped and the failure counter is incremented.
    pub fn write_proof(&self, event: &str, payload: Value) {
        let record = ProofEvent {
            event: event.to_string(),
            timestamp: chrono::Utc::now(),
            payload,
        };

        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize proof event");
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(guard, "{line}") {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to append proof event");
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.events_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of writes that failed since this sink was opened.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Number of events successfully appended since this sink was opened.
    pub fn events_written(&self) -> u64 {
        self.events_written.load(Ordering::Relaxed)
    }

    /// Health snapshot for operator introspection.
    pub fn health(&self) -> ProofLogHealth {
        ProofLogHealth {
            path: self.path.clone(),
            write_failures: self.write_failures(),
            events_written: self.events_written(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProofLogHealth {
    pub path: PathBuf,
    pub write_failures: u64,
    pub events_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appends_events_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proof.jsonl");
        let log = ProofLog::open(&path).unwrap();

        log.write_proof(events::CYCLE_STARTED, json!({"app": "svc-a"}));
        log.write_proof(events::CYCLE_COMPLETED, json!({"app": "svc-a"}));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(events::CYCLE_STARTED));
        assert!(lines[1].contains(events::CYCLE_COMPLETED));
        assert_eq!(log.write_failures(), 0);
        assert_eq!(log.events_written(), 2);
    }

    #[test]
    fn reopen_appends_rather_than_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proof.jsonl");
        {
            let log = ProofLog::open(&path).unwrap();
            log.write_proof(events::CYCLE_STARTED, json!({}));
        }
        {
            let log = ProofLog::open(&path).unwrap();
            log.write_proof(events::CYCLE_COMPLETED, json!({}));
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
