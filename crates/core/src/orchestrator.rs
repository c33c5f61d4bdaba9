//! Safe orchestrator (C10): the only component allowed to turn a decided
//! action into an executed one, behind three ordered gates. No gate, and no
//! handler, is ever allowed to throw — every outcome is a structured
//! `ActionResult`, because a broken execution path must fail closed, not
//! panic the cycle.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::proof::{events, ProofLog};
use crate::types::{Action, EnvironmentPolicy};

/// Per-app replica counts the scale handlers bump, bounded to
/// `[MIN_REPLICAS, MAX_REPLICAS]` per spec.md §4.10 (mirroring the original
/// auto-scaler's `min_workers`/`max_workers` policy).
pub struct ReplicaState {
    counts: Mutex<HashMap<String, u32>>,
}

impl ReplicaState {
    const MIN_REPLICAS: u32 = 1;
    const MAX_REPLICAS: u32 = 5;

    fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Apply `delta` to `app`'s replica count, clamped to the bounds, and
    /// return the resulting count.
    fn bump(&self, app: &str, delta: i32) -> u32 {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let current = *counts.get(app).unwrap_or(&Self::MIN_REPLICAS);
        let next = (current as i32 + delta).clamp(Self::MIN_REPLICAS as i32, Self::MAX_REPLICAS as i32) as u32;
        counts.insert(app.to_string(), next);
        next
    }
}

/// Demo-mode intake allow list: the only callers the orchestrator will
/// accept a decision from when `demo_mode` is set.
const DEMO_INTAKE_SOURCES: [&str; 2] = ["rl_decision_layer", "rl_intake_gate"];

/// Demo-mode blocklist of action names that must never reach a handler. Most
/// of these sit outside the closed five-action vocabulary and exist as
/// defense-in-depth against a forged action name; `rollback` is the one real
/// action demo mode refuses outright, since it mutates deployed state.
const DEMO_BLOCKED_NAMES: [&str; 7] = [
    "delete_data",
    "modify_config",
    "external_call",
    "shell_exec",
    "modify_permissions",
    "stop_service",
    "rollback",
];

/// A concrete handler for one action. Handlers never decide policy — by the
/// time one runs, all three gates have already passed.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, app: &str, env: &str, replicas: &ReplicaState) -> Result<Value, String>;
}

pub struct NoopHandler;
#[async_trait]
impl ActionHandler for NoopHandler {
    async fn execute(&self, app: &str, _env: &str, _replicas: &ReplicaState) -> Result<Value, String> {
        Ok(json!({"action": "noop", "app": app}))
    }
}

/// Deterministic stub: a restart always reports a fixed recovery time,
/// matching spec.md §4.10's literal example.
pub struct RestartHandler;
#[async_trait]
impl ActionHandler for RestartHandler {
    async fn execute(&self, app: &str, _env: &str, _replicas: &ReplicaState) -> Result<Value, String> {
        Ok(json!({"action": "restart", "app": app, "recovery_time": "15s"}))
    }
}

pub struct ScaleUpHandler;
#[async_trait]
impl ActionHandler for ScaleUpHandler {
    async fn execute(&self, app: &str, _env: &str, replicas: &ReplicaState) -> Result<Value, String> {
        let count = replicas.bump(app, 1);
        Ok(json!({"action": "scale_up", "app": app, "replicas": count}))
    }
}

pub struct ScaleDownHandler;
#[async_trait]
impl ActionHandler for ScaleDownHandler {
    async fn execute(&self, app: &str, _env: &str, replicas: &ReplicaState) -> Result<Value, String> {
        let count = replicas.bump(app, -1);
        Ok(json!({"action": "scale_down", "app": app, "replicas": count}))
    }
}

pub struct RollbackHandler;
#[async_trait]
impl ActionHandler for RollbackHandler {
    async fn execute(&self, app: &str, _env: &str, _replicas: &ReplicaState) -> Result<Value, String> {
        Ok(json!({"action": "rollback", "app": app, "intent": "rollback_requested"}))
    }
}

/// The non-throwing outcome of a call to `execute_action`. Exactly one of
/// `demo_mode_blocked`, `safety_refused`, `environment_refused`, or
/// `success` describes what happened; `error` is only set when a handler
/// ran and failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub action: Action,
    pub app: String,
    pub demo_mode_blocked: bool,
    pub safety_refused: bool,
    pub environment_refused: bool,
    pub details: Option<Value>,
    pub error: Option<String>,
}

impl ActionResult {
    fn refused(action: Action, app: &str) -> Self {
        Self {
            success: false,
            action,
            app: app.to_string(),
            demo_mode_blocked: false,
            safety_refused: false,
            environment_refused: false,
            details: None,
            error: None,
        }
    }
}

pub struct SafeOrchestrator {
    demo_mode: bool,
    handlers: HashMap<Action, Box<dyn ActionHandler>>,
    replicas: ReplicaState,
}

impl SafeOrchestrator {
    pub fn new(demo_mode: bool) -> Self {
        let mut handlers: HashMap<Action, Box<dyn ActionHandler>> = HashMap::new();
        handlers.insert(Action::Noop, Box::new(NoopHandler));
        handlers.insert(Action::Restart, Box::new(RestartHandler));
        handlers.insert(Action::ScaleUp, Box::new(ScaleUpHandler));
        handlers.insert(Action::ScaleDown, Box::new(ScaleDownHandler));
        handlers.insert(Action::Rollback, Box::new(RollbackHandler));
        Self {
            demo_mode,
            handlers,
            replicas: ReplicaState::new(),
        }
    }

    /// Numeric-code entry point matching the canonical
    /// `{0:noop,1:restart,2:scale_up,3:scale_down,4:rollback}` map used by
    /// the advisor protocol. The vocabulary is closed, so an unrecognized
    /// code is simply `noop`.
    pub async fn validate_and_execute(
        &self,
        code: u8,
        app: &str,
        policy: &EnvironmentPolicy,
        source: Option<&str>,
        proof_log: &ProofLog,
    ) -> ActionResult {
        let action = Action::from_code(code);
        self.execute_action(action, app, policy, source, proof_log).await
    }

    /// Run an action through the three ordered gates, then dispatch to its
    /// handler. Each gate's outcome is proof-logged regardless of verdict.
    pub async fn execute_action(
        &self,
        action: Action,
        app: &str,
        policy: &EnvironmentPolicy,
        source: Option<&str>,
        proof_log: &ProofLog,
    ) -> ActionResult {
        // Gate 1: demo intake — only a known intake source may hand the
        // orchestrator a decision while demo mode is on.
        if self.demo_mode {
            let intake_ok = source.map(|s| DEMO_INTAKE_SOURCES.contains(&s)).unwrap_or(false);
            if !intake_ok {
                proof_log.write_proof(
                    events::DEMO_MODE_BLOCK,
                    json!({"gate": "demo_intake", "action": action.name(), "app": app, "source": source}),
                );
                proof_log.write_proof(
                    events::ORCH_REFUSE,
                    json!({"gate": "demo_intake", "action": action.name(), "app": app}),
                );
                let mut result = ActionResult::refused(action, app);
                result.demo_mode_blocked = true;
                return result;
            }
        }
        proof_log.write_proof(
            events::RL_INTAKE_VALIDATED,
            json!({"action": action.name(), "app": app, "source": source}),
        );

        // Gate 2: demo safety classification — name-based blocklist.
        if self.demo_mode && DEMO_BLOCKED_NAMES.contains(&action.name()) {
            proof_log.write_proof(
                events::UNSAFE_ACTION_REFUSED,
                json!({"gate": "demo_safety", "action": action.name(), "app": app}),
            );
            proof_log.write_proof(
                events::ORCH_REFUSE,
                json!({"gate": "demo_safety", "action": action.name(), "app": app}),
            );
            let mut result = ActionResult::refused(action, app);
            result.safety_refused = true;
            return result;
        }

        // Gate 3: environment eligibility.
        if !policy.allows(action) {
            proof_log.write_proof(
                events::ORCH_REFUSE,
                json!({"gate": "environment", "action": action.name(), "app": app, "env": policy.env}),
            );
            let mut result = ActionResult::refused(action, app);
            result.environment_refused = true;
            return result;
        }

        proof_log.write_proof(
            events::EXECUTION_GATE_PASSED,
            json!({"action": action.name(), "app": app, "env": policy.env}),
        );

        let handler = self
            .handlers
            .get(&action)
            .expect("every Action variant has a registered handler");

        match handler.execute(app, &policy.env, &self.replicas).await {
            Ok(result) => {
                proof_log.write_proof(
                    events::ORCH_EXEC,
                    json!({"action": action.name(), "app": app, "result": &result}),
                );
                proof_log.write_proof(
                    events::SYSTEM_STABLE,
                    json!({"action": action.name(), "app": app}),
                );
                ActionResult {
                    success: true,
                    action,
                    app: app.to_string(),
                    demo_mode_blocked: false,
                    safety_refused: false,
                    environment_refused: false,
                    details: Some(result),
                    error: None,
                }
            }
            Err(reason) => {
                proof_log.write_proof(
                    events::ORCH_REFUSE,
                    json!({"gate": "handler", "action": action.name(), "app": app, "reason": &reason}),
                );
                let mut result = ActionResult::refused(action, app);
                result.error = Some(reason);
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allowed: Vec<Action>, demo_mode: bool) -> EnvironmentPolicy {
        EnvironmentPolicy {
            env: "dev".to_string(),
            allowed_actions: allowed,
            demo_mode,
        }
    }

    async fn proof_log() -> ProofLog {
        let dir = tempfile::tempdir().unwrap();
        ProofLog::open(dir.path().join("proof.jsonl")).unwrap()
    }

    #[tokio::test]
    async fn executes_when_all_gates_pass() {
        let orchestrator = SafeOrchestrator::new(true);
        let log = proof_log().await;
        let policy = policy(Action::ALL.to_vec(), true);
        let result = orchestrator
            .execute_action(Action::Restart, "svc-a", &policy, Some("rl_decision_layer"), &log)
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn demo_mode_blocks_unrecognized_intake_source() {
        let orchestrator = SafeOrchestrator::new(true);
        let log = proof_log().await;
        let policy = policy(Action::ALL.to_vec(), true);
        let result = orchestrator
            .execute_action(Action::Restart, "svc-a", &policy, Some("unknown_caller"), &log)
            .await;
        assert!(!result.success);
        assert!(result.demo_mode_blocked);
    }

    #[tokio::test]
    async fn demo_mode_refuses_rollback_by_name() {
        let orchestrator = SafeOrchestrator::new(true);
        let log = proof_log().await;
        let policy = policy(Action::ALL.to_vec(), true);
        let result = orchestrator
            .execute_action(Action::Rollback, "svc-a", &policy, Some("rl_decision_layer"), &log)
            .await;
        assert!(!result.success);
        assert!(result.safety_refused);
    }

    #[tokio::test]
    async fn environment_gate_blocks_disallowed_action() {
        let orchestrator = SafeOrchestrator::new(false);
        let log = proof_log().await;
        let policy = policy(vec![Action::Noop], false);
        let result = orchestrator
            .execute_action(Action::Restart, "svc-a", &policy, None, &log)
            .await;
        assert!(!result.success);
        assert!(result.environment_refused);
    }

    #[tokio::test]
    async fn canonical_code_mapping_round_trips() {
        let orchestrator = SafeOrchestrator::new(false);
        let log = proof_log().await;
        let policy = policy(Action::ALL.to_vec(), false);
        let result = orchestrator
            .validate_and_execute(2, "svc-a", &policy, None, &log)
            .await;
        assert!(result.success);
        assert_eq!(result.action, Action::ScaleUp);
    }

    #[tokio::test]
    async fn unknown_code_maps_to_noop_rather_than_erroring() {
        let orchestrator = SafeOrchestrator::new(false);
        let log = proof_log().await;
        let policy = policy(Action::ALL.to_vec(), false);
        let result = orchestrator
            .validate_and_execute(9, "svc-a", &policy, None, &log)
            .await;
        assert_eq!(result.action, Action::Noop);
        assert!(result.success);
    }

    #[tokio::test]
    async fn restart_reports_a_fixed_recovery_time() {
        let orchestrator = SafeOrchestrator::new(false);
        let log = proof_log().await;
        let policy = policy(Action::ALL.to_vec(), false);
        let result = orchestrator
            .execute_action(Action::Restart, "svc-a", &policy, None, &log)
            .await;
        assert_eq!(result.details.unwrap()["recovery_time"], "15s");
    }

    #[tokio::test]
    async fn scale_up_bumps_replicas_bounded_at_five() {
        let orchestrator = SafeOrchestrator::new(false);
        let log = proof_log().await;
        let policy = policy(Action::ALL.to_vec(), false);
        let mut last = 1u64;
        for _ in 0..8 {
            let result = orchestrator
                .execute_action(Action::ScaleUp, "svc-a", &policy, None, &log)
                .await;
            last = result.details.unwrap()["replicas"].as_u64().unwrap();
        }
        assert_eq!(last, 5);
    }

    #[tokio::test]
    async fn scale_down_bumps_replicas_bounded_at_one() {
        let orchestrator = SafeOrchestrator::new(false);
        let log = proof_log().await;
        let policy = policy(Action::ALL.to_vec(), false);
        let mut last = 1u64;
        for _ in 0..8 {
            let result = orchestrator
                .execute_action(Action::ScaleDown, "svc-a", &policy, None, &log)
                .await;
            last = result.details.unwrap()["replicas"].as_u64().unwrap();
        }
        assert_eq!(last, 1);
    }
}
