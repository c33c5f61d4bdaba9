//! Agent runtime (C12): the owning struct for one agent instance. Wires
//! together every other component and drives the cycle:
//! sense → validate → decide → enforce → act → observe → explain.

use std::path::PathBuf;

use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;

use crate::advisor::{AdvisorDecision, AdvisorTransport, RemoteAdvisorClient};
use crate::arbitrator::{Arbitrator, RuleDecision};
use crate::config::Config;
use crate::fsm::AgentFsm;
use crate::governance::ActionGovernance;
use crate::logger::AgentLogger;
use crate::memory::AgentMemory;
use crate::orchestrator::SafeOrchestrator;
use crate::perception::{validate_runtime_event, PerceptionLayer};
use crate::proof::{events, ProofLog};
use crate::self_restraint::SelfRestraint;
use crate::state_adapter::{adapt_state, AdaptedState};
use crate::types::{
    Action, AgentError, AgentId, DecisionContext, DecisionOutcome, DecisionRecord,
    HealthSignals, Perception, PerceptionId, PerceptionPriority, PerceptionType, State,
};

/// The source name the runtime identifies itself with when it hands a
/// decision to the safe orchestrator, satisfying the orchestrator's demo
/// intake gate.
const DECISION_SOURCE: &str = "rl_decision_layer";

/// Render a typed, serde-snake-cased reason enum as its wire string (e.g.
/// `cooldown_active`), so human-facing explanations use the same closed
/// vocabulary the proof log and the testable properties reference.
fn reason_str<R: serde::Serialize>(reason: &R) -> String {
    serde_json::to_value(reason)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Reads the caller-supplied health booleans carried under the `"health"`
/// key of a perception's payload, when present. These are opaque inputs to
/// self-restraint (e.g. `cpu_high`/`cpu_low`), not derived from any metric
/// the runtime itself computes — mirrors `validated_data.get("health")` in
/// `examples/original_source/agent_runtime.py`.
fn extract_health_signals(perception: &Perception) -> Option<HealthSignals> {
    perception
        .payload
        .get("health")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}

/// Queue depth above which the rule advisor recommends scaling up,
/// mirroring `auto_scaler.py`'s `scaling_policy['scale_up_threshold']`.
const QUEUE_DEPTH_SCALE_UP_THRESHOLD: u64 = 10;

/// Cheap, non-learning heuristic used when the remote advisor is not
/// confident enough to be trusted outright. Mirrors the kind of
/// conservative rule the original's rule advisor applied: escalate on
/// errors, scale on latency pressure, otherwise do nothing. `queue_depth`
/// is gathered independently of the adapted state, per spec.md §4.12 step
/// 3d ("a rule suggestion from a queue-depth heuristic").
fn compute_rule_decision(state: &AdaptedState, queue_depth: u64) -> RuleDecision {
    if queue_depth > QUEUE_DEPTH_SCALE_UP_THRESHOLD {
        return RuleDecision {
            action: Action::ScaleUp,
            confidence: 0.6,
            reason: format!("rule: queue depth {queue_depth} exceeds scale-up threshold"),
        };
    }
    if state.event_type == "crash" || state.event_type == "critical_system_failure" {
        return RuleDecision {
            action: Action::Rollback,
            confidence: 0.6,
            reason: format!("rule: {} observed, rolling back", state.event_type),
        };
    }
    if state.errors_last_min > 20 {
        return RuleDecision {
            action: Action::Restart,
            confidence: 0.55,
            reason: format!("rule: {} errors in the last minute", state.errors_last_min),
        };
    }
    if state.latency_ms > 2000.0 && state.workers < 16 {
        return RuleDecision {
            action: Action::ScaleUp,
            confidence: 0.5,
            reason: format!(
                "rule: latency {}ms with only {} workers",
                state.latency_ms, state.workers
            ),
        };
    }
    if state.latency_ms < 50.0 && state.workers > 4 && state.errors_last_min == 0 {
        return RuleDecision {
            action: Action::ScaleDown,
            confidence: 0.4,
            reason: "rule: low latency and no errors, workers may be overprovisioned".to_string(),
        };
    }
    RuleDecision {
        action: Action::Noop,
        confidence: 0.5,
        reason: "rule: nothing warrants action".to_string(),
    }
}

struct RuntimeState {
    fsm: AgentFsm,
    memory: AgentMemory,
    perception: PerceptionLayer,
    governance: ActionGovernance,
    last_decision: Option<Value>,
    shutting_down: bool,
    loop_count: u64,
}

/// One running agent instance. Every cycle — whether driven by the
/// continuous loop or by a single external event — is serialized behind
/// `state`, since cycles are short and never reentrant.
pub struct AgentRuntime<T: AdvisorTransport> {
    agent_id: AgentId,
    config: Config,
    state: AsyncMutex<RuntimeState>,
    self_restraint: SelfRestraint,
    arbitrator: Arbitrator,
    advisor: RemoteAdvisorClient<T>,
    orchestrator: SafeOrchestrator,
    proof_log: ProofLog,
    logger: AgentLogger,
    /// Reports the depth of the deployment-job queue the surrounding system
    /// owns. `None` when no such queue is wired up, mirroring the
    /// original's `if self.auto_scaler and self.auto_scaler.multi_agent`
    /// guard — absent entirely, not just reading zero.
    queue_depth_probe: Option<Box<dyn Fn() -> u64 + Send + Sync>>,
}

impl<T: AdvisorTransport> AgentRuntime<T> {
    pub fn new(agent_id: AgentId, config: Config, transport: T) -> Result<Self, AgentError> {
        let proof_log = ProofLog::open(&config.logging.proof_log_path).map_err(|e| {
            AgentError::Internal(format!(
                "failed to open proof log at {}: {e}",
                config.logging.proof_log_path.display()
            ))
        })?;

        let advisor = RemoteAdvisorClient::new(transport, &config.advisor);
        let orchestrator = SafeOrchestrator::new(config.demo_mode);
        let self_restraint = SelfRestraint::new(config.self_restraint.clone());
        let arbitrator = Arbitrator::new(config.arbitrator.clone());
        let governance = ActionGovernance::new(config.governance.clone());
        let memory = AgentMemory::new(config.memory.decision_capacity, config.memory.app_state_capacity);
        let perception = PerceptionLayer::new(config.perception.history_capacity);
        let logger = AgentLogger::new(agent_id.to_string());

        let state = RuntimeState {
            fsm: AgentFsm::new(agent_id),
            memory,
            perception,
            governance,
            last_decision: None,
            shutting_down: false,
            loop_count: 0,
        };

        Ok(Self {
            agent_id,
            config,
            state: AsyncMutex::new(state),
            self_restraint,
            arbitrator,
            advisor,
            orchestrator,
            proof_log,
            logger,
            queue_depth_probe: None,
        })
    }

    /// Wire in the surrounding system's queue-depth gauge, consulted by the
    /// internal queue sensor (§4.12 step 1) and the rule advisor (§4.12
    /// step 3d). Without a probe, both behave as though the queue is
    /// absent rather than empty.
    pub fn with_queue_depth_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.queue_depth_probe = Some(Box::new(probe));
        self
    }

    fn queue_depth(&self) -> Option<u64> {
        self.queue_depth_probe.as_ref().map(|probe| probe())
    }

    /// The internal sensor §4.12 step 1 describes: when perception is
    /// otherwise empty but the deployment queue is running deep, synthesize
    /// a `high_queue` event rather than falling straight back to idle.
    /// Mirrors `agent_runtime.py`'s `if queue_depth > 5: return {"event_type":
    /// "high_queue", ...}` sidebar sensor.
    fn synthesize_queue_depth_perception(&self, queue_depth: u64) -> Option<Perception> {
        if self.queue_depth_probe.is_none()
            || queue_depth <= self.config.perception.queue_depth_sense_threshold
        {
            return None;
        }
        Some(Perception {
            id: PerceptionId::new(),
            perception_type: PerceptionType::SystemAlert,
            priority: PerceptionPriority::HIGH,
            source: "internal_sensor".to_string(),
            timestamp: chrono::Utc::now(),
            payload: json!({"event_type": "high_queue", "queue_depth": queue_depth}),
        })
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent_id
    }

    /// Register a perception adapter. Must be called before `run()`.
    pub async fn register_adapter(&self, adapter: Box<dyn crate::perception::PerceptionAdapter>) {
        self.state.lock().await.perception.register(adapter);
    }

    /// Drive the continuous sense loop until `shutdown()` is called.
    pub async fn run(&self) {
        let interval = std::time::Duration::from_millis(self.config.loop_interval_ms);
        loop {
            {
                let shutting_down = self.state.lock().await.shutting_down;
                if shutting_down {
                    break;
                }
            }
            self.execute_cycle(None).await;
            tokio::time::sleep(interval).await;
        }
    }

    /// Synchronous single-cycle entry point for an externally supplied
    /// event, bypassing the perception adapters' own `sense()`.
    pub async fn handle_external_event(&self, event: Value) -> Value {
        {
            let guard = self.state.lock().await;
            if guard.shutting_down {
                return json!({
                    "status": "error",
                    "loop_count": guard.loop_count,
                    "decision": {"action_name": "noop", "source": "fsm_early_exit", "confidence": 0.0},
                    "action_result": {"status": "blocked", "execution_details": Value::Null},
                    "observation": Value::Null,
                    "reason": "runtime is shutting down",
                    "conclusion": "runtime is shutting down",
                });
            }
        }
        self.execute_cycle(Some(event)).await
    }

    pub async fn shutdown(&self) -> Result<(), AgentError> {
        let mut guard = self.state.lock().await;
        guard.shutting_down = true;
        let state_path = self
            .config
            .persistence
            .state_dir
            .join(format!("agent_state_{}.json", self.agent_id));
        let memory_path = self
            .config
            .persistence
            .state_dir
            .join(format!("memory_snapshot_{}.json", self.agent_id));

        match guard.fsm.current() {
            State::Idle | State::Blocked => {
                let _ = guard.fsm.transition_to(State::ShuttingDown, "graceful shutdown");
            }
            State::ShuttingDown => {}
            _ => {
                let _ = guard.fsm.normalize_to_idle("shutdown requested mid-cycle");
                let _ = guard.fsm.transition_to(State::ShuttingDown, "graceful shutdown");
            }
        }
        guard.fsm.save(&state_path)?;
        persist_memory(&guard.memory, &memory_path)?;
        Ok(())
    }

    /// Restore a previously persisted FSM/memory pair, if present, wiring
    /// them into a freshly constructed runtime.
    pub async fn restore(&self) -> Result<(), AgentError> {
        let state_path = self
            .config
            .persistence
            .state_dir
            .join(format!("agent_state_{}.json", self.agent_id));
        let memory_path = self
            .config
            .persistence
            .state_dir
            .join(format!("memory_snapshot_{}.json", self.agent_id));

        let mut guard = self.state.lock().await;
        if state_path.exists() {
            guard.fsm = AgentFsm::load(&state_path, self.agent_id).map_err(AgentError::Persistence)?;
        }
        if memory_path.exists() {
            guard.memory = load_memory(&memory_path)?;
        }
        Ok(())
    }

    async fn execute_cycle(&self, manual_observation: Option<Value>) -> Value {
        let mut guard = self.state.lock().await;

        self.proof_log.write_proof(events::CYCLE_STARTED, json!({}));
        if let Err(e) = guard.fsm.transition_to(State::Sensing, "cycle start") {
            self.logger.log_error("transition_to_sensing", &e.to_string());
            return self.finish_blocked(&mut guard, &e.to_string()).await;
        }

        let perceptions = match &manual_observation {
            Some(payload) => match validate_runtime_event(payload) {
                Ok(()) => {
                    self.proof_log.write_proof(events::RL_VALIDATION_PASSED, json!({}));
                    vec![Perception {
                        id: PerceptionId::new(),
                        perception_type: PerceptionType::RuntimeEvent,
                        priority: PerceptionPriority::MEDIUM,
                        source: "external_event".to_string(),
                        timestamp: chrono::Utc::now(),
                        payload: payload.clone(),
                    }]
                }
                Err(e) => {
                    self.proof_log.write_proof(
                        events::RL_VALIDATION_FAILED,
                        json!({"reason": e.to_string()}),
                    );
                    return self.finish_idle(&mut guard, "validation_failed").await;
                }
            },
            None => guard.perception.sense().await,
        };

        if let Err(e) = guard.fsm.transition_to(State::Validating, "validating perceptions") {
            return self.finish_blocked(&mut guard, &e.to_string()).await;
        }

        let queue_depth = self.queue_depth().unwrap_or(0);

        let perception = match perceptions.into_iter().max_by_key(|p| p.priority) {
            Some(perception) => {
                // The manual/external branch above already validated this
                // perception's payload before wrapping it; anything that
                // came from sense() still needs to pass through the same
                // schema gate, per spec.md §4.12 step 2.
                if manual_observation.is_none() {
                    if let Err(e) = validate_runtime_event(&perception.payload) {
                        self.proof_log.write_proof(
                            events::RL_VALIDATION_FAILED,
                            json!({"reason": e.to_string()}),
                        );
                        return self.finish_idle(&mut guard, "validation_failed").await;
                    }
                    self.proof_log.write_proof(events::RL_VALIDATION_PASSED, json!({}));
                }
                perception
            }
            None => match self.synthesize_queue_depth_perception(queue_depth) {
                Some(perception) => perception,
                None => return self.finish_idle(&mut guard, "no perceptions this cycle").await,
            },
        };
        self.proof_log.write_proof(
            events::RUNTIME_EMIT,
            json!({"source": perception.source, "priority": format!("{:?}", perception.priority)}),
        );

        if let Err(e) = guard.fsm.transition_to(State::Deciding, "deciding") {
            return self.finish_blocked(&mut guard, &e.to_string()).await;
        }

        let app = perception
            .payload
            .get("app")
            .and_then(|v| v.as_str())
            .unwrap_or(&perception.source)
            .to_string();
        let env = self.config.env.clone();

        let fsm_state = guard.fsm.current().to_string().to_lowercase();
        let adapted = adapt_state(&perception, &app, &env, &fsm_state);

        let mut observed_only = false;
        let (mut action, mut confidence, mut source, mut reason);

        let override_result = guard.memory.should_override_decision(Some(&app), 3, 3);
        if override_result.override_applied {
            self.proof_log.write_proof(
                events::MEMORY_OVERRIDE,
                json!({
                    "app": app,
                    "reason": &override_result.override_reason,
                    "override_decision": override_result.override_decision.map(Action::name),
                }),
            );
            reason = format!(
                "memory override: {}",
                override_result.override_reason.as_deref().unwrap_or("unspecified")
            );
            match override_result.override_decision {
                Some(overridden) => {
                    action = overridden;
                    confidence = 0.9;
                    source = "memory_override".to_string();
                }
                None => {
                    // Repetition suppression: no action in the closed
                    // vocabulary means "observe", so fall back to noop and
                    // mark the cycle observation-only.
                    action = Action::Noop;
                    confidence = 0.9;
                    source = "memory_override".to_string();
                    observed_only = true;
                }
            }
        } else {
            let advisor_decision = self.advisor.get_decision(&adapted).await;
            self.proof_log.write_proof(
                if advisor_decision.source == "remote_client_fallback" {
                    events::ADVISOR_FALLBACK
                } else {
                    events::RL_CONSUME
                },
                json!({"app": app, "decision": &advisor_decision}),
            );
            let rule_decision = compute_rule_decision(&adapted, queue_depth);
            self.proof_log.write_proof(
                events::RULE_DECISION,
                json!({"app": app, "decision": &rule_decision}),
            );
            let arbitrated = self.arbitrator.arbitrate(advisor_decision, rule_decision);
            self.proof_log.write_proof(
                events::RL_DECISION,
                json!({"app": app, "chosen": arbitrated.action.name(), "source": arbitrated.source}),
            );
            action = arbitrated.action;
            confidence = arbitrated.confidence;
            source = arbitrated.source;
            reason = arbitrated.reason;
        }

        let memory_signals = guard.memory.get_memory_context(Some(&app), 10);
        let decision_context = DecisionContext { confidence };
        let health_signals = extract_health_signals(&perception);

        if !observed_only {
            let block_decision = self.self_restraint.evaluate_block(
                Some(&decision_context),
                Some(&memory_signals),
                health_signals.as_ref(),
            );
            if block_decision.should_block {
                self.proof_log.write_proof(
                    events::RL_UNSAFE_REFUSED,
                    json!({"app": app, "reason": block_decision.reason, "details": block_decision.details}),
                );
                reason = block_decision
                    .reason
                    .map(|r| reason_str(&r))
                    .unwrap_or_else(|| "self_restraint_block".to_string());
                action = block_decision.recommended_action.unwrap_or(Action::Noop);
                observed_only = true;
                // Self-restraint refusing its own decision is a self-blocked
                // cycle per spec.md §4.12 step 3c: transition into Blocked,
                // remember it, and return rather than carrying on into
                // enforce/act.
                return self
                    .finish_blocked_decision(
                        &mut guard,
                        &app,
                        &env,
                        action,
                        confidence,
                        &source,
                        &reason,
                        DecisionOutcome::Observe,
                        json!({"app_name": app, "confidence": confidence}),
                        "self-restraint block",
                    )
                    .await;
            } else {
                let uncertainty = self.self_restraint.check_uncertainty(&decision_context);
                if uncertainty.should_block {
                    reason = uncertainty
                        .reason
                        .map(|r| reason_str(&r))
                        .unwrap_or_else(|| "uncertainty_too_high".to_string());
                    action = uncertainty.recommended_action.unwrap_or(Action::Noop);
                    observed_only = true;
                } else {
                    let observe = self
                        .self_restraint
                        .should_observe_instead_of_act(health_signals.as_ref(), Some(&memory_signals));
                    if observe.should_block {
                        self.proof_log.write_proof(
                            events::OBSERVE_INSTEAD_OF_ACT,
                            json!({"app": app, "details": observe.details}),
                        );
                        reason = observe
                            .reason
                            .map(|r| reason_str(&r))
                            .unwrap_or_else(|| "signal_conflict_requires_observation".to_string());
                        action = observe.recommended_action.unwrap_or(Action::Noop);
                        observed_only = true;
                    }
                }
            }
        }

        if let Err(e) = guard.fsm.transition_to(State::Governing, "governing") {
            return self.finish_blocked(&mut guard, &e.to_string()).await;
        }

        let policy = self.config.active_environment_policy().clone();
        let governance_context = json!({ "app_name": app, "confidence": confidence });
        let mut outcome = DecisionOutcome::Noop;

        // Every path out of Governing crosses Executing, even when nothing is
        // actually dispatched to the orchestrator (a no-op or a refused
        // action still "executes" as a no-op) — spec.md §4.11's legality
        // table has no direct enforcing -> observing_results edge.
        if let Err(e) = guard.fsm.transition_to(State::Executing, "executing") {
            return self.finish_blocked(&mut guard, &e.to_string()).await;
        }

        let execution_result: Option<Value> = if observed_only || action == Action::Noop {
            outcome = if observed_only {
                DecisionOutcome::Observe
            } else {
                DecisionOutcome::Noop
            };
            None
        } else {
            let governance_decision = guard
                .governance
                .evaluate(action, &app, &governance_context, &policy);
            self.proof_log.write_proof(
                events::GOVERNANCE_DECISION,
                json!({
                    "app": app,
                    "action": action.name(),
                    "should_block": governance_decision.should_block,
                    "reason": governance_decision.reason,
                    "details": governance_decision.details,
                }),
            );
            if governance_decision.should_block {
                reason = governance_decision
                    .reason
                    .map(|r| reason_str(&r))
                    .unwrap_or_else(|| "action_not_eligible".to_string());
                observed_only = true;
                outcome = DecisionOutcome::Blocked;
                // spec.md §4.12 step 4: a governance block transitions to
                // Blocked, proof-logs, remembers, and returns
                // `allowed=false, safe_action=noop` rather than reaching act.
                return self
                    .finish_blocked_decision(
                        &mut guard,
                        &app,
                        &env,
                        Action::Noop,
                        confidence,
                        &source,
                        &reason,
                        outcome,
                        governance_context.clone(),
                        "governance block",
                    )
                    .await;
            } else {
                let result = self
                    .orchestrator
                    .execute_action(action, &app, &policy, Some(DECISION_SOURCE), &self.proof_log)
                    .await;
                outcome = if result.success {
                    DecisionOutcome::Success
                } else {
                    DecisionOutcome::Refused
                };
                Some(serde_json::to_value(&result).unwrap_or(Value::Null))
            }
        };

        if let Err(e) = guard.fsm.transition_to(State::Observing, "observing") {
            return self.finish_blocked(&mut guard, &e.to_string()).await;
        }

        guard.memory.remember_decision(DecisionRecord {
            timestamp: chrono::Utc::now(),
            app: app.clone(),
            env: env.clone(),
            action,
            confidence,
            source: source.clone(),
            reason: reason.clone(),
            observed_only,
            outcome,
            context: governance_context.clone(),
        });

        guard.loop_count += 1;
        let system_stable = outcome == DecisionOutcome::Success;
        let post_action_status = if system_stable { "active" } else { "unstable" };
        let app_health = json!({"last_action": reason_str(&outcome)});
        let app_recent_events = vec![
            format!("action_{}", reason_str(&outcome)),
            format!("loop_{}", guard.loop_count),
        ];
        guard.memory.remember_app_state(
            &app,
            post_action_status,
            app_health.clone(),
            app_recent_events.clone(),
            Some(json!({"timestamp": chrono::Utc::now().to_rfc3339()})),
        );
        let observation = json!({
            "app": app,
            "status": post_action_status,
            "health": app_health,
            "recent_events": app_recent_events,
        });

        if let Err(e) = guard.fsm.transition_to(State::Explaining, "explaining") {
            return self.finish_blocked(&mut guard, &e.to_string()).await;
        }

        self.logger.log_decision(&app, action, confidence, &source);

        let conclusion = match outcome {
            DecisionOutcome::Success => format!("executed {} on {app}, system stable", action.name()),
            DecisionOutcome::Refused => format!("action {} refused", action.name()),
            DecisionOutcome::Blocked => format!("action {} blocked: {reason}", action.name()),
            DecisionOutcome::Observe => format!("observed only: {reason}"),
            DecisionOutcome::Noop => "no action taken this cycle".to_string(),
            DecisionOutcome::Pending | DecisionOutcome::Failure => reason.clone(),
        };

        let explanation = json!({
            "status": "ok",
            "loop_count": guard.loop_count,
            "decision": {
                "app": app,
                "action_name": action.name(),
                "confidence": confidence,
                "source": source,
                "reason": reason,
                "observed_only": observed_only,
                "outcome": outcome,
            },
            "action_result": {
                "status": reason_str(&outcome),
                "execution_details": execution_result,
            },
            "observation": observation,
            "conclusion": conclusion,
        });

        guard.last_decision = Some(explanation.clone());
        let _ = guard.fsm.normalize_to_idle("cycle complete");
        self.proof_log.write_proof(events::CYCLE_COMPLETED, json!({"app": app}));

        explanation
    }

    /// Shared early-return path for a cycle that self-restraint or
    /// governance refuses before reaching act: transitions the FSM into
    /// `Blocked` (legal from both `Deciding` and `Executing`, the two states
    /// this is called from), remembers the refused decision, then
    /// normalizes back to `Idle` and returns a fully-formed explanation.
    #[allow(clippy::too_many_arguments)]
    async fn finish_blocked_decision(
        &self,
        guard: &mut RuntimeState,
        app: &str,
        env: &str,
        action: Action,
        confidence: f64,
        source: &str,
        reason: &str,
        outcome: DecisionOutcome,
        context: Value,
        transition_reason: &str,
    ) -> Value {
        let _ = guard.fsm.transition_to(State::Blocked, transition_reason.to_string());
        guard.memory.remember_decision(DecisionRecord {
            timestamp: chrono::Utc::now(),
            app: app.to_string(),
            env: env.to_string(),
            action,
            confidence,
            source: source.to_string(),
            reason: reason.to_string(),
            observed_only: true,
            outcome,
            context,
        });
        let _ = guard.fsm.normalize_to_idle(transition_reason.to_string());

        let conclusion = match outcome {
            DecisionOutcome::Blocked => format!("action {} blocked: {reason}", action.name()),
            DecisionOutcome::Observe => format!("observed only: {reason}"),
            _ => reason.to_string(),
        };
        let explanation = json!({
            "status": "ok",
            "loop_count": guard.loop_count,
            "decision": {
                "app": app,
                "action_name": action.name(),
                "confidence": confidence,
                "source": source,
                "reason": reason,
                "observed_only": true,
                "outcome": outcome,
            },
            "action_result": {
                "status": reason_str(&outcome),
                "execution_details": Value::Null,
            },
            "observation": Value::Null,
            "conclusion": conclusion,
        });
        guard.last_decision = Some(explanation.clone());
        self.proof_log
            .write_proof(events::CYCLE_BLOCKED, json!({"app": app, "reason": reason}));
        explanation
    }

    async fn finish_idle(&self, guard: &mut RuntimeState, reason: &str) -> Value {
        let _ = guard.fsm.normalize_to_idle(reason.to_string());
        let explanation = json!({
            "status": "ok",
            "loop_count": guard.loop_count,
            "decision": {"action_name": "noop", "source": "no_op_cycle", "confidence": 0.0, "reason": reason},
            "action_result": {"status": "skipped", "execution_details": Value::Null},
            "observation": Value::Null,
            "conclusion": format!("cycle ended early: {reason}"),
        });
        guard.last_decision = Some(explanation.clone());
        explanation
    }

    async fn finish_blocked(&self, guard: &mut RuntimeState, reason: &str) -> Value {
        self.logger.log_error("cycle", reason);
        self.proof_log
            .write_proof(events::CYCLE_BLOCKED, json!({"reason": reason}));
        let _ = guard.fsm.normalize_to_idle(format!("recovered from: {reason}"));
        json!({
            "status": "error",
            "loop_count": guard.loop_count,
            "decision": {"action_name": "noop", "source": "fsm_early_exit", "confidence": 0.0},
            "action_result": {"status": "blocked", "execution_details": Value::Null},
            "observation": Value::Null,
            "reason": reason,
            "conclusion": format!("cycle blocked: {reason}"),
        })
    }

    pub async fn last_decision(&self) -> Option<Value> {
        self.state.lock().await.last_decision.clone()
    }

    pub async fn memory_stats(&self) -> crate::memory::MemoryStats {
        self.state.lock().await.memory.get_memory_stats()
    }

    pub fn proof_log_health(&self) -> crate::proof::ProofLogHealth {
        self.proof_log.health()
    }
}

fn persist_memory(memory: &AgentMemory, path: &PathBuf) -> Result<(), AgentError> {
    let snapshot = memory.to_snapshot();
    let json = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| AgentError::Internal(format!("failed to serialize memory snapshot: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| AgentError::Internal(format!("failed to write memory snapshot: {e}")))
}

fn load_memory(path: &PathBuf) -> Result<AgentMemory, AgentError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| AgentError::Internal(format!("failed to read memory snapshot: {e}")))?;
    let snapshot = serde_json::from_str(&contents)
        .map_err(|e| AgentError::Internal(format!("failed to parse memory snapshot: {e}")))?;
    Ok(AgentMemory::from_snapshot(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::AdvisorTransport;
    use crate::types::TransportError;
    use async_trait::async_trait;

    struct StubTransport;

    #[async_trait]
    impl AdvisorTransport for StubTransport {
        async fn decide(&self, _state: &AdaptedState) -> Result<AdvisorDecision, TransportError> {
            Ok(AdvisorDecision {
                action: Action::Noop,
                confidence: 0.95,
                reason: "stub".to_string(),
                source: "rl_brain".to_string(),
            })
        }
        async fn health(&self) -> Result<Value, TransportError> {
            Ok(json!({"status": "ok"}))
        }
        async fn scope(&self) -> Result<Value, TransportError> {
            Ok(json!({}))
        }
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.logging.proof_log_path = dir.join("proof.jsonl");
        config.persistence.state_dir = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn handle_external_event_returns_explanation_and_recovers_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let runtime =
            AgentRuntime::new(AgentId::new(), test_config(dir.path()), StubTransport).unwrap();

        let event = json!({
            "event_id": "1",
            "event_type": "deploy",
            "timestamp": "2024-01-01T00:00:00Z",
            "app": "svc-a",
        });
        let result = runtime.handle_external_event(event).await;
        assert_eq!(result["status"], "ok");
    }

    #[tokio::test]
    async fn invalid_event_does_not_panic_and_returns_ok_noop() {
        let dir = tempfile::tempdir().unwrap();
        let runtime =
            AgentRuntime::new(AgentId::new(), test_config(dir.path()), StubTransport).unwrap();
        let event = json!({"garbage": true});
        let result = runtime.handle_external_event(event).await;
        assert_eq!(result["decision"]["action_name"], "noop");
    }

    #[tokio::test]
    async fn empty_perception_with_deep_queue_synthesizes_high_queue_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.self_restraint.min_confidence = 0.0;
        config.arbitrator.confidence_threshold = 0.99;
        let runtime = AgentRuntime::new(AgentId::new(), config, StubTransport)
            .unwrap()
            .with_queue_depth_probe(|| 42);

        let result = runtime.execute_cycle(None).await;
        assert_eq!(result["decision"]["action_name"], "scale_up");
        assert_eq!(result["decision"]["source"], "rule_based");
    }

    #[tokio::test]
    async fn empty_perception_with_shallow_queue_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = AgentRuntime::new(AgentId::new(), test_config(dir.path()), StubTransport)
            .unwrap()
            .with_queue_depth_probe(|| 1);

        let result = runtime.execute_cycle(None).await;
        assert_eq!(result["decision"]["source"], "no_op_cycle");
    }

    #[tokio::test]
    async fn shutdown_persists_state_and_rejects_further_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let runtime =
            AgentRuntime::new(AgentId::new(), test_config(dir.path()), StubTransport).unwrap();
        runtime.shutdown().await.unwrap();

        let state_path = dir
            .path()
            .join(format!("agent_state_{}.json", runtime.agent_id()));
        assert!(state_path.exists());

        let event = json!({"event_id": "1", "event_type": "deploy", "timestamp": "now"});
        let result = runtime.handle_external_event(event).await;
        assert_eq!(result["status"], "error");
    }
}
