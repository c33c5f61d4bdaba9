//! End-to-end cycle tests driving the wired `AgentRuntime` through a stub
//! advisor transport, covering the scenarios the unit suites in
//! `governance.rs`, `self_restraint.rs`, and `arbitrator.rs` check in
//! isolation.

use agent_runtime_core::{AdvisorDecision, AdvisorTransport, AgentId, AgentRuntime, Config};
use agent_runtime_core::state_adapter::AdaptedState;
use async_trait::async_trait;
use serde_json::{json, Value};

struct ScriptedTransport {
    decide: Box<dyn Fn(&AdaptedState) -> Result<AdvisorDecision, agent_runtime_core::TransportError> + Send + Sync>,
}

#[async_trait]
impl AdvisorTransport for ScriptedTransport {
    async fn decide(
        &self,
        state: &AdaptedState,
    ) -> Result<AdvisorDecision, agent_runtime_core::TransportError> {
        (self.decide)(state)
    }
    async fn health(&self) -> Result<Value, agent_runtime_core::TransportError> {
        Ok(json!({"status": "ok"}))
    }
    async fn scope(&self) -> Result<Value, agent_runtime_core::TransportError> {
        Ok(json!({}))
    }
}

fn confident_noop_transport() -> ScriptedTransport {
    ScriptedTransport {
        decide: Box::new(|_state| {
            Ok(AdvisorDecision {
                action: agent_runtime_core::Action::Noop,
                confidence: 0.95,
                reason: "nothing unusual".to_string(),
                source: "rl_brain".to_string(),
            })
        }),
    }
}

fn always_times_out_transport() -> ScriptedTransport {
    ScriptedTransport {
        decide: Box::new(|_state| Err(agent_runtime_core::TransportError::Timeout(std::time::Duration::from_secs(2)))),
    }
}

fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.logging.proof_log_path = dir.join("proof.jsonl");
    config.persistence.state_dir = dir.to_path_buf();
    config.advisor.max_retries = 0;
    config.advisor.max_failures = 10;
    config
}

fn deploy_event(app: &str) -> Value {
    json!({
        "event_id": "evt-1",
        "event_type": "deploy",
        "timestamp": "2024-01-01T00:00:00Z",
        "app": app,
    })
}

#[tokio::test]
async fn cooldown_blocks_a_repeated_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.self_restraint.min_confidence = 0.0;

    let transport = ScriptedTransport {
        decide: Box::new(|_state| {
            Ok(AdvisorDecision {
                action: agent_runtime_core::Action::Restart,
                confidence: 0.9,
                reason: "crash detected".to_string(),
                source: "rl_brain".to_string(),
            })
        }),
    };
    let runtime = AgentRuntime::new(AgentId::new(), config, transport).unwrap();

    let mut crash_event = deploy_event("demo-api");
    crash_event["event_type"] = json!("crash");

    let first = runtime.handle_external_event(crash_event.clone()).await;
    assert_eq!(first["decision"]["action_name"], "restart");

    let second = runtime.handle_external_event(crash_event).await;
    assert_eq!(second["decision"]["observed_only"], true);
    assert_eq!(second["decision"]["reason"], "cooldown_active");
}

#[tokio::test]
async fn prod_environment_rejects_scale_up_but_dev_allows_it() {
    // The default environment policies restrict prod to noop only;
    // scale_up is only eligible in dev and stage.
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.self_restraint.min_confidence = 0.0;
    config.env = "prod".to_string();

    let transport = ScriptedTransport {
        decide: Box::new(|_state| {
            Ok(AdvisorDecision {
                action: agent_runtime_core::Action::ScaleUp,
                confidence: 0.9,
                reason: "queue depth high".to_string(),
                source: "rl_brain".to_string(),
            })
        }),
    };
    let runtime = AgentRuntime::new(AgentId::new(), config.clone(), transport).unwrap();
    let event = deploy_event("demo-api");
    let result = runtime.handle_external_event(event.clone()).await;
    assert_eq!(result["decision"]["observed_only"], true);
    assert_eq!(result["decision"]["reason"], "action_not_eligible");

    config.env = "dev".to_string();
    let transport = ScriptedTransport {
        decide: Box::new(|_state| {
            Ok(AdvisorDecision {
                action: agent_runtime_core::Action::ScaleUp,
                confidence: 0.9,
                reason: "queue depth high".to_string(),
                source: "rl_brain".to_string(),
            })
        }),
    };
    let runtime = AgentRuntime::new(AgentId::new(), config, transport).unwrap();
    let result = runtime.handle_external_event(event).await;
    assert_eq!(result["decision"]["action_name"], "scale_up");
    assert_eq!(result["decision"]["observed_only"], false);
}

#[tokio::test]
async fn low_confidence_is_downgraded_to_noop() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.self_restraint.min_confidence = 0.5;
    config.arbitrator.confidence_threshold = 0.3;

    let transport = ScriptedTransport {
        decide: Box::new(|_state| {
            Ok(AdvisorDecision {
                action: agent_runtime_core::Action::Restart,
                confidence: 0.35,
                reason: "maybe restart".to_string(),
                source: "rl_brain".to_string(),
            })
        }),
    };
    let runtime = AgentRuntime::new(AgentId::new(), config, transport).unwrap();
    let result = runtime.handle_external_event(deploy_event("demo-api")).await;
    assert_eq!(result["decision"]["action_name"], "noop");
    assert_eq!(result["decision"]["observed_only"], true);
    assert_eq!(result["decision"]["reason"], "low_confidence");
}

#[tokio::test]
async fn advisor_timeout_falls_back_and_arbitrator_picks_the_rule_advisor() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let transport = always_times_out_transport();
    let runtime = AgentRuntime::new(AgentId::new(), config, transport).unwrap();

    let mut overload_event = deploy_event("demo-api");
    overload_event["event_type"] = json!("overload");
    overload_event["latency_ms"] = json!(3000.0);
    overload_event["workers"] = json!(2);

    let result = runtime.handle_external_event(overload_event).await;
    assert_eq!(result["decision"]["action_name"], "scale_up");
    assert_eq!(result["decision"]["source"], "rule_based");
}

#[tokio::test]
async fn conflicting_health_signals_are_observed_instead_of_acted_on() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.self_restraint.min_confidence = 0.0;

    let transport = ScriptedTransport {
        decide: Box::new(|_state| {
            Ok(AdvisorDecision {
                action: agent_runtime_core::Action::Restart,
                confidence: 0.9,
                reason: "crash detected".to_string(),
                source: "rl_brain".to_string(),
            })
        }),
    };
    let runtime = AgentRuntime::new(AgentId::new(), config, transport).unwrap();

    let mut crash_event = deploy_event("demo-api");
    crash_event["event_type"] = json!("crash");
    crash_event["health"] = json!({"cpu_high": true, "cpu_low": true});

    let result = runtime.handle_external_event(crash_event).await;
    assert_eq!(result["decision"]["observed_only"], true);
    assert_eq!(result["decision"]["reason"], "conflicting_signals");
}

#[tokio::test]
async fn confident_noop_cycle_completes_without_execution() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let transport = confident_noop_transport();
    let runtime = AgentRuntime::new(AgentId::new(), config, transport).unwrap();
    let result = runtime.handle_external_event(deploy_event("demo-api")).await;
    assert_eq!(result["status"], "ok");
    assert_eq!(result["decision"]["action_name"], "noop");
    assert!(result["action_result"]["execution_details"].is_null());
}
