//! Action governance (C8): the final checkpoint before an action is handed
//! to the safe orchestrator.
//!
//! Checks run in a fixed order — eligibility, then prerequisites, then
//! cooldown, then repetition — and the first failure wins. Cooldowns are
//! per action (a `rollback` costs more than a `restart`) and everything is
//! scoped per `app`; there is no cross-agent state.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::config::GovernanceConfig;
use crate::types::{Action, EnvironmentPolicy, GovernanceDecision, GovernanceReason};

/// A prerequisite an action must satisfy before governance will let it pass,
/// checked against the decision's `context` object (e.g. `app_name`,
/// `has_previous_version`).
pub trait Prerequisite: Send + Sync {
    fn check(&self, action: Action, app: &str, context: &Value) -> Result<(), Value>;
}

/// `restart`/`scale_up`/`scale_down` require the context to carry the app
/// they apply to.
struct RequiresAppName;

impl Prerequisite for RequiresAppName {
    fn check(&self, action: Action, app: &str, context: &Value) -> Result<(), Value> {
        if matches!(action, Action::Restart | Action::ScaleUp | Action::ScaleDown) {
            let has_name = !app.is_empty()
                || context
                    .get("app_name")
                    .and_then(Value::as_str)
                    .map(|s| !s.is_empty())
                    .unwrap_or(false);
            if !has_name {
                return Err(json!({ "prerequisite": "app_name", "action": action.name() }));
            }
        }
        Ok(())
    }
}

/// `rollback` requires a previous version to exist; absent the context key,
/// the prerequisite defaults to satisfied (a previous version is assumed).
struct RequiresPreviousVersion;

impl Prerequisite for RequiresPreviousVersion {
    fn check(&self, action: Action, _app: &str, context: &Value) -> Result<(), Value> {
        if action == Action::Rollback {
            let has_previous = context
                .get("has_previous_version")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            if !has_previous {
                return Err(json!({ "prerequisite": "has_previous_version", "action": "rollback" }));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ExecutionRecord {
    action: Action,
    app: String,
    at: DateTime<Utc>,
}

pub struct ActionGovernance {
    config: GovernanceConfig,
    prerequisites: Vec<Box<dyn Prerequisite>>,
    last_execution: HashMap<(String, Action), DateTime<Utc>>,
    history: VecDeque<ExecutionRecord>,
}

impl ActionGovernance {
    pub fn new(config: GovernanceConfig) -> Self {
        Self {
            config,
            prerequisites: vec![Box::new(RequiresAppName), Box::new(RequiresPreviousVersion)],
            last_execution: HashMap::new(),
            history: VecDeque::new(),
        }
    }

    pub fn register_prerequisite(&mut self, prerequisite: Box<dyn Prerequisite>) {
        self.prerequisites.push(prerequisite);
    }

    /// Evaluate whether `action` may proceed for `app` under `policy`, given
    /// the decision's `context` object.
    pub fn evaluate(
        &mut self,
        action: Action,
        app: &str,
        context: &Value,
        policy: &EnvironmentPolicy,
    ) -> GovernanceDecision {
        if !policy.allows(action) {
            return GovernanceDecision::block(
                action,
                GovernanceReason::ActionNotEligible,
                json!({ "action": action.name(), "env": policy.env }),
            );
        }

        for prerequisite in &self.prerequisites {
            if let Err(details) = prerequisite.check(action, app, context) {
                return GovernanceDecision::block(action, GovernanceReason::PrerequisiteNotMet, details);
            }
        }

        if let Some(last) = self.last_execution.get(&(app.to_string(), action)) {
            let elapsed = Utc::now() - *last;
            let cooldown = chrono::Duration::from_std(self.config.cooldown_for(action))
                .unwrap_or(chrono::Duration::zero());
            if elapsed < cooldown {
                let remaining = (cooldown - elapsed).to_std().unwrap_or_default();
                return GovernanceDecision::block(
                    action,
                    GovernanceReason::CooldownActive,
                    json!({
                        "action": action.name(),
                        "app": app,
                        "remaining_seconds": remaining.as_secs(),
                    }),
                );
            }
        }

        let window = chrono::Duration::from_std(self.config.repetition_window)
            .unwrap_or(chrono::Duration::zero());
        let now = Utc::now();
        let repetitions = self
            .history
            .iter()
            .filter(|r| r.app == app && r.action == action && now - r.at < window)
            .count() as u32;

        if repetitions >= self.config.max_repetitions {
            return GovernanceDecision::block(
                action,
                GovernanceReason::RepetitionLimitExceeded,
                json!({
                    "action": action.name(),
                    "app": app,
                    "limit": self.config.max_repetitions,
                }),
            );
        }

        self.last_execution.insert((app.to_string(), action), now);
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(ExecutionRecord {
            action,
            app: app.to_string(),
            at: now,
        });

        GovernanceDecision::allow(action)
    }

    pub fn get_action_history(&self, action: Option<Action>, limit: usize) -> Vec<(String, Action, DateTime<Utc>)> {
        self.history
            .iter()
            .rev()
            .filter(|r| action.map(|a| a == r.action).unwrap_or(true))
            .take(limit)
            .map(|r| (r.app.clone(), r.action, r.at))
            .collect()
    }

    pub fn reset(&mut self) {
        self.last_execution.clear();
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> EnvironmentPolicy {
        EnvironmentPolicy {
            env: "dev".to_string(),
            allowed_actions: Action::ALL.to_vec(),
            demo_mode: true,
        }
    }

    #[test]
    fn ineligible_action_is_blocked_first() {
        let mut gov = ActionGovernance::new(GovernanceConfig::default());
        let restrictive = EnvironmentPolicy {
            env: "prod".to_string(),
            allowed_actions: vec![Action::Noop],
            demo_mode: false,
        };
        let decision = gov.evaluate(Action::Restart, "svc-a", &json!({}), &restrictive);
        assert!(decision.should_block);
        assert_eq!(decision.reason, Some(GovernanceReason::ActionNotEligible));
    }

    #[test]
    fn rollback_without_previous_version_fails_prerequisite() {
        let mut gov = ActionGovernance::new(GovernanceConfig::default());
        let p = policy();
        let decision = gov.evaluate(
            Action::Rollback,
            "svc-a",
            &json!({ "has_previous_version": false }),
            &p,
        );
        assert!(decision.should_block);
        assert_eq!(decision.reason, Some(GovernanceReason::PrerequisiteNotMet));
    }

    #[test]
    fn cooldown_blocks_repeat_execution() {
        let mut gov = ActionGovernance::new(GovernanceConfig::default());
        let p = policy();
        let first = gov.evaluate(Action::Restart, "svc-a", &json!({}), &p);
        assert!(!first.should_block);

        let second = gov.evaluate(Action::Restart, "svc-a", &json!({}), &p);
        assert!(second.should_block);
        assert_eq!(second.reason, Some(GovernanceReason::CooldownActive));
    }

    #[test]
    fn repetition_limit_blocks_after_threshold() {
        let config = GovernanceConfig {
            cooldown_seconds: HashMap::from([(Action::ScaleUp, 0)]),
            max_repetitions: 2,
            ..GovernanceConfig::default()
        };
        let mut gov = ActionGovernance::new(config);
        let p = policy();

        assert!(!gov.evaluate(Action::ScaleUp, "svc-a", &json!({}), &p).should_block);
        assert!(!gov.evaluate(Action::ScaleUp, "svc-a", &json!({}), &p).should_block);
        let third = gov.evaluate(Action::ScaleUp, "svc-a", &json!({}), &p);
        assert!(third.should_block);
        assert_eq!(third.reason, Some(GovernanceReason::RepetitionLimitExceeded));
    }

    #[test]
    fn reset_clears_history_and_cooldowns() {
        let mut gov = ActionGovernance::new(GovernanceConfig::default());
        let p = policy();
        gov.evaluate(Action::Restart, "svc-a", &json!({}), &p);
        gov.reset();
        assert!(!gov.evaluate(Action::Restart, "svc-a", &json!({}), &p).should_block);
    }
}
