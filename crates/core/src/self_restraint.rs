//! Self-restraint (C7): a stateless evaluator that can veto an otherwise
//! eligible decision before it ever reaches governance.
//!
//! `evaluate_block` consults up to three independent input groups — the
//! candidate decision's own confidence, the health-signal readings, and the
//! memory-derived signals — in a fixed priority order: conflicting health
//! signals, then memory instability, then low confidence, then insufficient
//! data. The first rule that fires wins.

use serde_json::json;

use crate::config::SelfRestraintConfig;
use crate::types::{Action, BlockDecision, DecisionContext, HealthSignals, MemorySignals, SelfRestraintReason};

pub struct SelfRestraint {
    config: SelfRestraintConfig,
}

impl SelfRestraint {
    pub fn new(config: SelfRestraintConfig) -> Self {
        Self { config }
    }

    /// Evaluate whether the agent should refrain from acting this cycle.
    /// Any of the three input groups may be absent; the rules that depend on
    /// an absent group simply cannot fire.
    pub fn evaluate_block(
        &self,
        decision: Option<&DecisionContext>,
        memory: Option<&MemorySignals>,
        health: Option<&HealthSignals>,
    ) -> BlockDecision {
        if let Some(health) = health {
            if health.conflicting() {
                return BlockDecision::block(
                    SelfRestraintReason::ConflictingSignals,
                    json!({ "health_signals": health }),
                    Action::Noop,
                );
            }
        }

        if let Some(memory) = memory {
            if memory.instability_score > self.config.max_instability_score
                || memory.recent_failures > self.config.max_recent_failures
            {
                return BlockDecision::block(
                    SelfRestraintReason::MemoryInstabilityRisk,
                    json!({
                        "instability_score": memory.instability_score,
                        "recent_failures": memory.recent_failures,
                    }),
                    Action::Noop,
                );
            }
        }

        if let Some(decision) = decision {
            if decision.confidence < self.config.min_confidence {
                return BlockDecision::block(
                    SelfRestraintReason::LowConfidence,
                    json!({
                        "confidence": decision.confidence,
                        "min_confidence": self.config.min_confidence,
                    }),
                    Action::Noop,
                );
            }
        }

        let health_absent = health.map(HealthSignals::is_empty).unwrap_or(true);
        let memory_absent = memory.is_none();
        let decision_absent = decision.is_none();
        if decision_absent && memory_absent && health_absent {
            return BlockDecision::block(
                SelfRestraintReason::InsufficientData,
                json!({}),
                Action::Noop,
            );
        }

        BlockDecision::allow()
    }

    /// True when the given confidence falls below the uncertainty floor,
    /// independent of memory — used to veto a decision before it is ever
    /// routed through governance.
    pub fn check_uncertainty(&self, decision: &DecisionContext) -> BlockDecision {
        let uncertainty = 1.0 - decision.confidence;
        if uncertainty > self.config.uncertainty_threshold {
            return BlockDecision::block(
                SelfRestraintReason::UncertaintyTooHigh,
                json!({
                    "confidence": decision.confidence,
                    "uncertainty_threshold": self.config.uncertainty_threshold,
                }),
                Action::Noop,
            );
        }
        BlockDecision::allow()
    }

    /// True when health or memory signals alone, independent of the
    /// candidate decision's confidence, call for observation instead of
    /// action this cycle.
    pub fn should_observe_instead_of_act(
        &self,
        health: Option<&HealthSignals>,
        memory: Option<&MemorySignals>,
    ) -> BlockDecision {
        let health_conflict = health.map(HealthSignals::conflicting).unwrap_or(false);
        let instability = memory.map(|m| m.instability_score).unwrap_or(0.0);

        if health_conflict || instability > 50.0 {
            return BlockDecision::block(
                SelfRestraintReason::SignalConflictRequiresObservation,
                json!({
                    "health_conflict": health_conflict,
                    "instability_score": instability,
                }),
                Action::Noop,
            );
        }

        BlockDecision::allow()
    }
}
