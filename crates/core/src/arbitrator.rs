//! Decision arbitrator (C9): fuses the remote advisor's decision with the
//! local rule advisor's decision into one chosen action.

use serde::{Deserialize, Serialize};

use crate::advisor::AdvisorDecision;
use crate::config::ArbitratorConfig;
use crate::types::Action;

/// A decision produced by the local, non-learning rule advisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDecision {
    pub action: Action,
    pub confidence: f64,
    pub reason: String,
}

impl RuleDecision {
    pub fn source() -> &'static str {
        "rule_based"
    }
}

/// The arbitrated outcome: the winning action plus a full audit trail of
/// both original candidate decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitratedDecision {
    pub action: Action,
    pub confidence: f64,
    pub reason: String,
    pub source: String,
    pub advisor_candidate: AdvisorDecision,
    pub rule_candidate: RuleDecision,
}

pub struct Arbitrator {
    config: ArbitratorConfig,
}

impl Arbitrator {
    pub fn new(config: ArbitratorConfig) -> Self {
        Self { config }
    }

    /// Choose between the advisor's and the rule's candidate decisions.
    ///
    /// The advisor wins when its confidence meets the configured threshold;
    /// otherwise the rule advisor's decision is used, since it is always
    /// available and never requires network access.
    pub fn arbitrate(
        &self,
        advisor: AdvisorDecision,
        rule: RuleDecision,
    ) -> ArbitratedDecision {
        if advisor.confidence >= self.config.confidence_threshold {
            ArbitratedDecision {
                action: advisor.action,
                confidence: advisor.confidence,
                reason: format!(
                    "advisor confidence {:.2} meets threshold {:.2}",
                    advisor.confidence, self.config.confidence_threshold
                ),
                source: "rl_brain".to_string(),
                advisor_candidate: advisor,
                rule_candidate: rule,
            }
        } else {
            ArbitratedDecision {
                action: rule.action,
                confidence: rule.confidence,
                reason: format!(
                    "advisor confidence {:.2} below threshold {:.2}, deferring to rule advisor",
                    advisor.confidence, self.config.confidence_threshold
                ),
                source: RuleDecision::source().to_string(),
                advisor_candidate: advisor,
                rule_candidate: rule,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advisor(confidence: f64) -> AdvisorDecision {
        AdvisorDecision {
            action: Action::Restart,
            confidence,
            reason: "advisor says restart".to_string(),
            source: "rl_brain".to_string(),
        }
    }

    fn rule() -> RuleDecision {
        RuleDecision {
            action: Action::Noop,
            confidence: 0.5,
            reason: "rule says noop".to_string(),
        }
    }

    #[test]
    fn advisor_wins_above_threshold() {
        let arb = Arbitrator::new(ArbitratorConfig {
            confidence_threshold: 0.7,
        });
        let decision = arb.arbitrate(advisor(0.8), rule());
        assert_eq!(decision.action, Action::Restart);
        assert_eq!(decision.source, "rl_brain");
    }

    #[test]
    fn rule_wins_below_threshold() {
        let arb = Arbitrator::new(ArbitratorConfig {
            confidence_threshold: 0.7,
        });
        let decision = arb.arbitrate(advisor(0.3), rule());
        assert_eq!(decision.action, Action::Noop);
        assert_eq!(decision.source, "rule_based");
    }

    #[test]
    fn audit_trail_retains_both_candidates() {
        let arb = Arbitrator::new(ArbitratorConfig::default());
        let decision = arb.arbitrate(advisor(0.9), rule());
        assert_eq!(decision.advisor_candidate.action, Action::Restart);
        assert_eq!(decision.rule_candidate.action, Action::Noop);
    }
}
