//! Core data model for the Agent Runtime System.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a single agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a perceived event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceptionId(pub Uuid);

impl PerceptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PerceptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PerceptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed vocabulary of operational actions the orchestrator may execute.
///
/// Values are pinned to the canonical numeric mapping
/// `{0: noop, 1: restart, 2: scale_up, 3: scale_down, 4: rollback}` used by
/// the external advisor protocol and by `Action::from_code`/`to_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Noop,
    Restart,
    ScaleUp,
    ScaleDown,
    Rollback,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Noop,
        Action::Restart,
        Action::ScaleUp,
        Action::ScaleDown,
        Action::Rollback,
    ];

    /// The canonical numeric code for this action, as used by the remote
    /// advisor protocol and the orchestrator's `validate_and_execute`.
    pub fn to_code(self) -> u8 {
        match self {
            Action::Noop => 0,
            Action::Restart => 1,
            Action::ScaleUp => 2,
            Action::ScaleDown => 3,
            Action::Rollback => 4,
        }
    }

    /// The action vocabulary is closed: an unrecognized code maps to `noop`
    /// rather than failing, per spec.md §3.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Action::Restart,
            2 => Action::ScaleUp,
            3 => Action::ScaleDown,
            4 => Action::Rollback,
            _ => Action::Noop,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::Noop => "noop",
            Action::Restart => "restart",
            Action::ScaleUp => "scale_up",
            Action::ScaleDown => "scale_down",
            Action::Rollback => "rollback",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "noop" => Some(Action::Noop),
            "restart" => Some(Action::Restart),
            "scale_up" => Some(Action::ScaleUp),
            "scale_down" => Some(Action::ScaleDown),
            "rollback" => Some(Action::Rollback),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Priority assigned to a perceived event by the adapter that produced it.
///
/// A graded `1..=10` scale per spec.md §4.3, rather than a coarse bucket
/// enum, so an adapter (the Health Adapter in particular) can express how
/// far past a threshold a reading is, the way `Action::to_code`/`from_code`
/// pins the action vocabulary to its own canonical numeric mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PerceptionPriority(pub u8);

impl PerceptionPriority {
    pub const INFO: Self = Self(1);
    pub const LOW: Self = Self(3);
    pub const MEDIUM: Self = Self(5);
    pub const HIGH: Self = Self(7);
    pub const CRITICAL: Self = Self(10);

    /// Clamp an arbitrary reading onto the `1..=10` scale.
    pub fn new(value: u8) -> Self {
        Self(value.clamp(1, 10))
    }
}

/// The kind of signal a perception carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerceptionType {
    RuntimeEvent,
    Health,
    Onboarding,
    SystemAlert,
}

/// A single perceived signal, produced by one of the perception adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Perception {
    pub id: PerceptionId,
    pub perception_type: PerceptionType,
    pub priority: PerceptionPriority,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// The recorded fate of one decision, used to derive `MemorySignals`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Pending,
    Success,
    Failure,
    Blocked,
    Refused,
    Noop,
    Observe,
}

/// A single arbitrated/self-restrained decision made during one agent cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub app: String,
    pub env: String,
    pub action: Action,
    pub confidence: f64,
    pub source: String,
    pub reason: String,
    pub observed_only: bool,
    pub outcome: DecisionOutcome,
    #[serde(default)]
    pub context: Value,
}

/// A snapshot of one application's state at a point in time, stored in
/// memory's per-app bounded FIFO (C2). Distinct from `AdaptedState`, C5's
/// flat advisor-input schema derived fresh from a perception each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStateSnapshot {
    pub timestamp: DateTime<Utc>,
    pub app_id: String,
    pub status: String,
    pub health: Value,
    pub recent_events: Vec<String>,
    pub metrics: Option<Value>,
}

/// Aggregate signals derived on demand from the tail of the decision FIFO
/// (optionally scoped to one `app_id`); never cached across cycles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySignals {
    pub recent_failures: u32,
    pub recent_successes: u32,
    pub recent_actions: Vec<Action>,
    /// Longest run of identical consecutive actions in `recent_actions`.
    pub repeated_actions: u32,
    /// `100 * recent_failures / total`, or `0.0` when there is no history.
    pub instability_score: f64,
    pub last_action_outcome: Option<DecisionOutcome>,
}

/// Health-signal inputs consulted by self-restraint's conflicting-signal
/// check. Each pair of opposing fields being simultaneously true indicates a
/// contradictory reading from the health adapter.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HealthSignals {
    #[serde(default)]
    pub cpu_high: bool,
    #[serde(default)]
    pub cpu_low: bool,
    #[serde(default)]
    pub memory_high: bool,
    #[serde(default)]
    pub memory_low: bool,
    #[serde(default)]
    pub error_rate_high: bool,
    #[serde(default)]
    pub error_rate_zero: bool,
}

impl HealthSignals {
    pub fn is_empty(&self) -> bool {
        !self.cpu_high
            && !self.cpu_low
            && !self.memory_high
            && !self.memory_low
            && !self.error_rate_high
            && !self.error_rate_zero
    }

    /// True when any of the three opposing-pair readings contradict each
    /// other, per spec.md's self-restraint conflicting-signals rule.
    pub fn conflicting(&self) -> bool {
        (self.cpu_high && self.cpu_low)
            || (self.memory_high && self.memory_low)
            || (self.error_rate_high && self.error_rate_zero)
    }
}

/// The candidate decision's own data, consulted by self-restraint's
/// low-confidence and insufficient-data rules.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DecisionContext {
    pub confidence: f64,
}

/// Per-environment execution policy consulted by the safe orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentPolicy {
    pub env: String,
    pub allowed_actions: Vec<Action>,
    pub demo_mode: bool,
}

impl EnvironmentPolicy {
    pub fn allows(&self, action: Action) -> bool {
        self.allowed_actions.contains(&action)
    }
}

/// Closed vocabulary of reasons `ActionGovernance` may cite for a refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceReason {
    CooldownActive,
    RepetitionLimitExceeded,
    ActionNotEligible,
    PrerequisiteNotMet,
}

/// Outcome of passing a proposed action through `ActionGovernance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceDecision {
    pub should_block: bool,
    pub action: Action,
    pub reason: Option<GovernanceReason>,
    pub details: Option<Value>,
}

impl GovernanceDecision {
    pub fn allow(action: Action) -> Self {
        Self {
            should_block: false,
            action,
            reason: None,
            details: None,
        }
    }

    pub fn block(action: Action, reason: GovernanceReason, details: Value) -> Self {
        Self {
            should_block: true,
            action,
            reason: Some(reason),
            details: Some(details),
        }
    }
}

/// Closed vocabulary of reasons `SelfRestraint` may cite for a refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfRestraintReason {
    ConflictingSignals,
    LowConfidence,
    MemoryInstabilityRisk,
    InsufficientData,
    SignalConflictRequiresObservation,
    UncertaintyTooHigh,
}

/// Outcome of passing a proposed decision through `SelfRestraint`. Always
/// `self_imposed = true`: the agent is refusing its own decision, not being
/// refused by an external gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDecision {
    pub should_block: bool,
    pub reason: Option<SelfRestraintReason>,
    pub details: Option<Value>,
    pub self_imposed: bool,
    /// The action self-restraint recommends instead, when it blocks
    /// (`noop` for most rules, `observe` for the instability-driven ones).
    pub recommended_action: Option<Action>,
}

impl BlockDecision {
    pub fn allow() -> Self {
        Self {
            should_block: false,
            reason: None,
            details: None,
            self_imposed: true,
            recommended_action: None,
        }
    }

    pub fn block(reason: SelfRestraintReason, details: Value, recommended_action: Action) -> Self {
        Self {
            should_block: true,
            reason: Some(reason),
            details: Some(details),
            self_imposed: true,
            recommended_action: Some(recommended_action),
        }
    }
}

/// Finite-state-machine states for one agent's execution cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Idle,
    Sensing,
    Validating,
    Deciding,
    Governing,
    Executing,
    Observing,
    Explaining,
    Blocked,
    ShuttingDown,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One audited entry in the append-only proof log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofEvent {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Value,
}
