//! State adapter (C5): flattens a perception plus the agent's FSM state into
//! the schema the remote advisor and the rule advisor both consume.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Perception;

/// Flat state schema handed to the advisor transport and to the local rule
/// advisor, mirroring `StateAdapter.adapt_state`'s output shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptedState {
    pub app: String,
    pub env: String,
    pub event_type: String,
    pub state: String,
    pub latency_ms: f64,
    pub errors_last_min: u64,
    pub workers: u32,
}

impl AdaptedState {
    /// Scales the numeric fields into a fixed-length vector for future
    /// numeric model consumers; normalization bounds mirror plausible
    /// production ranges (latency capped at 10s, errors at 100/min, workers
    /// at 64) rather than learned statistics, since no online learning
    /// occurs in this runtime.
    pub fn to_vector(&self) -> [f64; 3] {
        [
            (self.latency_ms / 10_000.0).clamp(0.0, 1.0),
            (self.errors_last_min as f64 / 100.0).clamp(0.0, 1.0),
            (self.workers as f64 / 64.0).clamp(0.0, 1.0),
        ]
    }
}

/// Derives an `AdaptedState` from a perception and the agent's current FSM
/// state.
///
/// `fsm_state` is the lowercased FSM state name, per spec.md §4.5 ("`state`
/// (FSM state lowercased)") — it is the agent's own phase of its cycle, not
/// the observed application's health. Missing metrics default to 0, per
/// spec.md §4.5; this mirrors `examples/original_source/core/state_adapter.py`'s
/// `adapt_state`, which also never consults prior memory despite accepting
/// a `memory_context` parameter for interface symmetry.
pub fn adapt_state(perception: &Perception, app: &str, env: &str, fsm_state: &str) -> AdaptedState {
    let payload: &Value = &perception.payload;

    let event_type = payload
        .get("event_type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let state = fsm_state.to_lowercase();

    let latency_ms = payload.get("latency_ms").and_then(|v| v.as_f64()).unwrap_or(0.0);

    let errors_last_min = payload.get("errors_last_min").and_then(|v| v.as_u64()).unwrap_or(0);

    let workers = payload
        .get("workers")
        .and_then(|v| v.as_u64())
        .map(|w| w as u32)
        .unwrap_or(0);

    AdaptedState {
        app: app.to_string(),
        env: env.to_string(),
        event_type,
        state,
        latency_ms,
        errors_last_min,
        workers,
    }
}
