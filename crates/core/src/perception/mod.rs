//! Perception layer (C4): aggregates adapters, sorts by priority, and keeps
//! a bounded history.

pub mod adapters;

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::types::{Perception, PerceptionPriority, PerceptionType};

/// A source of perceptions. Implementations must never panic or propagate a
/// transport error out of `perceive()` — a dead sensor reports an empty
/// result rather than poisoning the cycle.
#[async_trait]
pub trait PerceptionAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn perceive(&self) -> Vec<Perception>;
}

/// Aggregates registered adapters, fusing their output into one
/// priority-sorted batch per cycle, and retains a bounded rolling history.
pub struct PerceptionLayer {
    adapters: Vec<Box<dyn PerceptionAdapter>>,
    history: VecDeque<Perception>,
    history_capacity: usize,
}

impl PerceptionLayer {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            adapters: Vec::new(),
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
        }
    }

    pub fn register(&mut self, adapter: Box<dyn PerceptionAdapter>) {
        self.adapters.push(adapter);
    }

    /// Poll every registered adapter and return the fused batch, sorted
    /// descending by priority. The batch is also folded into history.
    pub async fn sense(&mut self) -> Vec<Perception> {
        let mut batch = Vec::new();
        for adapter in &self.adapters {
            let mut perceived = adapter.perceive().await;
            batch.append(&mut perceived);
        }
        batch.sort_by(|a, b| b.priority.cmp(&a.priority));

        for p in &batch {
            if self.history.len() == self.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(p.clone());
        }

        batch
    }

    pub fn filter_by_type(&self, kind: PerceptionType) -> Vec<&Perception> {
        self.history
            .iter()
            .filter(|p| p.perception_type == kind)
            .collect()
    }

    pub fn filter_by_min_priority(&self, min: PerceptionPriority) -> Vec<&Perception> {
        self.history.iter().filter(|p| p.priority >= min).collect()
    }

    pub fn highest_priority(&self) -> Option<&Perception> {
        self.history.iter().max_by_key(|p| p.priority)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

/// Validates and normalizes a raw perception payload against the schema the
/// runtime-event adapter and `handle_external_event` both rely on.
pub fn validate_runtime_event(
    payload: &serde_json::Value,
) -> Result<(), crate::types::ValidationError> {
    use crate::types::ValidationError;

    const ALLOWED_EVENT_TYPES: [&str; 8] = [
        "deploy",
        "scale",
        "restart",
        "crash",
        "overload",
        "false_alarm",
        "critical_system_failure",
        "high_queue",
    ];
    const REQUIRED_KEYS: [&str; 3] = ["event_id", "event_type", "timestamp"];

    let object = payload.as_object().ok_or(ValidationError::NotAnObject)?;

    for key in REQUIRED_KEYS {
        if !object.contains_key(key) {
            return Err(ValidationError::MissingKey(key.to_string()));
        }
    }

    let event_type = object
        .get("event_type")
        .and_then(|v| v.as_str())
        .ok_or(ValidationError::EventTypeNotString)?;

    if !ALLOWED_EVENT_TYPES.contains(&event_type) {
        return Err(ValidationError::DisallowedEventType(event_type.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::adapters::HealthAdapter;
    use serde_json::json;

    #[tokio::test]
    async fn sense_sorts_by_priority_descending() {
        use crate::perception::adapters::HealthReading;

        let mut layer = PerceptionLayer::new(10);
        layer.register(Box::new(HealthAdapter::new("svc-a", || HealthReading {
            status: "degraded".to_string(),
            error_rate: 0.1,
            cpu_percent: 0.5,
            memory_percent: 0.5,
        })));
        let batch = layer.sense().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].priority, crate::types::PerceptionPriority::HIGH);
    }

    #[test]
    fn validate_runtime_event_accepts_allowed_type() {
        let payload = json!({"event_id": "1", "event_type": "deploy", "timestamp": "now"});
        assert!(validate_runtime_event(&payload).is_ok());
    }

    #[test]
    fn validate_runtime_event_rejects_unknown_type() {
        let payload = json!({"event_id": "1", "event_type": "nonsense", "timestamp": "now"});
        assert!(matches!(
            validate_runtime_event(&payload),
            Err(ValidationError::DisallowedEventType(_))
        ));
    }

    #[test]
    fn validate_runtime_event_rejects_missing_key() {
        let payload = json!({"event_type": "deploy", "timestamp": "now"});
        assert!(matches!(
            validate_runtime_event(&payload),
            Err(ValidationError::MissingKey(_))
        ));
    }
}
