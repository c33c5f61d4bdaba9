//! Concrete perception adapters (C3).
//!
//! Each adapter wraps one external signal source. None may let an error
//! escape `perceive()` — a failing sensor yields an empty batch instead.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use super::PerceptionAdapter;
use crate::types::{Perception, PerceptionId, PerceptionPriority, PerceptionType};

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// Surfaces runtime events (deploy/scale/restart/crash/...) handed to
/// `handle_external_event` or pushed through an internal queue.
pub struct RuntimeEventAdapter {
    app: String,
    queue: Mutex<Vec<serde_json::Value>>,
}

impl RuntimeEventAdapter {
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a raw event payload for the next `perceive()` call.
    pub fn push(&self, payload: serde_json::Value) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push(payload);
        }
    }
}

#[async_trait]
impl PerceptionAdapter for RuntimeEventAdapter {
    fn name(&self) -> &str {
        "runtime_event"
    }

    async fn perceive(&self) -> Vec<Perception> {
        let Ok(mut queue) = self.queue.lock() else {
            return Vec::new();
        };
        queue
            .drain(..)
            .map(|payload| {
                let priority = match payload.get("event_type").and_then(|v| v.as_str()) {
                    Some("crash") | Some("critical_system_failure") => PerceptionPriority::CRITICAL,
                    Some("overload") => PerceptionPriority::HIGH,
                    Some("false_alarm") => PerceptionPriority::LOW,
                    _ => PerceptionPriority::MEDIUM,
                };
                Perception {
                    id: PerceptionId::new(),
                    perception_type: PerceptionType::RuntimeEvent,
                    priority,
                    source: self.app.clone(),
                    timestamp: now(),
                    payload,
                }
            })
            .collect()
    }
}

/// One poll of a health source: status plus the resource figures the
/// adapter derives priority from, mirroring the original's health-endpoint
/// poll (`status`, `error_rate`, `cpu_percent`, `memory_percent`).
#[derive(Debug, Clone)]
pub struct HealthReading {
    pub status: String,
    pub error_rate: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Derives priority from status + error rate + resource usage, per
/// spec.md §4.3: critical on `down`/`failing`; high if error rate > 5% or
/// cpu/mem > 90%; info when healthy.
fn derive_health_priority(reading: &HealthReading) -> PerceptionPriority {
    let status = reading.status.to_lowercase();
    if status == "down" || status == "failing" {
        PerceptionPriority::CRITICAL
    } else if reading.error_rate > 0.05 || reading.cpu_percent > 0.9 || reading.memory_percent > 0.9 {
        PerceptionPriority::HIGH
    } else {
        PerceptionPriority::INFO
    }
}

/// Periodically samples application health via an injected probe closure,
/// standing in for the original's HTTP health-endpoint poll. The adapter
/// derives its own priority from the reading rather than trusting the
/// probe to grade it.
pub struct HealthAdapter<F>
where
    F: Fn() -> HealthReading + Send + Sync,
{
    app: String,
    probe: F,
}

impl<F> HealthAdapter<F>
where
    F: Fn() -> HealthReading + Send + Sync,
{
    pub fn new(app: impl Into<String>, probe: F) -> Self {
        Self {
            app: app.into(),
            probe,
        }
    }
}

#[async_trait]
impl<F> PerceptionAdapter for HealthAdapter<F>
where
    F: Fn() -> HealthReading + Send + Sync,
{
    fn name(&self) -> &str {
        "health"
    }

    async fn perceive(&self) -> Vec<Perception> {
        let reading = (self.probe)();
        let priority = derive_health_priority(&reading);
        vec![Perception {
            id: PerceptionId::new(),
            perception_type: PerceptionType::Health,
            priority,
            source: self.app.clone(),
            timestamp: now(),
            payload: json!({
                "app": self.app,
                "status": reading.status,
                "error_rate": reading.error_rate,
                "cpu_percent": reading.cpu_percent,
                "memory_percent": reading.memory_percent,
            }),
        }]
    }
}

/// Watches a newline-delimited JSON onboarding file for new app-spec
/// declarations. Each line is processed at most once per process lifetime,
/// tracked by line index rather than file mtime, since appends to the same
/// file would otherwise never surface past the first read.
pub struct OnboardingAdapter {
    path: PathBuf,
    lines_processed: Mutex<usize>,
}

impl OnboardingAdapter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lines_processed: Mutex::new(0),
        }
    }
}

#[async_trait]
impl PerceptionAdapter for OnboardingAdapter {
    fn name(&self) -> &str {
        "onboarding"
    }

    async fn perceive(&self) -> Vec<Perception> {
        let Ok(contents) = tokio::fs::read_to_string(&self.path).await else {
            return Vec::new();
        };

        let already_processed = {
            let Ok(guard) = self.lines_processed.lock() else {
                return Vec::new();
            };
            *guard
        };

        let lines: Vec<&str> = contents.lines().collect();
        if already_processed >= lines.len() {
            return Vec::new();
        }

        let mut perceptions = Vec::new();
        for line in &lines[already_processed..] {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let payload: serde_json::Value = match serde_json::from_str(trimmed) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(error = %e, line = trimmed, "onboarding line is not valid JSON, skipping");
                    continue;
                }
            };

            let Some(app_id) = payload.get("app_id").and_then(|v| v.as_str()) else {
                tracing::warn!(line = trimmed, "onboarding line missing app_id, skipping");
                continue;
            };

            perceptions.push(Perception {
                id: PerceptionId::new(),
                perception_type: PerceptionType::Onboarding,
                priority: PerceptionPriority::MEDIUM,
                source: app_id.to_string(),
                timestamp: now(),
                payload,
            });
        }

        if let Ok(mut guard) = self.lines_processed.lock() {
            *guard = lines.len();
        }

        perceptions
    }
}

/// Surfaces coarse system-wide alerts (resource exhaustion, infra pages)
/// pushed in from outside the agent cycle.
pub struct SystemAlertAdapter {
    queue: Mutex<Vec<(String, PerceptionPriority)>>,
}

impl SystemAlertAdapter {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, message: impl Into<String>, priority: PerceptionPriority) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push((message.into(), priority));
        }
    }
}

impl Default for SystemAlertAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PerceptionAdapter for SystemAlertAdapter {
    fn name(&self) -> &str {
        "system_alert"
    }

    async fn perceive(&self) -> Vec<Perception> {
        let Ok(mut queue) = self.queue.lock() else {
            return Vec::new();
        };
        queue
            .drain(..)
            .map(|(message, priority)| Perception {
                id: PerceptionId::new(),
                perception_type: PerceptionType::SystemAlert,
                priority,
                source: "system".to_string(),
                timestamp: now(),
                payload: json!({"message": message}),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runtime_event_adapter_drains_queue() {
        let adapter = RuntimeEventAdapter::new("svc-a");
        adapter.push(json!({"event_id": "1", "event_type": "crash", "timestamp": "now"}));
        let first = adapter.perceive().await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].priority, PerceptionPriority::CRITICAL);

        let second = adapter.perceive().await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn onboarding_adapter_processes_each_line_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onboarding.ndjson");
        tokio::fs::write(&path, "{\"app_id\": \"new-svc\"}\n")
            .await
            .unwrap();

        let adapter = OnboardingAdapter::new(path.clone());
        let first = adapter.perceive().await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].source, "new-svc");

        let second = adapter.perceive().await;
        assert!(second.is_empty());

        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents.push_str("{\"app_id\": \"another-svc\"}\n");
        tokio::fs::write(&path, contents).await.unwrap();

        let third = adapter.perceive().await;
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].source, "another-svc");
    }

    #[tokio::test]
    async fn onboarding_adapter_skips_blank_and_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onboarding.ndjson");
        tokio::fs::write(
            &path,
            "\n{\"app_id\": \"svc-a\"}\nnot json\n{\"missing\": \"app_id\"}\n{\"app_id\": \"svc-b\"}\n",
        )
        .await
        .unwrap();

        let adapter = OnboardingAdapter::new(path);
        let batch = adapter.perceive().await;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].source, "svc-a");
        assert_eq!(batch[1].source, "svc-b");
    }

    #[tokio::test]
    async fn system_alert_adapter_drains_queue() {
        let adapter = SystemAlertAdapter::new();
        adapter.push("disk pressure", PerceptionPriority::HIGH);
        let batch = adapter.perceive().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].priority, PerceptionPriority::HIGH);
    }
}
