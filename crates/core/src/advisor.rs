//! Remote advisor client (C6): talks to the RL advisor service behind a
//! retrying transport and a cross-call circuit breaker, always degrading to
//! a safe `noop` fallback rather than blocking the cycle.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AdvisorConfig;
use crate::state_adapter::AdaptedState;
use crate::types::{Action, TransportError};

/// One advisor response, before arbitration against the local rule advisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorDecision {
    pub action: Action,
    pub confidence: f64,
    pub reason: String,
    pub source: String,
}

impl AdvisorDecision {
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Noop,
            confidence: 0.0,
            reason: reason.into(),
            source: "remote_client_fallback".to_string(),
        }
    }
}

/// The wire transport used to reach the advisor service. Abstracted so tests
/// can swap in a deterministic double instead of a real socket.
#[async_trait]
pub trait AdvisorTransport: Send + Sync {
    async fn decide(&self, state: &AdaptedState) -> Result<AdvisorDecision, TransportError>;
    async fn health(&self) -> Result<Value, TransportError>;
    async fn scope(&self) -> Result<Value, TransportError>;
}

/// `reqwest`-backed transport hitting `POST {base_url}/decide`.
pub struct HttpAdvisorTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpAdvisorTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl AdvisorTransport for HttpAdvisorTransport {
    async fn decide(&self, state: &AdaptedState) -> Result<AdvisorDecision, TransportError> {
        let response = self
            .client
            .post(format!("{}/decide", self.base_url))
            .json(state)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.timeout)
                } else {
                    TransportError::ConnectionFailed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(TransportError::BadStatus(response.status().as_u16()));
        }

        response
            .json::<AdvisorDecision>()
            .await
            .map_err(|e| TransportError::DecodeError(e.to_string()))
    }

    async fn health(&self) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::DecodeError(e.to_string()))
    }

    async fn scope(&self) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(format!("{}/scope", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::DecodeError(e.to_string()))
    }
}

/// Wraps a transport with bounded intra-call retries and a cross-call
/// circuit breaker. Retries tolerate a single flaky request; the breaker
/// protects the cycle from a persistently unreachable advisor.
pub struct RemoteAdvisorClient<T: AdvisorTransport> {
    transport: T,
    max_retries: u32,
    max_failures: u32,
    cooldown: Duration,
    consecutive_failures: AtomicU32,
    opened_at: AtomicU64,
}

impl<T: AdvisorTransport> RemoteAdvisorClient<T> {
    pub fn new(transport: T, config: &AdvisorConfig) -> Self {
        Self {
            transport,
            max_retries: config.max_retries,
            max_failures: config.max_failures,
            cooldown: config.cooldown,
            consecutive_failures: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
        }
    }

    fn breaker_open(&self) -> Option<Duration> {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures < self.max_failures {
            return None;
        }
        let opened_at = self.opened_at.load(Ordering::Relaxed);
        let elapsed = now_unix().saturating_sub(opened_at);
        if elapsed >= self.cooldown.as_secs() {
            None
        } else {
            Some(Duration::from_secs(self.cooldown.as_secs() - elapsed))
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == self.max_failures {
            self.opened_at.store(now_unix(), Ordering::Relaxed);
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Get a decision, retrying transient failures, then consulting the
    /// circuit breaker, and finally falling back to a safe `noop`.
    pub async fn get_decision(&self, state: &AdaptedState) -> AdvisorDecision {
        if let Some(remaining) = self.breaker_open() {
            tracing::warn!(?remaining, "advisor circuit breaker open, skipping call");
            return AdvisorDecision::fallback(format!(
                "circuit breaker open, {remaining:?} remaining"
            ));
        }

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match self.transport.decide(state).await {
                Ok(decision) => {
                    self.record_success();
                    return decision;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "advisor call failed");
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        let backoff = Duration::from_millis(100 * 2u64.pow(attempt));
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        self.record_failure();
        AdvisorDecision::fallback(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown transport error".to_string()),
        )
    }

    pub async fn check_health(&self) -> Result<Value, TransportError> {
        self.transport.health().await
    }

    pub async fn describe_scope(&self) -> Result<Value, TransportError> {
        self.transport.scope().await
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FlakyTransport {
        failures_before_success: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AdvisorTransport for FlakyTransport {
        async fn decide(&self, _state: &AdaptedState) -> Result<AdvisorDecision, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed);
            if call < self.failures_before_success {
                Err(TransportError::ConnectionFailed("refused".to_string()))
            } else {
                Ok(AdvisorDecision {
                    action: Action::Restart,
                    confidence: 0.9,
                    reason: "ok".to_string(),
                    source: "rl_brain".to_string(),
                })
            }
        }

        async fn health(&self) -> Result<Value, TransportError> {
            Ok(serde_json::json!({"status": "ok"}))
        }

        async fn scope(&self) -> Result<Value, TransportError> {
            Ok(serde_json::json!({"actions": ["noop", "restart"]}))
        }
    }

    fn test_state() -> AdaptedState {
        AdaptedState {
            app: "svc-a".to_string(),
            env: "dev".to_string(),
            event_type: "deploy".to_string(),
            state: "healthy".to_string(),
            latency_ms: 10.0,
            errors_last_min: 0,
            workers: 2,
        }
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let transport = FlakyTransport {
            failures_before_success: 1,
            calls: AtomicUsize::new(0),
        };
        let config = AdvisorConfig {
            max_retries: 2,
            ..AdvisorConfig::default()
        };
        let client = RemoteAdvisorClient::new(transport, &config);
        let decision = client.get_decision(&test_state()).await;
        assert_eq!(decision.action, Action::Restart);
        assert_eq!(client.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn breaker_opens_after_max_failures_and_falls_back() {
        let transport = FlakyTransport {
            failures_before_success: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let config = AdvisorConfig {
            max_retries: 0,
            max_failures: 2,
            cooldown: Duration::from_secs(300),
            ..AdvisorConfig::default()
        };
        let client = RemoteAdvisorClient::new(transport, &config);

        let first = client.get_decision(&test_state()).await;
        assert_eq!(first.action, Action::Noop);
        let second = client.get_decision(&test_state()).await;
        assert_eq!(second.action, Action::Noop);

        // Breaker now open; a third call must not hit the transport at all.
        let third = client.get_decision(&test_state()).await;
        assert_eq!(third.source, "remote_client_fallback");
    }
}
