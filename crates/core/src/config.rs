//! Configuration management for the Agent Runtime.
//!
//! Provides centralized configuration handling with validation, environment
//! variable overrides, and secure defaults, loaded from a TOML file per
//! deployment environment.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::error::ConfigError;
use crate::types::{Action, EnvironmentPolicy};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Deployment environment name (`dev`, `stage`, `prod`, ...).
    pub env: String,
    /// How often `run()` wakes to sense, in milliseconds.
    pub loop_interval_ms: u64,
    /// When true, the orchestrator only accepts demo-safe actions.
    pub demo_mode: bool,
    /// When true (always, for this runtime) no online learning occurs.
    pub freeze_mode: bool,
    pub memory: MemoryConfig,
    pub advisor: AdvisorConfig,
    pub self_restraint: SelfRestraintConfig,
    pub governance: GovernanceConfig,
    pub arbitrator: ArbitratorConfig,
    pub perception: PerceptionConfig,
    pub logging: LoggingConfig,
    pub persistence: PersistenceConfig,
    pub environments: Vec<EnvironmentPolicy>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            loop_interval_ms: 5_000,
            demo_mode: true,
            freeze_mode: true,
            memory: MemoryConfig::default(),
            advisor: AdvisorConfig::default(),
            self_restraint: SelfRestraintConfig::default(),
            governance: GovernanceConfig::default(),
            arbitrator: ArbitratorConfig::default(),
            perception: PerceptionConfig::default(),
            logging: LoggingConfig::default(),
            persistence: PersistenceConfig::default(),
            environments: default_environment_policies(),
        }
    }
}

fn default_environment_policies() -> Vec<EnvironmentPolicy> {
    vec![
        EnvironmentPolicy {
            env: "dev".to_string(),
            allowed_actions: Action::ALL.to_vec(),
            demo_mode: true,
        },
        EnvironmentPolicy {
            env: "stage".to_string(),
            allowed_actions: vec![
                Action::Noop,
                Action::Restart,
                Action::ScaleUp,
                Action::ScaleDown,
            ],
            demo_mode: true,
        },
        EnvironmentPolicy {
            env: "prod".to_string(),
            allowed_actions: vec![Action::Noop],
            demo_mode: false,
        },
    ]
}

/// Memory capacities (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    pub decision_capacity: usize,
    pub app_state_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            decision_capacity: 50,
            app_state_capacity: 10,
        }
    }
}

/// Remote advisor client settings (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub max_retries: u32,
    pub max_failures: u32,
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8088".to_string(),
            timeout: Duration::from_secs(2),
            max_retries: 2,
            max_failures: 3,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// Self-restraint thresholds (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfRestraintConfig {
    pub min_confidence: f64,
    pub max_instability_score: f64,
    pub max_recent_failures: u32,
    pub uncertainty_threshold: f64,
}

impl Default for SelfRestraintConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            max_instability_score: 75.0,
            max_recent_failures: 5,
            uncertainty_threshold: 0.5,
        }
    }
}

/// Action governance cooldowns/repetition limits (C8).
///
/// Cooldowns are per action, in seconds, since different actions carry very
/// different blast radii: a `restart` is cheap to retry, a `rollback` is not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    pub cooldown_seconds: HashMap<Action, u64>,
    pub max_repetitions: u32,
    #[serde(with = "humantime_serde")]
    pub repetition_window: Duration,
    pub history_capacity: usize,
}

impl GovernanceConfig {
    pub fn cooldown_for(&self, action: Action) -> Duration {
        Duration::from_secs(self.cooldown_seconds.get(&action).copied().unwrap_or(0))
    }
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: HashMap::from([
                (Action::Noop, 0),
                (Action::Restart, 60),
                (Action::ScaleUp, 120),
                (Action::ScaleDown, 120),
                (Action::Rollback, 300),
            ]),
            max_repetitions: 3,
            repetition_window: Duration::from_secs(300),
            history_capacity: 100,
        }
    }
}

/// Arbitrator confidence threshold (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitratorConfig {
    pub confidence_threshold: f64,
}

impl Default for ArbitratorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
        }
    }
}

/// Perception layer bounded history (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionConfig {
    pub history_capacity: usize,
    pub onboarding_watch_path: Option<PathBuf>,
    /// Queue depth above which `sense()` synthesizes a `high_queue` event
    /// when perception is otherwise empty, mirroring
    /// `examples/original_source/agent_runtime.py`'s `if queue_depth > 5`.
    pub queue_depth_sense_threshold: u64,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            onboarding_watch_path: None,
            queue_depth_sense_threshold: 5,
        }
    }
}

/// Structured logging configuration (C14).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub proof_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            proof_log_path: PathBuf::from("proof_log.jsonl"),
        }
    }
}

/// Snapshot persistence paths, used on graceful shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub state_dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .map_err(|_| ConfigError::FileNotFound(path_ref.display().to_string()))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(config)
    }

    /// Overlay environment-variable overrides onto an existing configuration,
    /// mirroring the per-environment `.env` convention the agent's original
    /// implementation used (`AGENT_ENV`, `AGENT_LOOP_INTERVAL_MS`, ...).
    pub fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = env::var("AGENT_ENV") {
            self.env = v;
        }
        if let Ok(v) = env::var("AGENT_LOOP_INTERVAL_MS") {
            self.loop_interval_ms = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "AGENT_LOOP_INTERVAL_MS".to_string(),
                reason: "must be an integer number of milliseconds".to_string(),
            })?;
        }
        if let Ok(v) = env::var("AGENT_DEMO_MODE") {
            self.demo_mode = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "AGENT_DEMO_MODE".to_string(),
                reason: "must be true or false".to_string(),
            })?;
        }
        if let Ok(v) = env::var("AGENT_ADVISOR_BASE_URL") {
            self.advisor.base_url = v;
        }
        if let Ok(v) = env::var("AGENT_ARBITRATOR_CONFIDENCE_THRESHOLD") {
            self.arbitrator.confidence_threshold =
                v.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "AGENT_ARBITRATOR_CONFIDENCE_THRESHOLD".to_string(),
                    reason: "must be a float between 0.0 and 1.0".to_string(),
                })?;
        }
        if let Ok(v) = env::var("AGENT_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = env::var("AGENT_STATE_DIR") {
            self.persistence.state_dir = PathBuf::from(v);
        }
        Ok(self)
    }

    /// Load from a per-environment TOML file, then overlay env vars, mirroring
    /// `environments/{env}.env` resolution in the agent's original form.
    pub fn load(env_name: &str, config_dir: &std::path::Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(format!("{env_name}.toml"));
        let config = if path.exists() {
            Self::from_file(&path)?
        } else {
            let mut config = Self::default();
            config.env = env_name.to_string();
            config
        };
        let config = config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        if !(0.0..=1.0).contains(&self.arbitrator.confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "arbitrator.confidence_threshold".to_string(),
                reason: "must be between 0.0 and 1.0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.self_restraint.min_confidence) {
            return Err(ConfigError::InvalidValue {
                key: "self_restraint.min_confidence".to_string(),
                reason: "must be between 0.0 and 1.0".to_string(),
            });
        }

        if !(0.0..=100.0).contains(&self.self_restraint.max_instability_score) {
            return Err(ConfigError::InvalidValue {
                key: "self_restraint.max_instability_score".to_string(),
                reason: "must be between 0.0 and 100.0".to_string(),
            });
        }

        if self.memory.decision_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "memory.decision_capacity".to_string(),
                reason: "must be > 0".to_string(),
            });
        }

        if self.governance.max_repetitions == 0 {
            return Err(ConfigError::InvalidValue {
                key: "governance.max_repetitions".to_string(),
                reason: "must be > 0".to_string(),
            });
        }

        if self
            .environments
            .iter()
            .find(|p| p.env == self.env)
            .is_none()
        {
            return Err(ConfigError::MissingField(format!(
                "no environment policy registered for env {:?}",
                self.env
            )));
        }

        Ok(())
    }

    /// The policy for this config's active environment.
    pub fn active_environment_policy(&self) -> &EnvironmentPolicy {
        self.environments
            .iter()
            .find(|p| p.env == self.env)
            .expect("validate() guarantees a policy exists for the active env")
    }
}
