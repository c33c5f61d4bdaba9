//! Error types for the Agent Runtime System

use thiserror::Error;

/// Top-level runtime error, aggregating every domain error via `#[from]`.
#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("advisor transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("illegal FSM transition: {0}")]
    IllegalTransition(#[from] FsmError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("environment variable error for {key}: {reason}")]
    EnvError { key: String, reason: String },
}

/// Errors raised while validating an incoming perception payload.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing required key: {0}")]
    MissingKey(String),

    #[error("event_type {0:?} is not in the allowed set")]
    DisallowedEventType(String),

    #[error("event_type is not a string")]
    EventTypeNotString,
}

/// Errors from the remote advisor transport.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("unexpected response status: {0}")]
    BadStatus(u16),

    #[error("response body could not be decoded: {0}")]
    DecodeError(String),

    #[error("circuit breaker open, cooling down for {remaining:?}")]
    CircuitOpen { remaining: std::time::Duration },
}

/// Illegal finite-state-machine transitions — these indicate a programming
/// bug, not an operational failure, and are never absorbed silently.
#[derive(Error, Debug, Clone)]
pub enum FsmError {
    #[error("cannot transition from {from:?} to {to:?}")]
    IllegalTransition { from: String, to: String },

    #[error("agent_id mismatch on load: file has {found}, expected {expected}")]
    AgentIdMismatch { found: String, expected: String },
}

/// Errors while persisting or restoring agent/memory snapshots.
#[derive(Error, Debug, Clone)]
pub enum PersistenceError {
    #[error("failed to write snapshot to {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("failed to read snapshot from {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("failed to (de)serialize snapshot: {0}")]
    SerdeError(String),
}

/// Result alias used throughout the crate.
pub type AgentResult<T> = Result<T, AgentError>;
