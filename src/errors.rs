//! Error types for the workguard subsystem.
//!
//! Admission refusal and overload are *not* errors: they are reported through
//! structured results (`should_pause`, `can_start_new_job`, `RateLimitResult`).
//! The types here cover the failures that remain: downstream failures,
//! coordination-store trouble, timeouts and configuration problems.

use crate::config::ConfigurationError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardError {
    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Coordination store protocol error: {0}")]
    StoreProtocol(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Circuit open for {service}, retry in {}s", retry_in.as_secs())]
    CircuitOpen { service: String, retry_in: Duration },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuardError {
    /// True for failures that should trigger fail-open behavior.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, GuardError::StoreUnavailable(_))
    }

    /// True when the error came from an elapsed time budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GuardError::Timeout(_))
    }
}

impl From<StoreError> for GuardError {
    fn from(error: StoreError) -> Self {
        if error.is_unavailable() {
            GuardError::StoreUnavailable(error.to_string())
        } else {
            GuardError::StoreProtocol(error.to_string())
        }
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(error: serde_json::Error) -> Self {
        GuardError::Serialization(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for GuardError {
    fn from(err: sqlx::Error) -> Self {
        GuardError::Database(err.to_string())
    }
}

impl From<ConfigurationError> for GuardError {
    fn from(err: ConfigurationError) -> Self {
        GuardError::Configuration(err.to_string())
    }
}

pub type GuardResult<T> = Result<T, GuardError>;

/// Errors raised by a [`CoordinationStore`](crate::store::CoordinationStore) backend.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Backend has no endpoint/credentials configured
    #[error("Coordination store not configured: {0}")]
    NotConfigured(String),

    /// Network failure, non-success HTTP status, or request timeout
    #[error("Coordination store connection failed: {0}")]
    Connection(String),

    /// The backend answered with an error reply for a command
    #[error("Coordination store command {command} failed: {reason}")]
    Command { command: String, reason: String },

    /// The reply could not be interpreted (wrong type, malformed JSON)
    #[error("Unexpected coordination store reply for {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },
}

impl StoreError {
    /// Unavailability covers "cannot reach" and "not configured": both fail open.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::NotConfigured(_) | StoreError::Connection(_))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Connection(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        assert!(StoreError::NotConfigured("missing url".into()).is_unavailable());
        assert!(StoreError::Connection("refused".into()).is_unavailable());
        assert!(!StoreError::UnexpectedReply {
            command: "INCR".into(),
            reply: "\"abc\"".into()
        }
        .is_unavailable());
    }

    #[test]
    fn test_store_error_conversion_preserves_fail_open_class() {
        let unavailable: GuardError = StoreError::Connection("refused".into()).into();
        assert!(unavailable.is_store_unavailable());

        let protocol: GuardError = StoreError::Command {
            command: "ZADD".into(),
            reason: "WRONGTYPE".into(),
        }
        .into();
        assert!(!protocol.is_store_unavailable());
        assert!(matches!(protocol, GuardError::StoreProtocol(_)));
    }

    #[test]
    fn test_circuit_open_message_includes_retry_seconds() {
        let err = GuardError::CircuitOpen {
            service: "database".into(),
            retry_in: Duration::from_secs(12),
        };
        assert_eq!(err.to_string(), "Circuit open for database, retry in 12s");
    }
}
