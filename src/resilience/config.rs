//! # Circuit Breaker Configuration
//!
//! Thresholds for a single breaker plus the three named presets services pick
//! from.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed before opening the circuit
    pub failure_threshold: u32,

    /// Time since the last failure before an Open circuit admits a trial call
    pub reset_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.reset_timeout.is_zero() {
            return Err("reset_timeout must be greater than 0".to_string());
        }

        if self.reset_timeout > Duration::from_secs(600) {
            return Err("reset_timeout should not exceed 600 seconds".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerPreset::Normal.config()
    }
}

/// Named breaker presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerPreset {
    /// Trips fast, recovers fast: the backing database and other must-not-pile-on services
    Critical,
    /// General downstream calls
    Normal,
    /// Flaky but non-essential services
    Relaxed,
}

impl CircuitBreakerPreset {
    pub const fn config(self) -> CircuitBreakerConfig {
        match self {
            CircuitBreakerPreset::Critical => CircuitBreakerConfig {
                failure_threshold: 3,
                reset_timeout: Duration::from_secs(30),
            },
            CircuitBreakerPreset::Normal => CircuitBreakerConfig {
                failure_threshold: 5,
                reset_timeout: Duration::from_secs(60),
            },
            CircuitBreakerPreset::Relaxed => CircuitBreakerConfig {
                failure_threshold: 10,
                reset_timeout: Duration::from_secs(120),
            },
        }
    }
}
