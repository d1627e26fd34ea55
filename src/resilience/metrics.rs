//! # Circuit Breaker Metrics
//!
//! Point-in-time snapshots of breaker behavior, consumed by the health endpoint
//! and by logging.

use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Calls that reached the protected operation
    pub total_calls: u64,

    /// Successful protected calls
    pub success_count: u64,

    /// Failed protected calls (timeouts included)
    pub failure_count: u64,

    /// Calls short-circuited while Open (fallback or immediate error)
    pub rejected_count: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u64,

    /// Current circuit breaker state
    pub current_state: CircuitState,

    /// Failure rate over protected calls (0.0 to 1.0)
    pub failure_rate: f64,

    /// Epoch millis of the most recent failure
    pub last_failure_at: Option<i64>,
}

impl CircuitBreakerMetrics {
    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.1 || self.total_calls < 10,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing system health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Failures: {} | Rejected: {} | Failure rate: {:.1}%",
            self.state_description(),
            self.total_calls,
            self.failure_count,
            self.rejected_count,
            self.failure_rate * 100.0
        )
    }
}

/// Registry-wide view over every breaker in the process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,
}

impl SystemCircuitBreakerMetrics {
    pub fn add_circuit_breaker(&mut self, name: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(name, metrics);
    }

    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();
        for metrics in self.circuit_breakers.values() {
            *counts.entry(metrics.current_state).or_insert(0) += 1;
        }
        counts
    }

    /// Names of breakers currently Open, sorted
    pub fn open_circuits(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .circuit_breakers
            .iter()
            .filter(|(_, metrics)| metrics.current_state == CircuitState::Open)
            .map(|(name, _)| name.clone())
            .collect();
        open.sort();
        open
    }

    /// Fraction of breakers in a healthy state; 1.0 when none exist
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0;
        }
        let healthy = self
            .circuit_breakers
            .values()
            .filter(|metrics| metrics.is_healthy())
            .count();
        healthy as f64 / self.circuit_breakers.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: CircuitState, failure_rate: f64, total_calls: u64) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls,
            success_count: 0,
            failure_count: 0,
            rejected_count: 0,
            consecutive_failures: 0,
            current_state: state,
            failure_rate,
            last_failure_at: None,
        }
    }

    #[test]
    fn test_health_assessment() {
        assert!(snapshot(CircuitState::Closed, 0.05, 100).is_healthy());
        assert!(!snapshot(CircuitState::Closed, 0.5, 100).is_healthy());
        assert!(snapshot(CircuitState::Closed, 0.5, 4).is_healthy());
        assert!(!snapshot(CircuitState::Open, 0.0, 0).is_healthy());
        assert!(snapshot(CircuitState::HalfOpen, 0.0, 0).is_healthy());
    }

    #[test]
    fn test_system_metrics_aggregation() {
        let mut system = SystemCircuitBreakerMetrics::default();
        assert_eq!(system.health_score(), 1.0);

        system.add_circuit_breaker("db".into(), snapshot(CircuitState::Open, 1.0, 10));
        system.add_circuit_breaker("api".into(), snapshot(CircuitState::Closed, 0.0, 10));

        assert_eq!(system.open_circuits(), vec!["db".to_string()]);
        assert_eq!(system.count_by_state().get(&CircuitState::Closed), Some(&1));
        assert_eq!(system.health_score(), 0.5);
    }
}
