//! # Circuit Breaker Registry
//!
//! One breaker per logical downstream service for the lifetime of the process.
//! Breakers are created lazily on first lookup; later lookups for the same
//! name return the same instance regardless of the preset they ask for.

use crate::clock::{SharedClock, SystemClock};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerPreset,
    SystemCircuitBreakerMetrics,
};
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

static GLOBAL_REGISTRY: OnceLock<CircuitBreakerRegistry> = OnceLock::new();

/// Registry of circuit breakers keyed by service name
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    circuit_breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    clock: SharedClock,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(SystemClock::shared())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            circuit_breakers: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Process-wide registry on the system clock
    pub fn global() -> &'static CircuitBreakerRegistry {
        GLOBAL_REGISTRY.get_or_init(CircuitBreakerRegistry::default)
    }

    /// Get or create the breaker for `service` using a preset
    pub fn get_or_create(&self, service: &str, preset: CircuitBreakerPreset) -> Arc<CircuitBreaker> {
        self.get_or_create_with_config(service, preset.config())
    }

    /// Get or create the breaker for `service` with explicit thresholds
    pub fn get_or_create_with_config(
        &self,
        service: &str,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.circuit_breakers.get(service) {
            if existing.config() != &config {
                debug!(
                    component = service,
                    "Circuit breaker exists with different config; keeping original"
                );
            }
            return Arc::clone(existing.value());
        }

        let config = match config.validate() {
            Ok(()) => config,
            Err(reason) => {
                warn!(
                    component = service,
                    reason = %reason,
                    "Invalid circuit breaker config, using NORMAL preset"
                );
                CircuitBreakerPreset::Normal.config()
            }
        };

        let breaker = self
            .circuit_breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(service, config, Arc::clone(&self.clock)))
            })
            .clone();

        info!(
            component = service,
            total_circuit_breakers = self.circuit_breakers.len(),
            "Registered circuit breaker"
        );
        breaker
    }

    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuit_breakers
            .get(service)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// All registered service names, sorted
    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .circuit_breakers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn get_component_metrics(&self, service: &str) -> Option<CircuitBreakerMetrics> {
        self.get(service).map(|breaker| breaker.metrics())
    }

    pub fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::default();
        for entry in self.circuit_breakers.iter() {
            system_metrics.add_circuit_breaker(entry.key().clone(), entry.value().metrics());
        }
        system_metrics
    }

    /// Names of breakers currently Open
    pub fn open_circuits(&self) -> Vec<String> {
        self.get_system_metrics().open_circuits()
    }

    /// Force open all circuit breakers (emergency stop)
    pub fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open (emergency stop)");
        for entry in self.circuit_breakers.iter() {
            entry.value().force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub fn force_close_all(&self) {
        warn!("Forcing all circuit breakers closed (emergency recovery)");
        for entry in self.circuit_breakers.iter() {
            entry.value().force_closed();
        }
    }
}
