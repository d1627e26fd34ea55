//! # Health Endpoint State
//!
//! Shared state for the health endpoint: the backpressure controller, the
//! circuit breaker registry and the process start time.

use crate::backpressure::BackpressureController;
use crate::resilience::CircuitBreakerRegistry;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct HealthState {
    pub controller: Arc<BackpressureController>,
    pub circuit_breakers: CircuitBreakerRegistry,
    pub started_at: Instant,
}

impl HealthState {
    pub fn new(controller: Arc<BackpressureController>, circuit_breakers: CircuitBreakerRegistry) -> Self {
        Self {
            controller,
            circuit_breakers,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
