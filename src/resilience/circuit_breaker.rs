//! # Circuit Breaker Implementation
//!
//! Fault isolation for calls to a downstream service. Classic three-state
//! machine: Closed (normal operation), Open (failing fast, optional fallback),
//! and Half-Open (a single trial call decides between the two).
//!
//! State is process-local. A cold start resets every breaker to Closed.

use crate::clock::SharedClock;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use crate::telemetry;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lock-free counters backing [`CircuitBreakerMetrics`]
#[derive(Debug, Default)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_count: AtomicU64,
}

impl AtomicCircuitBreakerMetrics {
    #[inline]
    fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_rejection(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - the next call is a trial
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open and no fallback was supplied
    #[error("Circuit breaker open for {component}, retry in {}s", retry_in.as_secs())]
    CircuitOpen {
        component: String,
        retry_in: Duration,
    },

    /// Operation (or fallback) failed
    #[error("Operation failed: {0}")]
    OperationFailed(E),

    /// Operation exceeded its time budget; recorded as a failure
    #[error("Operation for {component} timed out after {}ms", budget.as_millis())]
    Timeout { component: String, budget: Duration },
}

impl<E> CircuitBreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::CircuitOpen { .. })
    }
}

enum Admission<'a> {
    /// Carries the trial marker when the call is a Half-Open trial
    Allowed(Option<TrialGuard<'a>>),
    Rejected { retry_in: Duration },
}

/// Ownership of the single Half-Open trial. Dropped without an outcome
/// (the caller's future was cancelled), the trial counts as failed.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl TrialGuard<'_> {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon_trial();
        }
    }
}

/// Per-service circuit breaker with atomic state management
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Service name for logging and metrics
    name: String,

    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,

    /// Configuration parameters
    config: CircuitBreakerConfig,

    /// Consecutive failures while Closed
    failures: AtomicU64,

    /// Epoch millis of the last recorded failure (0 = none)
    last_failure_at: AtomicI64,

    /// A Half-Open trial call is running
    trial_in_flight: AtomicBool,

    metrics: AtomicCircuitBreakerMetrics,

    clock: SharedClock,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_seconds = config.reset_timeout.as_secs(),
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            failures: AtomicU64::new(0),
            last_failure_at: AtomicI64::new(0),
            trial_in_flight: AtomicBool::new(false),
            metrics: AtomicCircuitBreakerMetrics::default(),
            clock,
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Consecutive failures counted toward the threshold
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    /// Epoch millis of the most recent failure
    pub fn last_failure_at(&self) -> Option<i64> {
        match self.last_failure_at.load(Ordering::Acquire) {
            0 => None,
            at => Some(at),
        }
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.admit() {
            Admission::Rejected { retry_in } => Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
                retry_in,
            }),
            Admission::Allowed(trial) => self.run(trial, operation).await,
        }
    }

    /// Execute an operation, running `fallback` instead while the circuit is open
    pub async fn call_with_fallback<F, Fut, FB, FbFut, T, E>(
        &self,
        operation: F,
        fallback: FB,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
    {
        match self.admit() {
            Admission::Rejected { .. } => {
                debug!(component = %self.name, "Circuit open, serving fallback");
                fallback().await.map_err(CircuitBreakerError::OperationFailed)
            }
            Admission::Allowed(trial) => self.run(trial, operation).await,
        }
    }

    /// Execute an operation bounded by `budget`. An elapsed budget counts as a failure.
    pub async fn call_with_timeout<F, Fut, T, E>(
        &self,
        budget: Duration,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.admit() {
            Admission::Rejected { retry_in } => Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
                retry_in,
            }),
            Admission::Allowed(trial) => {
                let outcome = match tokio::time::timeout(budget, operation()).await {
                    Ok(Ok(value)) => {
                        self.record_success();
                        Ok(value)
                    }
                    Ok(Err(err)) => {
                        self.record_failure();
                        Err(CircuitBreakerError::OperationFailed(err))
                    }
                    Err(_elapsed) => {
                        warn!(
                            component = %self.name,
                            budget_ms = budget.as_millis() as u64,
                            "Protected operation timed out"
                        );
                        self.record_failure();
                        Err(CircuitBreakerError::Timeout {
                            component: self.name.clone(),
                            budget,
                        })
                    }
                };
                if let Some(trial) = trial {
                    trial.settle();
                }
                outcome
            }
        }
    }

    async fn run<F, Fut, T, E>(
        &self,
        trial: Option<TrialGuard<'_>>,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let outcome = match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitBreakerError::OperationFailed(err))
            }
        };
        if let Some(trial) = trial {
            trial.settle();
        }
        outcome
    }

    fn trial(&self) -> Admission<'_> {
        Admission::Allowed(Some(TrialGuard {
            breaker: self,
            settled: false,
        }))
    }

    /// A trial that never reported back reopens the circuit
    fn abandon_trial(&self) {
        warn!(component = %self.name, "Half-open trial cancelled before completing");
        if self.state() == CircuitState::HalfOpen {
            self.last_failure_at
                .store(self.clock.now_millis(), Ordering::Release);
            self.transition_to_open(CircuitState::HalfOpen);
        }
        self.trial_in_flight.store(false, Ordering::Release);
    }

    /// Decide whether the next call may run, moving Open -> HalfOpen when due
    fn admit(&self) -> Admission<'_> {
        match self.state() {
            CircuitState::Closed => Admission::Allowed(None),
            CircuitState::Open => {
                let elapsed_ms = self.clock.now_millis() - self.last_failure_at.load(Ordering::Acquire);
                let reset_ms = self.config.reset_timeout.as_millis() as i64;
                if elapsed_ms >= reset_ms {
                    if self.try_transition(CircuitState::Open, CircuitState::HalfOpen) {
                        self.failures.store(0, Ordering::Release);
                        self.trial_in_flight.store(true, Ordering::Release);
                        info!(component = %self.name, "Circuit breaker half-open (testing recovery)");
                        return self.trial();
                    }
                    // Lost the race: another caller owns the trial
                    self.reject(Duration::from_secs(1))
                } else {
                    let remaining = (reset_ms - elapsed_ms).max(0) as u64;
                    self.reject(Duration::from_millis(remaining))
                }
            }
            CircuitState::HalfOpen => {
                if self
                    .trial_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.trial()
                } else {
                    self.reject(Duration::from_secs(1))
                }
            }
        }
    }

    fn reject(&self, retry_in: Duration) -> Admission<'_> {
        self.metrics.record_rejection();
        debug!(
            component = %self.name,
            retry_in_ms = retry_in.as_millis() as u64,
            "Call short-circuited"
        );
        Admission::Rejected { retry_in }
    }

    fn record_success(&self) {
        self.metrics.record_success();
        match self.state() {
            CircuitState::HalfOpen => self.transition_to_closed(),
            CircuitState::Closed => self.failures.store(0, Ordering::Release),
            CircuitState::Open => {
                warn!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    fn record_failure(&self) {
        self.metrics.record_failure();
        match self.state() {
            CircuitState::Closed => {
                self.last_failure_at
                    .store(self.clock.now_millis(), Ordering::Release);
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(
                    component = %self.name,
                    failures = failures,
                    failure_threshold = self.config.failure_threshold,
                    "Protected operation failed"
                );
                if failures >= u64::from(self.config.failure_threshold) {
                    self.transition_to_open(CircuitState::Closed);
                }
            }
            CircuitState::HalfOpen => {
                self.last_failure_at
                    .store(self.clock.now_millis(), Ordering::Release);
                self.transition_to_open(CircuitState::HalfOpen);
            }
            CircuitState::Open => {
                // Straggler from before the circuit opened; the open window stays put
            }
        }
    }

    fn try_transition(&self, from: CircuitState, to: CircuitState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            telemetry::metrics::record_circuit_transition(&self.name, to.as_str());
        }
        moved
    }

    fn transition_to_closed(&self) {
        if self.try_transition(CircuitState::HalfOpen, CircuitState::Closed) {
            self.failures.store(0, Ordering::Release);
            self.trial_in_flight.store(false, Ordering::Release);
            info!(component = %self.name, "Circuit breaker closed (recovered)");
        }
    }

    fn transition_to_open(&self, from: CircuitState) {
        if self.try_transition(from, CircuitState::Open) {
            self.trial_in_flight.store(false, Ordering::Release);
            error!(
                component = %self.name,
                failures = self.failures(),
                failure_threshold = self.config.failure_threshold,
                reset_timeout_seconds = self.config.reset_timeout.as_secs(),
                "Circuit breaker opened (failing fast)"
            );
        }
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        self.last_failure_at
            .store(self.clock.now_millis(), Ordering::Release);
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);
        telemetry::metrics::record_circuit_transition(&self.name, CircuitState::Open.as_str());
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.failures.store(0, Ordering::Release);
        self.trial_in_flight.store(false, Ordering::Release);
        telemetry::metrics::record_circuit_transition(&self.name, CircuitState::Closed.as_str());
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let total_calls = self.metrics.total_calls.load(Ordering::Relaxed);
        let failure_count = self.metrics.failure_count.load(Ordering::Relaxed);
        let failure_rate = if total_calls > 0 {
            failure_count as f64 / total_calls as f64
        } else {
            0.0
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count: self.metrics.success_count.load(Ordering::Relaxed),
            failure_count,
            rejected_count: self.metrics.rejected_count.load(Ordering::Relaxed),
            consecutive_failures: self.failures(),
            current_state: self.state(),
            failure_rate,
            last_failure_at: self.last_failure_at(),
        }
    }
}
