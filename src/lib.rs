#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Workguard Core
//!
//! Adaptive backpressure for fleets of stateless, short-lived workers that
//! share a database and a key-value coordination store.
//!
//! ## Overview
//!
//! Worker instances keep no memory between invocations and never talk to each
//! other. Everything they agree on lives in the coordination store: whether a
//! cooldown is active, how many long jobs are running, how many requests an
//! identifier has made in the current window. Each invocation asks the
//! [`backpressure::BackpressureController`] whether to proceed, slow down or
//! pause before doing expensive work.
//!
//! ## Module Organization
//!
//! - [`health`] - Database probe, latency classification, process-local metrics
//! - [`resilience`] - Circuit breakers, timeouts per operation class, retry with backoff
//! - [`rate_limit`] - Sliding-window rate limiting per identifier
//! - [`job_slots`] - Global counting semaphore over long-running jobs
//! - [`backpressure`] - Cooldowns and the go / slow / pause decision
//! - [`store`] - Coordination store commands and backends
//! - [`telemetry`] - OpenTelemetry instruments and the best-effort metrics sink
//! - [`web`] - Health endpoint
//! - [`config`] - Layered configuration
//! - [`errors`] - Structured error handling
//!
//! ## Failure Policy
//!
//! Coordination-store unavailability fails open: workers are admitted and
//! proceed uncoordinated rather than stall on an observability dependency.
//! Admission refusal is a value (`should_pause`, `can_start_new_job`), never
//! an error.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sqlx::PgPool;
//! use workguard_core::backpressure::{BackpressureController, ChunkDecision};
//! use workguard_core::clock::SystemClock;
//! use workguard_core::config::GuardConfig;
//! use workguard_core::health::PgHealthProbe;
//! use workguard_core::store::RestCoordinationStore;
//!
//! # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let config = GuardConfig::load()?;
//! let store = Arc::new(RestCoordinationStore::new(&config.store, config.timeouts.store())?);
//! let probe = Arc::new(PgHealthProbe::new(pool, config.timeouts.database()));
//! let controller = BackpressureController::new(store, probe, SystemClock::shared(), &config);
//!
//! if let ChunkDecision::Defer { reason, .. } = controller
//!     .decide_chunk("import-worker", Duration::from_millis(100))
//!     .await
//! {
//!     println!("deferring: {reason}");
//! }
//! controller.flush_metrics().await;
//! # Ok(())
//! # }
//! ```

pub mod backpressure;
pub mod clock;
pub mod config;
pub mod errors;
pub mod health;
pub mod job_slots;
pub mod logging;
pub mod rate_limit;
pub mod resilience;
pub mod store;
pub mod telemetry;
pub mod web;

pub use backpressure::{
    BackpressureCheck, BackpressureController, BackpressureState, ChunkDecision, CooldownLevel,
    HealthCheckResult,
};
pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use config::{ConfigurationError, GuardConfig};
pub use errors::{GuardError, GuardResult, StoreError, StoreResult};
pub use health::{DatabaseProbe, HealthStatus, PgHealthProbe, ProbeResult};
pub use job_slots::{ConcurrencyLevel, JobSlotManager, JobSlotStatus, SlotGuard, SlotOutcome};
pub use rate_limit::{RateLimitConfig, RateLimitPreset, RateLimitResult, RateLimiter};
pub use resilience::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerPreset, CircuitBreakerRegistry,
    CircuitState, OperationClass,
};
pub use store::{CoordinationStore, SharedStore, StoreKeys};
