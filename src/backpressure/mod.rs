//! # Backpressure
//!
//! Fleet-wide go / slow down / pause decisions for stateless workers. The
//! controller aggregates job-slot concurrency, a database probe and the
//! process-local error rate, and persists escalating cooldowns into the
//! coordination store so every instance observes them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use workguard_core::backpressure::{BackpressureController, ChunkDecision};
//!
//! # async fn example(controller: BackpressureController) {
//! match controller.decide_chunk("annotate-worker", Duration::from_millis(100)).await {
//!     ChunkDecision::Proceed { delay } | ChunkDecision::SlowDown { delay } => {
//!         tokio::time::sleep(delay).await;
//!         // process the next chunk
//!     }
//!     ChunkDecision::Defer { reason, retry_after } => {
//!         tracing::info!(%reason, retry_after_ms = retry_after.as_millis() as u64, "Deferring");
//!     }
//! }
//! controller.flush_metrics().await;
//! # }
//! ```

pub mod controller;
pub mod types;

pub use controller::{classify, BackpressureController};
pub use types::{
    BackpressureCheck, BackpressureState, BackpressureStatus, ChunkDecision, ConcurrencySnapshot,
    CooldownLevel, HealthCheckResult,
};
