//! # Health
//!
//! Database probing, latency classification and the process-local health
//! counters consumed by the backpressure controller.

pub mod metrics;
pub mod probe;
pub mod types;

pub use metrics::{HealthMetrics, HealthMetricsSnapshot, LATENCY_HISTORY_LEN};
pub use probe::{run_probe, DatabaseProbe, PgHealthProbe};
pub use types::{HealthStatus, ProbeResult};
