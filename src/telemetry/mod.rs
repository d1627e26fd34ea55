//! # Telemetry
//!
//! OpenTelemetry instruments for the subsystem and the best-effort sink that
//! mirrors process-local counters into the coordination store.

pub mod metrics;
pub mod sink;

pub use sink::BestEffortSink;
