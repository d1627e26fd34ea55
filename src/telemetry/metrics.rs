//! # Workguard Metrics
//!
//! OpenTelemetry instruments for the backpressure subsystem:
//! - Health check and probe counters/histograms
//! - Backpressure activation counter and active gauge
//! - Rate-limit and job-slot admission decisions
//! - Circuit breaker transitions
//! - Best-effort sink drops
//!
//! Instruments come from the global meter provider, so they are no-ops until
//! the host process installs one. Recording is skipped entirely when
//! `telemetry.metrics_enabled` is false.
//!
//! ## Usage
//!
//! ```rust
//! use workguard_core::telemetry::metrics;
//!
//! metrics::record_health_check("annotate-worker", "degraded");
//! metrics::set_backpressure_active(true);
//! ```

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

/// Lazy-initialized meter for workguard metrics
static WORKGUARD_METER: OnceLock<Meter> = OnceLock::new();

static METRICS_ENABLED: AtomicBool = AtomicBool::new(true);

fn meter() -> &'static Meter {
    WORKGUARD_METER.get_or_init(|| opentelemetry::global::meter_provider().meter("workguard"))
}

/// Toggle metric recording for the whole process
pub fn set_metrics_enabled(enabled: bool) {
    METRICS_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn metrics_enabled() -> bool {
    METRICS_ENABLED.load(Ordering::Relaxed)
}

// ============================================================================
// Instruments
// ============================================================================

/// Health checks performed by workers
///
/// Labels:
/// - caller: worker name passed to `perform_health_check`
/// - status: healthy, degraded, unhealthy, critical
pub fn health_checks_total() -> Counter<u64> {
    meter()
        .u64_counter("workguard.health.checks.total")
        .with_description("Total number of worker health checks")
        .build()
}

/// Database probe latency in milliseconds
pub fn probe_latency_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workguard.health.probe.latency_ms")
        .with_description("Backing database probe latency in milliseconds")
        .build()
}

/// Backpressure activations
///
/// Labels:
/// - level: degraded, unhealthy, critical
pub fn backpressure_activations_total() -> Counter<u64> {
    meter()
        .u64_counter("workguard.backpressure.activations.total")
        .with_description("Total number of backpressure cooldowns triggered")
        .build()
}

/// Current backpressure state (0 = inactive, 1 = active) as seen by this process
pub fn backpressure_active() -> Gauge<u64> {
    meter()
        .u64_gauge("workguard.backpressure.active")
        .with_description("Current backpressure state (0=inactive, 1=active)")
        .build()
}

/// Rate-limit decisions
///
/// Labels:
/// - outcome: allowed, rejected, fail_open
pub fn rate_limit_decisions_total() -> Counter<u64> {
    meter()
        .u64_counter("workguard.rate_limit.decisions.total")
        .with_description("Total number of rate-limit decisions")
        .build()
}

/// Job-slot admission decisions
///
/// Labels:
/// - job_type
/// - outcome: admitted, refused, fail_open
pub fn job_slot_decisions_total() -> Counter<u64> {
    meter()
        .u64_counter("workguard.job_slots.decisions.total")
        .with_description("Total number of job-slot admission decisions")
        .build()
}

/// Active job count observed at the last status read
pub fn active_jobs() -> Gauge<i64> {
    meter()
        .i64_gauge("workguard.job_slots.active")
        .with_description("Active long-running jobs across all instances")
        .build()
}

/// Circuit breaker state transitions
///
/// Labels:
/// - component: service name
/// - state: closed, open, half_open
pub fn circuit_transitions_total() -> Counter<u64> {
    meter()
        .u64_counter("workguard.circuit_breaker.transitions.total")
        .with_description("Total number of circuit breaker state transitions")
        .build()
}

/// Commands dropped by the best-effort sink (queue full, oldest evicted)
pub fn sink_dropped_total() -> Counter<u64> {
    meter()
        .u64_counter("workguard.sink.dropped.total")
        .with_description("Best-effort store writes dropped under pressure")
        .build()
}

// ============================================================================
// Static instances
// ============================================================================

static HEALTH_CHECKS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
static PROBE_LATENCY_MS: OnceLock<Histogram<f64>> = OnceLock::new();
static BACKPRESSURE_ACTIVATIONS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
static BACKPRESSURE_ACTIVE: OnceLock<Gauge<u64>> = OnceLock::new();
static RATE_LIMIT_DECISIONS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
static JOB_SLOT_DECISIONS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
static ACTIVE_JOBS: OnceLock<Gauge<i64>> = OnceLock::new();
static CIRCUIT_TRANSITIONS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
static SINK_DROPPED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();

fn cached<T>(cell: &'static OnceLock<T>, build: fn() -> T) -> &'static T {
    cell.get_or_init(build)
}

// ============================================================================
// Recording helpers
// ============================================================================

pub fn record_health_check(caller: &str, status: &str) {
    if !metrics_enabled() {
        return;
    }
    cached(&HEALTH_CHECKS_TOTAL, health_checks_total).add(
        1,
        &[
            KeyValue::new("caller", caller.to_string()),
            KeyValue::new("status", status.to_string()),
        ],
    );
}

pub fn record_probe_latency(latency_ms: u64) {
    if metrics_enabled() {
        cached(&PROBE_LATENCY_MS, probe_latency_ms).record(latency_ms as f64, &[]);
    }
}

pub fn record_backpressure_activation(level: &str) {
    if metrics_enabled() {
        cached(&BACKPRESSURE_ACTIVATIONS_TOTAL, backpressure_activations_total)
            .add(1, &[KeyValue::new("level", level.to_string())]);
    }
}

pub fn set_backpressure_active(active: bool) {
    if metrics_enabled() {
        cached(&BACKPRESSURE_ACTIVE, backpressure_active).record(u64::from(active), &[]);
    }
}

pub fn record_rate_limit_decision(outcome: &str) {
    if metrics_enabled() {
        cached(&RATE_LIMIT_DECISIONS_TOTAL, rate_limit_decisions_total)
            .add(1, &[KeyValue::new("outcome", outcome.to_string())]);
    }
}

pub fn record_job_slot_decision(job_type: &str, outcome: &str) {
    if !metrics_enabled() {
        return;
    }
    cached(&JOB_SLOT_DECISIONS_TOTAL, job_slot_decisions_total).add(
        1,
        &[
            KeyValue::new("job_type", job_type.to_string()),
            KeyValue::new("outcome", outcome.to_string()),
        ],
    );
}

pub fn set_active_jobs(count: i64) {
    if metrics_enabled() {
        cached(&ACTIVE_JOBS, active_jobs).record(count, &[]);
    }
}

pub fn record_circuit_transition(component: &str, state: &str) {
    if !metrics_enabled() {
        return;
    }
    cached(&CIRCUIT_TRANSITIONS_TOTAL, circuit_transitions_total).add(
        1,
        &[
            KeyValue::new("component", component.to_string()),
            KeyValue::new("state", state.to_string()),
        ],
    );
}

pub fn record_sink_drop() {
    if metrics_enabled() {
        cached(&SINK_DROPPED_TOTAL, sink_dropped_total).add(1, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruments_are_built_once() {
        let first = cached(&HEALTH_CHECKS_TOTAL, health_checks_total);
        let second = cached(&HEALTH_CHECKS_TOTAL, health_checks_total);
        assert!(std::ptr::eq(first, second));

        record_sink_drop();
        record_sink_drop();
        let drops = cached(&SINK_DROPPED_TOTAL, sink_dropped_total);
        assert!(std::ptr::eq(drops, cached(&SINK_DROPPED_TOTAL, sink_dropped_total)));
    }

    #[test]
    fn test_recording_without_provider_is_noop() {
        record_health_check("worker", "healthy");
        record_probe_latency(12);
        record_backpressure_activation("critical");
        set_backpressure_active(true);
        record_rate_limit_decision("allowed");
        record_job_slot_decision("annotate", "admitted");
        set_active_jobs(3);
        record_circuit_transition("database", "open");
        record_sink_drop();
    }
}
