//! Process-local health counters: request and error totals plus the last ten
//! probe latencies. Each instance keeps its own; the controller mirrors them
//! into the coordination store through the best-effort sink.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::types::ProbeResult;

/// Latency samples kept for the rolling average
pub const LATENCY_HISTORY_LEN: usize = 10;

#[derive(Debug, Default)]
pub struct HealthMetrics {
    inner: Mutex<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    request_count: u64,
    error_count: u64,
    last_latency_ms: u64,
    latency_history: VecDeque<u64>,
}

/// Point-in-time copy of [`HealthMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetricsSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub last_latency_ms: u64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
    pub latency_history: Vec<u64>,
}

impl HealthMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one probe and return the updated snapshot
    pub fn record(&self, probe: &ProbeResult) -> HealthMetricsSnapshot {
        let mut inner = self.inner.lock();
        inner.request_count += 1;
        if !probe.healthy {
            inner.error_count += 1;
        }
        inner.last_latency_ms = probe.latency_ms;
        inner.latency_history.push_back(probe.latency_ms);
        while inner.latency_history.len() > LATENCY_HISTORY_LEN {
            inner.latency_history.pop_front();
        }
        inner.snapshot()
    }

    pub fn snapshot(&self) -> HealthMetricsSnapshot {
        self.inner.lock().snapshot()
    }

    /// `error_count / request_count`, 0 before the first request
    pub fn error_rate(&self) -> f64 {
        self.inner.lock().error_rate()
    }

    pub fn average_latency_ms(&self) -> f64 {
        self.inner.lock().average_latency_ms()
    }

    /// Adopt fleet-wide totals read back from the store when they exceed ours
    pub fn absorb_totals(&self, request_count: u64, error_count: u64) {
        let mut inner = self.inner.lock();
        if request_count > inner.request_count {
            inner.request_count = request_count;
            inner.error_count = error_count.min(request_count);
        }
    }

    pub fn reset(&self) {
        *self.inner.lock() = MetricsInner::default();
    }
}

impl MetricsInner {
    fn error_rate(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.request_count as f64
        }
    }

    fn average_latency_ms(&self) -> f64 {
        if self.latency_history.is_empty() {
            0.0
        } else {
            self.latency_history.iter().sum::<u64>() as f64 / self.latency_history.len() as f64
        }
    }

    fn snapshot(&self) -> HealthMetricsSnapshot {
        HealthMetricsSnapshot {
            request_count: self.request_count,
            error_count: self.error_count,
            last_latency_ms: self.last_latency_ms,
            average_latency_ms: self.average_latency_ms(),
            error_rate: self.error_rate(),
            latency_history: self.latency_history.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_capped() {
        let metrics = HealthMetrics::new();
        for latency in 1..=15 {
            metrics.record(&ProbeResult::success(latency));
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.request_count, 15);
        assert_eq!(snapshot.latency_history, (6..=15).collect::<Vec<u64>>());
        assert_eq!(snapshot.last_latency_ms, 15);
        assert!((snapshot.average_latency_ms - 10.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_rate() {
        let metrics = HealthMetrics::new();
        assert_eq!(metrics.error_rate(), 0.0);

        metrics.record(&ProbeResult::success(10));
        metrics.record(&ProbeResult::failure(10, "down"));
        metrics.record(&ProbeResult::success(10));
        metrics.record(&ProbeResult::success(10));
        assert!((metrics.error_rate() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_absorb_totals_only_moves_forward() {
        let metrics = HealthMetrics::new();
        metrics.record(&ProbeResult::success(10));
        metrics.absorb_totals(40, 4);
        assert_eq!(metrics.snapshot().request_count, 40);
        assert!((metrics.error_rate() - 0.1).abs() < f64::EPSILON);

        metrics.absorb_totals(5, 5);
        assert_eq!(metrics.snapshot().request_count, 40);

        metrics.reset();
        assert_eq!(metrics.snapshot(), HealthMetricsSnapshot::default());
    }
}
