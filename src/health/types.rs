//! Health status classification shared by the probe, the controller and the
//! health endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Health of the backing dependencies, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Critical => "critical",
        }
    }

    /// Classify a single probe latency.
    ///
    /// `< 500ms` healthy, `500..=1000ms` degraded, `1001..=3000ms` unhealthy,
    /// anything slower critical.
    pub fn from_latency_ms(latency_ms: u64) -> Self {
        match latency_ms {
            0..=499 => HealthStatus::Healthy,
            500..=1000 => HealthStatus::Degraded,
            1001..=3000 => HealthStatus::Unhealthy,
            _ => HealthStatus::Critical,
        }
    }

    /// Delay multiplier applied by the recommended-delay calculation
    pub fn delay_multiplier(&self) -> u32 {
        match self {
            HealthStatus::Healthy => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 4,
            HealthStatus::Critical => 8,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one database probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub latency_ms: u64,
    /// The probe query completed without error inside its budget
    pub healthy: bool,
    /// Classification of `latency_ms`; `Critical` when the probe failed
    pub status: HealthStatus,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn success(latency_ms: u64) -> Self {
        Self {
            latency_ms,
            healthy: true,
            status: HealthStatus::from_latency_ms(latency_ms),
            error: None,
        }
    }

    pub fn failure(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            latency_ms,
            healthy: false,
            status: HealthStatus::Critical,
            error: Some(error.into()),
        }
    }
}
