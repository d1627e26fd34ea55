//! Backpressure data types: cooldown levels, the shared cooldown record, and
//! the results handed back to workers.

use crate::health::HealthStatus;
use crate::job_slots::{ConcurrencyLevel, JobSlotStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Severity of a cooldown, each with a fixed duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownLevel {
    Degraded,
    Unhealthy,
    Critical,
}

impl CooldownLevel {
    /// degraded 3min, unhealthy 10min, critical 30min
    pub const fn cooldown(&self) -> Duration {
        match self {
            CooldownLevel::Degraded => Duration::from_secs(3 * 60),
            CooldownLevel::Unhealthy => Duration::from_secs(10 * 60),
            CooldownLevel::Critical => Duration::from_secs(30 * 60),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CooldownLevel::Degraded => "degraded",
            CooldownLevel::Unhealthy => "unhealthy",
            CooldownLevel::Critical => "critical",
        }
    }

    pub fn health_status(&self) -> HealthStatus {
        match self {
            CooldownLevel::Degraded => HealthStatus::Degraded,
            CooldownLevel::Unhealthy => HealthStatus::Unhealthy,
            CooldownLevel::Critical => HealthStatus::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureStatus {
    Active,
    Inactive,
}

/// Cooldown record shared by every instance under one store key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureState {
    /// Epoch millis
    pub cooldown_until: i64,
    pub cooldown_level: CooldownLevel,
    pub trigger_reason: String,
    pub status: BackpressureStatus,
    /// Epoch millis
    pub triggered_at: i64,
}

impl BackpressureState {
    pub fn remaining_ms(&self, now: i64) -> u64 {
        self.cooldown_until.saturating_sub(now).max(0) as u64
    }

    pub fn is_active_at(&self, now: i64) -> bool {
        self.status == BackpressureStatus::Active && now < self.cooldown_until
    }
}

/// Result of reading the shared cooldown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackpressureCheck {
    pub is_active: bool,
    pub cooldown_level: Option<CooldownLevel>,
    pub cooldown_remaining_ms: u64,
    pub reason: Option<String>,
    pub cooldown_until: Option<i64>,
}

impl BackpressureCheck {
    pub fn inactive() -> Self {
        Self {
            is_active: false,
            cooldown_level: None,
            cooldown_remaining_ms: 0,
            reason: None,
            cooldown_until: None,
        }
    }

    pub fn from_state(state: &BackpressureState, now: i64) -> Self {
        Self {
            is_active: true,
            cooldown_level: Some(state.cooldown_level),
            cooldown_remaining_ms: state.remaining_ms(now),
            reason: Some(state.trigger_reason.clone()),
            cooldown_until: Some(state.cooldown_until),
        }
    }
}

/// Concurrency portion of a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencySnapshot {
    pub level: ConcurrencyLevel,
    pub active_job_count: i64,
    pub delay_multiplier: u32,
    pub can_start_new_job: bool,
}

impl From<&JobSlotStatus> for ConcurrencySnapshot {
    fn from(status: &JobSlotStatus) -> Self {
        Self {
            level: status.level,
            active_job_count: status.active_job_count,
            delay_multiplier: status.delay_multiplier,
            can_start_new_job: status.can_start_new_job,
        }
    }
}

/// Decision returned to a worker by `perform_health_check`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    /// Probe latency; 0 when the database was not probed
    pub latency_ms: u64,
    pub message: Option<String>,
    pub should_pause: bool,
    pub should_slow_down: bool,
    pub cooldown_level: Option<CooldownLevel>,
    pub cooldown_remaining_ms: Option<u64>,
    pub concurrency: Option<ConcurrencySnapshot>,
}

impl HealthCheckResult {
    pub fn healthy(latency_ms: u64, concurrency: Option<ConcurrencySnapshot>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms,
            message: None,
            should_pause: false,
            should_slow_down: false,
            cooldown_level: None,
            cooldown_remaining_ms: None,
            concurrency,
        }
    }
}

/// What a worker should do with its next unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkDecision {
    Proceed { delay: Duration },
    SlowDown { delay: Duration },
    /// Stop and hand the rest of the work to a later invocation
    Defer { reason: String, retry_after: Duration },
}

impl ChunkDecision {
    pub fn is_deferred(&self) -> bool {
        matches!(self, ChunkDecision::Defer { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_durations() {
        assert_eq!(CooldownLevel::Degraded.cooldown(), Duration::from_secs(180));
        assert_eq!(CooldownLevel::Unhealthy.cooldown(), Duration::from_secs(600));
        assert_eq!(CooldownLevel::Critical.cooldown(), Duration::from_secs(1800));
        assert!(CooldownLevel::Critical > CooldownLevel::Unhealthy);
    }

    #[test]
    fn test_state_serializes_with_snake_case_levels() {
        let state = BackpressureState {
            cooldown_until: 2_000,
            cooldown_level: CooldownLevel::Unhealthy,
            trigger_reason: "slow database".into(),
            status: BackpressureStatus::Active,
            triggered_at: 1_000,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["cooldown_level"], "unhealthy");
        assert_eq!(json["status"], "active");

        assert!(state.is_active_at(1_999));
        assert!(!state.is_active_at(2_000));
        assert_eq!(state.remaining_ms(2_500), 0);
    }
}
