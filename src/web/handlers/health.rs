//! # Health Check Handlers
//!
//! Operator-facing health endpoints. `GET /health` aggregates the database
//! probe, circuit breakers, job concurrency and the shared cooldown into one
//! status and answers 200 only when that status is healthy.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::health::HealthStatus;
use crate::job_slots::{ConcurrencyLevel, MAX_CONCURRENT_JOBS};
use crate::web::state::HealthState;

/// Liveness response
#[derive(Debug, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
    pub timestamp: String,
}

/// Aggregated health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: String,
    pub checks: BTreeMap<String, HealthCheck>,
    pub metrics: HealthReportMetrics,
}

/// Individual health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthReportMetrics {
    pub uptime_seconds: u64,
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub average_latency_ms: f64,
    pub active_jobs: i64,
    pub max_jobs: i64,
}

/// Aggregated health: GET /health
///
/// 200 when every check is healthy, 503 otherwise.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let report = build_health_report(&state).await;
    let code = if report.status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

/// Liveness probe: GET /health/live
///
/// Answers as long as the process can serve requests.
pub async fn liveness(State(_state): State<HealthState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn build_health_report(state: &HealthState) -> HealthReport {
    debug!("Building health report");
    let mut checks = BTreeMap::new();

    checks.insert("database".to_string(), check_database(state).await);
    checks.insert("circuit_breaker".to_string(), check_circuit_breakers(state));
    let (concurrency, active_jobs) = check_concurrency(state).await;
    checks.insert("concurrency".to_string(), concurrency);
    checks.insert("cooldown".to_string(), check_cooldown(state).await);

    let status = checks
        .values()
        .map(|check| check.status)
        .max()
        .unwrap_or(HealthStatus::Healthy);

    let snapshot = state.controller.health_metrics();
    HealthReport {
        status,
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks,
        metrics: HealthReportMetrics {
            uptime_seconds: state.uptime_seconds(),
            request_count: snapshot.request_count,
            error_count: snapshot.error_count,
            error_rate: snapshot.error_rate,
            average_latency_ms: snapshot.average_latency_ms,
            active_jobs,
            max_jobs: MAX_CONCURRENT_JOBS,
        },
    }
}

// Helper functions for health checks

async fn check_database(state: &HealthState) -> HealthCheck {
    let probe = state.controller.probe_database().await;
    HealthCheck {
        status: probe.status,
        message: probe
            .error
            .map(|error| format!("Database connection failed: {error}")),
        duration_ms: probe.latency_ms,
    }
}

fn check_circuit_breakers(state: &HealthState) -> HealthCheck {
    let start = std::time::Instant::now();
    let open = state.circuit_breakers.open_circuits();

    let (status, message) = if open.is_empty() {
        (
            HealthStatus::Healthy,
            format!(
                "{} circuit breakers closed",
                state.circuit_breakers.list_components().len()
            ),
        )
    } else {
        (
            HealthStatus::Degraded,
            format!("Open circuits: {}", open.join(", ")),
        )
    };

    HealthCheck {
        status,
        message: Some(message),
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

async fn check_concurrency(state: &HealthState) -> (HealthCheck, i64) {
    let start = std::time::Instant::now();
    match state.controller.job_slots().get_job_slot_status().await {
        Ok(status) if !status.coordinated => (
            HealthCheck {
                status: HealthStatus::Degraded,
                message: Some("Coordination store unavailable".to_string()),
                duration_ms: start.elapsed().as_millis() as u64,
            },
            0,
        ),
        Ok(status) => (
            HealthCheck {
                status: match status.level {
                    ConcurrencyLevel::Normal => HealthStatus::Healthy,
                    ConcurrencyLevel::Elevated => HealthStatus::Degraded,
                    ConcurrencyLevel::High => HealthStatus::Unhealthy,
                    ConcurrencyLevel::Critical => HealthStatus::Critical,
                },
                message: Some(format!(
                    "{} active jobs ({})",
                    status.active_job_count,
                    status.level.as_str()
                )),
                duration_ms: start.elapsed().as_millis() as u64,
            },
            status.active_job_count,
        ),
        Err(err) => {
            warn!(error = %err, "Concurrency check failed");
            (
                HealthCheck {
                    status: HealthStatus::Degraded,
                    message: Some("Job-slot status unreadable".to_string()),
                    duration_ms: start.elapsed().as_millis() as u64,
                },
                0,
            )
        }
    }
}

async fn check_cooldown(state: &HealthState) -> HealthCheck {
    let start = std::time::Instant::now();
    let (status, message) = match state.controller.check_backpressure_status().await {
        Ok(check) => match check.cooldown_level {
            Some(level) if check.is_active => (
                level.health_status(),
                Some(format!(
                    "{} ({}s remaining)",
                    check.reason.unwrap_or_default(),
                    check.cooldown_remaining_ms / 1_000
                )),
            ),
            _ => (HealthStatus::Healthy, None),
        },
        Err(err) => {
            warn!(error = %err, "Cooldown check failed");
            (
                HealthStatus::Degraded,
                Some("Cooldown state unreadable".to_string()),
            )
        }
    };
    HealthCheck {
        status,
        message,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backpressure::{BackpressureController, CooldownLevel};
    use crate::clock::MockClock;
    use crate::config::GuardConfig;
    use crate::health::{DatabaseProbe, ProbeResult};
    use crate::resilience::{CircuitBreakerPreset, CircuitBreakerRegistry};
    use crate::store::InMemoryCoordinationStore;
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Debug)]
    struct StaticProbe(ProbeResult);

    #[async_trait]
    impl DatabaseProbe for StaticProbe {
        async fn check_database_health(&self) -> ProbeResult {
            self.0.clone()
        }
    }

    fn state(probe: ProbeResult) -> HealthState {
        let clock = MockClock::shared();
        let store = Arc::new(InMemoryCoordinationStore::new(clock.clone()));
        let controller = BackpressureController::new(
            store,
            Arc::new(StaticProbe(probe)),
            clock.clone(),
            &GuardConfig::default(),
        );
        HealthState::new(Arc::new(controller), CircuitBreakerRegistry::new(clock))
    }

    #[tokio::test]
    async fn test_healthy_returns_200() {
        let state = state(ProbeResult::success(15));
        let (code, Json(report)) = health(State(state)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.metrics.max_jobs, 8);
        assert!(report.checks.contains_key("database"));
        assert!(report.checks.contains_key("circuit_breaker"));
        assert!(report.checks.contains_key("concurrency"));
    }

    #[tokio::test]
    async fn test_database_down_returns_503() {
        let state = state(ProbeResult::failure(3, "connection refused"));
        let (code, Json(report)) = health(State(state)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.status, HealthStatus::Critical);
        assert_eq!(
            report.checks["database"].message.as_deref(),
            Some("Database connection failed: connection refused")
        );
    }

    #[tokio::test]
    async fn test_open_circuit_and_cooldown_degrade_status() {
        let state = state(ProbeResult::success(15));
        state
            .circuit_breakers
            .get_or_create("dictionary_api", CircuitBreakerPreset::Normal)
            .force_open();
        let report = build_health_report(&state).await;
        assert_eq!(report.status, HealthStatus::Degraded);

        state
            .controller
            .trigger_backpressure("slow database", CooldownLevel::Unhealthy)
            .await
            .unwrap();
        let report = build_health_report(&state).await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.checks["cooldown"].status, HealthStatus::Unhealthy);
    }
}
