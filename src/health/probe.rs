//! # Database Health Probe
//!
//! Times a minimal read against the backing database and classifies the
//! latency. The probe never returns an error: failures, timeouts and an open
//! database circuit all come back as an unhealthy [`ProbeResult`].

use async_trait::async_trait;
use sqlx::PgPool;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

use super::types::ProbeResult;
use crate::resilience::{CircuitBreaker, CircuitBreakerError};
use crate::telemetry::metrics;

/// Something that can report the health of the backing database
#[async_trait]
pub trait DatabaseProbe: Send + Sync + Debug {
    async fn check_database_health(&self) -> ProbeResult;
}

/// Probe a PostgreSQL pool with `SELECT 1`
#[derive(Debug, Clone)]
pub struct PgHealthProbe {
    pool: PgPool,
    timeout: Duration,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl PgHealthProbe {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self {
            pool,
            timeout,
            circuit_breaker: None,
        }
    }

    /// Route probes through a breaker; an open circuit short-circuits to unhealthy
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }
}

#[async_trait]
impl DatabaseProbe for PgHealthProbe {
    async fn check_database_health(&self) -> ProbeResult {
        let pool = self.pool.clone();
        run_probe(self.circuit_breaker.as_deref(), self.timeout, move || async move {
            sqlx::query("SELECT 1").execute(&pool).await.map(|_| ())
        })
        .await
    }
}

/// Time `query` under `timeout`, optionally behind `breaker`, and classify the result
pub async fn run_probe<F, Fut, E>(
    breaker: Option<&CircuitBreaker>,
    timeout: Duration,
    query: F,
) -> ProbeResult
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();

    let outcome: Result<(), String> = match breaker {
        Some(breaker) => match breaker.call_with_timeout(timeout, query).await {
            Ok(()) => Ok(()),
            Err(CircuitBreakerError::CircuitOpen { retry_in, .. }) => {
                debug!(
                    retry_in_secs = retry_in.as_secs(),
                    "Database health check skipped - circuit breaker open"
                );
                Err("Circuit breaker open".to_string())
            }
            Err(CircuitBreakerError::OperationFailed(e)) => Err(e.to_string()),
            Err(CircuitBreakerError::Timeout { .. }) => Err(timeout_message(timeout)),
        },
        None => match tokio::time::timeout(timeout, query()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_elapsed) => Err(timeout_message(timeout)),
        },
    };

    let latency_ms = start.elapsed().as_millis() as u64;
    metrics::record_probe_latency(latency_ms);

    match outcome {
        Ok(()) => {
            let result = ProbeResult::success(latency_ms);
            debug!(
                latency_ms,
                status = %result.status,
                "Database health check completed"
            );
            result
        }
        Err(message) => {
            error!(
                error = %message,
                latency_ms,
                "Database health check failed"
            );
            ProbeResult::failure(latency_ms, message)
        }
    }
}

fn timeout_message(timeout: Duration) -> String {
    format!("Health check timed out after {}ms", timeout.as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::health::HealthStatus;
    use crate::resilience::{CircuitBreakerPreset, CircuitState};

    #[tokio::test]
    async fn test_fast_query_is_healthy() {
        let result = run_probe(None, Duration::from_secs(1), || async { Ok::<_, String>(()) }).await;
        assert!(result.healthy);
        assert_eq!(result.status, HealthStatus::Healthy);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_query_error_is_critical() {
        let result = run_probe(None, Duration::from_secs(1), || async {
            Err::<(), _>("connection refused")
        })
        .await;
        assert!(!result.healthy);
        assert_eq!(result.status, HealthStatus::Critical);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_timeout_is_reported_like_a_failure() {
        let result = run_probe(None, Duration::from_millis(10), || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, String>(())
        })
        .await;
        assert!(!result.healthy);
        assert_eq!(
            result.error.as_deref(),
            Some("Health check timed out after 10ms")
        );
    }

    #[tokio::test]
    async fn test_open_circuit_skips_query() {
        let breaker = CircuitBreaker::new(
            "database",
            CircuitBreakerPreset::Critical.config(),
            MockClock::shared(),
        );
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);

        let ran = std::sync::atomic::AtomicBool::new(false);
        let result = run_probe(Some(&breaker), Duration::from_secs(1), || async {
            ran.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok::<_, String>(())
        })
        .await;
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!result.healthy);
        assert_eq!(result.error.as_deref(), Some("Circuit breaker open"));
    }

    #[tokio::test]
    async fn test_failures_trip_the_database_breaker() {
        let breaker = CircuitBreaker::new(
            "database",
            CircuitBreakerPreset::Critical.config(),
            MockClock::shared(),
        );
        for _ in 0..3 {
            run_probe(Some(&breaker), Duration::from_secs(1), || async {
                Err::<(), _>("down")
            })
            .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
