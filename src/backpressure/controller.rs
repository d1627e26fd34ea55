//! # Backpressure Controller
//!
//! Combines job-slot concurrency, the shared cooldown and a fresh database
//! probe into one go / slow down / pause decision per worker invocation.
//!
//! ## Decision order
//!
//! 1. Concurrency CRITICAL: trigger a critical cooldown and pause.
//! 2. Unexpired cooldown in the store: pause without probing the database.
//! 3. Probe the database and record the sample into [`HealthMetrics`].
//! 4. Latency or error rate over a threshold: trigger that level's cooldown.
//! 5. Healthy database with concurrency above NORMAL: slow down.
//! 6. Otherwise healthy.
//!
//! Coordination-store unavailability never blocks a worker: a cooldown that
//! cannot be read is treated as absent, one that cannot be written is still
//! reported to the caller.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::types::{
    BackpressureCheck, BackpressureState, BackpressureStatus, ChunkDecision, ConcurrencySnapshot,
    CooldownLevel, HealthCheckResult,
};
use crate::clock::SharedClock;
use crate::config::GuardConfig;
use crate::errors::{GuardError, GuardResult};
use crate::health::{DatabaseProbe, HealthMetrics, HealthMetricsSnapshot, HealthStatus, ProbeResult};
use crate::job_slots::{ConcurrencyLevel, JobSlotManager};
use crate::store::{SharedStore, StoreCommand, StoreKeys};
use crate::telemetry::{metrics, BestEffortSink};

/// Probe latency above which the database counts as degraded
pub const DEGRADED_LATENCY_MS: u64 = 500;
pub const UNHEALTHY_LATENCY_MS: u64 = 1_000;
pub const CRITICAL_LATENCY_MS: u64 = 3_000;

/// Error rates (fraction of probes failing) for each level
pub const DEGRADED_ERROR_RATE: f64 = 0.25;
pub const UNHEALTHY_ERROR_RATE: f64 = 0.50;
pub const CRITICAL_ERROR_RATE: f64 = 0.75;

/// TTL of the mirrored health counters
const METRIC_TTL_SECS: u64 = 24 * 60 * 60;

const REQUEST_COUNT_METRIC: &str = "request_count";
const ERROR_COUNT_METRIC: &str = "error_count";
const LAST_LATENCY_METRIC: &str = "last_latency_ms";

#[derive(Debug, Clone)]
pub struct BackpressureController {
    store: SharedStore,
    keys: StoreKeys,
    clock: SharedClock,
    probe: Arc<dyn DatabaseProbe>,
    job_slots: JobSlotManager,
    metrics: Arc<HealthMetrics>,
    sink: BestEffortSink,
}

impl BackpressureController {
    pub fn new(
        store: SharedStore,
        probe: Arc<dyn DatabaseProbe>,
        clock: SharedClock,
        config: &GuardConfig,
    ) -> Self {
        let keys = StoreKeys::new(config.store.namespace.clone());
        let job_slots = JobSlotManager::new(
            Arc::clone(&store),
            keys.clone(),
            Arc::clone(&clock),
            config.backpressure.job_slot_ttl(),
        );
        Self {
            store,
            keys,
            clock,
            probe,
            job_slots,
            metrics: Arc::new(HealthMetrics::new()),
            sink: BestEffortSink::new(config.backpressure.sink_capacity),
        }
    }

    pub fn job_slots(&self) -> &JobSlotManager {
        &self.job_slots
    }

    pub fn health_metrics(&self) -> HealthMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn sink(&self) -> &BestEffortSink {
        &self.sink
    }

    /// Probe the database without recording the sample
    pub async fn probe_database(&self) -> ProbeResult {
        self.probe.check_database_health().await
    }

    /// Decide whether `caller` may keep working
    pub async fn perform_health_check(&self, caller: &str) -> GuardResult<HealthCheckResult> {
        let result = self.evaluate(caller).await?;
        metrics::record_health_check(caller, result.status.as_str());
        if result.should_pause {
            info!(
                caller,
                status = %result.status,
                reason = result.message.as_deref().unwrap_or_default(),
                cooldown_remaining_ms = result.cooldown_remaining_ms.unwrap_or_default(),
                "Worker should pause"
            );
        } else {
            debug!(
                caller,
                status = %result.status,
                latency_ms = result.latency_ms,
                should_slow_down = result.should_slow_down,
                "Health check completed"
            );
        }
        Ok(result)
    }

    async fn evaluate(&self, caller: &str) -> GuardResult<HealthCheckResult> {
        let slots = self.job_slots.get_job_slot_status().await?;
        let concurrency = ConcurrencySnapshot::from(&slots);

        if slots.level == ConcurrencyLevel::Critical {
            let reason = format!(
                "Concurrency critical: {} active jobs",
                slots.active_job_count
            );
            let remaining = self
                .trigger_or_report(&reason, CooldownLevel::Critical)
                .await?;
            return Ok(HealthCheckResult {
                status: HealthStatus::Critical,
                latency_ms: 0,
                message: Some(reason),
                should_pause: true,
                should_slow_down: true,
                cooldown_level: Some(CooldownLevel::Critical),
                cooldown_remaining_ms: Some(remaining),
                concurrency: Some(concurrency),
            });
        }

        match self.check_backpressure_status().await {
            Ok(check) if check.is_active => {
                let level = check.cooldown_level.unwrap_or(CooldownLevel::Critical);
                debug!(caller, level = level.as_str(), "Cooldown active, skipping database probe");
                return Ok(HealthCheckResult {
                    status: level.health_status(),
                    latency_ms: 0,
                    message: check.reason,
                    should_pause: true,
                    should_slow_down: true,
                    cooldown_level: Some(level),
                    cooldown_remaining_ms: Some(check.cooldown_remaining_ms),
                    concurrency: Some(concurrency),
                });
            }
            Ok(_) => {}
            Err(err) if err.is_store_unavailable() => {
                warn!(caller, error = %err, "Cooldown unreadable, continuing uncoordinated");
            }
            Err(GuardError::Serialization(detail)) => {
                warn!(caller, error = %detail, "Cooldown state malformed, probing database");
            }
            Err(err) => return Err(err),
        }

        let probe = self.probe.check_database_health().await;
        let snapshot = self.metrics.record(&probe);
        self.mirror_probe(&probe);

        if let Some((level, reason)) = classify(&probe, snapshot.error_rate) {
            let remaining = self.trigger_or_report(&reason, level).await?;
            return Ok(HealthCheckResult {
                status: level.health_status(),
                latency_ms: probe.latency_ms,
                message: Some(reason),
                should_pause: level != CooldownLevel::Degraded,
                should_slow_down: true,
                cooldown_level: Some(level),
                cooldown_remaining_ms: Some(remaining),
                concurrency: Some(concurrency),
            });
        }

        if slots.level != ConcurrencyLevel::Normal {
            return Ok(HealthCheckResult {
                message: Some(format!(
                    "Concurrency {}: {} active jobs",
                    slots.level.as_str(),
                    slots.active_job_count
                )),
                should_slow_down: true,
                ..HealthCheckResult::healthy(probe.latency_ms, Some(concurrency))
            });
        }

        Ok(HealthCheckResult::healthy(probe.latency_ms, Some(concurrency)))
    }

    /// Trigger a cooldown; with the store unavailable, report the full
    /// cooldown locally so the caller still backs off
    async fn trigger_or_report(&self, reason: &str, level: CooldownLevel) -> GuardResult<u64> {
        match self.trigger_backpressure(reason, level).await {
            Ok(state) => Ok(state.remaining_ms(self.clock.now_millis())),
            Err(err) if err.is_store_unavailable() => {
                warn!(
                    level = level.as_str(),
                    error = %err,
                    "Cooldown not shared, store unavailable"
                );
                Ok(level.cooldown().as_millis() as u64)
            }
            Err(err) => Err(err),
        }
    }

    /// Write a cooldown every instance will observe. An active cooldown of a
    /// higher level is kept rather than downgraded.
    pub async fn trigger_backpressure(
        &self,
        reason: &str,
        level: CooldownLevel,
    ) -> GuardResult<BackpressureState> {
        let now = self.clock.now_millis();

        let existing = match self.read_state().await {
            Ok(existing) => existing,
            Err(GuardError::Serialization(detail)) => {
                warn!(error = %detail, "Discarding unreadable cooldown state");
                None
            }
            Err(err) => return Err(err),
        };
        if let Some(existing) = existing {
            if existing.is_active_at(now) && existing.cooldown_level > level {
                debug!(
                    existing = existing.cooldown_level.as_str(),
                    requested = level.as_str(),
                    "Stronger cooldown already active"
                );
                return Ok(existing);
            }
        }

        let cooldown = level.cooldown();
        let state = BackpressureState {
            cooldown_until: now + cooldown.as_millis() as i64,
            cooldown_level: level,
            trigger_reason: reason.to_string(),
            status: BackpressureStatus::Active,
            triggered_at: now,
        };
        let payload = serde_json::to_string(&state)?;
        self.store
            .execute(StoreCommand::set_ex(
                self.keys.backpressure_state(),
                payload,
                cooldown.as_secs(),
            ))
            .await?;

        warn!(
            level = level.as_str(),
            reason,
            cooldown_secs = cooldown.as_secs(),
            "Backpressure triggered"
        );
        metrics::record_backpressure_activation(level.as_str());
        metrics::set_backpressure_active(true);
        Ok(state)
    }

    /// Read the shared cooldown, deleting it if it has lapsed
    pub async fn check_backpressure_status(&self) -> GuardResult<BackpressureCheck> {
        let Some(state) = self.read_state().await? else {
            return Ok(BackpressureCheck::inactive());
        };

        let now = self.clock.now_millis();
        if state.is_active_at(now) {
            return Ok(BackpressureCheck::from_state(&state, now));
        }

        debug!(level = state.cooldown_level.as_str(), "Cooldown elapsed, clearing");
        self.store
            .execute(StoreCommand::del(self.keys.backpressure_state()))
            .await?;
        metrics::set_backpressure_active(false);
        Ok(BackpressureCheck::inactive())
    }

    pub async fn clear_backpressure(&self) -> GuardResult<()> {
        self.store
            .execute(StoreCommand::del(self.keys.backpressure_state()))
            .await?;
        info!("Backpressure cleared");
        metrics::set_backpressure_active(false);
        Ok(())
    }

    async fn read_state(&self) -> GuardResult<Option<BackpressureState>> {
        let raw = self
            .store
            .execute(StoreCommand::get(self.keys.backpressure_state()))
            .await?
            .into_opt_string("GET")?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// `base_delay` scaled by the worse of the concurrency and health multipliers
    pub fn get_recommended_delay(result: &HealthCheckResult, base_delay: Duration) -> Duration {
        let concurrency = result
            .concurrency
            .map(|snapshot| snapshot.delay_multiplier)
            .unwrap_or(1);
        let health = result.status.delay_multiplier();
        base_delay.saturating_mul(concurrency.max(health))
    }

    /// Health check reduced to what a chunked worker should do next.
    /// Failures inside the subsystem degrade to proceeding at `base_delay`.
    pub async fn decide_chunk(&self, caller: &str, base_delay: Duration) -> ChunkDecision {
        match self.perform_health_check(caller).await {
            Ok(result) if result.should_pause => ChunkDecision::Defer {
                reason: result
                    .message
                    .unwrap_or_else(|| format!("System {}", result.status)),
                retry_after: Duration::from_millis(result.cooldown_remaining_ms.unwrap_or_else(
                    || {
                        result
                            .cooldown_level
                            .map(|level| level.cooldown().as_millis() as u64)
                            .unwrap_or_default()
                    },
                )),
            },
            Ok(result) if result.should_slow_down => ChunkDecision::SlowDown {
                delay: Self::get_recommended_delay(&result, base_delay),
            },
            Ok(result) => ChunkDecision::Proceed {
                delay: Self::get_recommended_delay(&result, base_delay),
            },
            Err(err) => {
                error!(caller, error = %err, "Health check failed, proceeding uncoordinated");
                ChunkDecision::Proceed { delay: base_delay }
            }
        }
    }

    fn mirror_probe(&self, probe: &ProbeResult) {
        let requests = self.keys.metric(REQUEST_COUNT_METRIC);
        self.sink.offer(StoreCommand::incr(&requests));
        self.sink.offer(StoreCommand::expire(&requests, METRIC_TTL_SECS));
        if !probe.healthy {
            let errors = self.keys.metric(ERROR_COUNT_METRIC);
            self.sink.offer(StoreCommand::incr(&errors));
            self.sink.offer(StoreCommand::expire(&errors, METRIC_TTL_SECS));
        }
        self.sink.offer(StoreCommand::set_ex(
            self.keys.metric(LAST_LATENCY_METRIC),
            probe.latency_ms.to_string(),
            METRIC_TTL_SECS,
        ));
    }

    /// Write queued metric mirrors now; for short-lived invocations
    pub async fn flush_metrics(&self) -> usize {
        self.sink.flush(&self.store).await
    }

    /// Write metric mirrors in the background for long-lived processes
    pub fn spawn_metrics_flusher(&self) -> JoinHandle<()> {
        self.sink.spawn_flusher(Arc::clone(&self.store))
    }

    /// Adopt fleet-wide request/error totals mirrored by other instances
    pub async fn sync_metrics_from_store(&self) -> GuardResult<HealthMetricsSnapshot> {
        let replies = self
            .store
            .pipeline(vec![
                StoreCommand::get(self.keys.metric(REQUEST_COUNT_METRIC)),
                StoreCommand::get(self.keys.metric(ERROR_COUNT_METRIC)),
            ])
            .await?;
        let mut totals = replies.into_iter().map(|reply| reply.into_int("GET"));
        let requests = totals.next().transpose()?.unwrap_or_default();
        let errors = totals.next().transpose()?.unwrap_or_default();
        if requests < 0 || errors < 0 {
            return Err(GuardError::StoreProtocol(format!(
                "negative mirrored health counters: requests={requests} errors={errors}"
            )));
        }
        self.metrics.absorb_totals(requests as u64, errors as u64);
        Ok(self.metrics.snapshot())
    }
}

/// Worst level triggered by a probe and the current error rate, with its reason
pub fn classify(probe: &ProbeResult, error_rate: f64) -> Option<(CooldownLevel, String)> {
    let latency = probe.latency_ms;
    let rate_pct = error_rate * 100.0;

    if !probe.healthy {
        let error = probe.error.as_deref().unwrap_or("probe failed");
        return Some((CooldownLevel::Critical, format!("Database unavailable: {error}")));
    }
    if latency > CRITICAL_LATENCY_MS {
        return Some((
            CooldownLevel::Critical,
            format!("Database latency {latency}ms exceeds {CRITICAL_LATENCY_MS}ms"),
        ));
    }
    if error_rate > CRITICAL_ERROR_RATE {
        return Some((
            CooldownLevel::Critical,
            format!("Error rate {rate_pct:.0}% exceeds 75%"),
        ));
    }
    if latency > UNHEALTHY_LATENCY_MS {
        return Some((
            CooldownLevel::Unhealthy,
            format!("Database latency {latency}ms exceeds {UNHEALTHY_LATENCY_MS}ms"),
        ));
    }
    if error_rate > UNHEALTHY_ERROR_RATE {
        return Some((
            CooldownLevel::Unhealthy,
            format!("Error rate {rate_pct:.0}% exceeds 50%"),
        ));
    }
    if latency > DEGRADED_LATENCY_MS {
        return Some((
            CooldownLevel::Degraded,
            format!("Database latency {latency}ms exceeds {DEGRADED_LATENCY_MS}ms"),
        ));
    }
    if error_rate > DEGRADED_ERROR_RATE {
        return Some((
            CooldownLevel::Degraded,
            format!("Error rate {rate_pct:.0}% exceeds 25%"),
        ));
    }
    None
}
