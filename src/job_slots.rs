//! # Job-Slot Manager
//!
//! A global, approximate counting semaphore over long-running jobs, kept in the
//! coordination store so every worker instance sees the same count.
//!
//! ## Store layout
//!
//! - `{ns}:jobs:active_count`: integer counter
//! - `{ns}:jobs:active_ids`: set of slot ids (`{job_type}:{job_id}`)
//! - `{ns}:job:{slot_id}`: one TTL-expiring key per slot
//!
//! The counter, the set and every slot key carry the slot TTL. A worker that
//! dies without releasing stops renewing; its slot key expires and the next
//! status read drops the member and reconciles the counter to the set size.
//!
//! ## Concurrency levels
//!
//! | Level    | Active jobs | Delay multiplier | Admits new jobs |
//! |----------|-------------|------------------|-----------------|
//! | Normal   | 0-3         | 1                | yes             |
//! | Elevated | 4-5         | 2                | yes             |
//! | High     | 6-8         | 4                | no              |
//! | Critical | 9+          | 8                | no              |
//!
//! Admission is a soft limit: two acquirers may both pass the status read
//! before either increments. TTL expiry and reconciliation keep the overshoot
//! bounded and temporary.

use crate::clock::SharedClock;
use crate::config::GuardConfig;
use crate::errors::{GuardResult, StoreError};
use crate::store::{SharedStore, StoreCommand, StoreKeys, StoreReply};
use crate::telemetry::metrics;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Ceiling of the HIGH band, reported as the fleet's maximum job count
pub const MAX_CONCURRENT_JOBS: i64 = 8;

/// Concurrency band derived from the active job count
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyLevel {
    Normal,
    Elevated,
    High,
    Critical,
}

impl ConcurrencyLevel {
    pub fn from_active_count(active: i64) -> Self {
        match active {
            i64::MIN..=3 => ConcurrencyLevel::Normal,
            4..=5 => ConcurrencyLevel::Elevated,
            6..=MAX_CONCURRENT_JOBS => ConcurrencyLevel::High,
            _ => ConcurrencyLevel::Critical,
        }
    }

    pub fn delay_multiplier(&self) -> u32 {
        match self {
            ConcurrencyLevel::Normal => 1,
            ConcurrencyLevel::Elevated => 2,
            ConcurrencyLevel::High => 4,
            ConcurrencyLevel::Critical => 8,
        }
    }

    pub fn admits_new_jobs(&self) -> bool {
        matches!(self, ConcurrencyLevel::Normal | ConcurrencyLevel::Elevated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyLevel::Normal => "normal",
            ConcurrencyLevel::Elevated => "elevated",
            ConcurrencyLevel::High => "high",
            ConcurrencyLevel::Critical => "critical",
        }
    }
}

/// Snapshot of fleet-wide job concurrency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSlotStatus {
    pub active_job_count: i64,
    pub level: ConcurrencyLevel,
    pub can_start_new_job: bool,
    pub delay_multiplier: u32,
    pub active_job_ids: Vec<String>,
    /// False when the store could not be reached and the status is a fail-open default
    pub coordinated: bool,
}

impl JobSlotStatus {
    fn from_active_ids(active_job_ids: Vec<String>) -> Self {
        let active_job_count = active_job_ids.len() as i64;
        let level = ConcurrencyLevel::from_active_count(active_job_count);
        Self {
            active_job_count,
            level,
            can_start_new_job: level.admits_new_jobs(),
            delay_multiplier: level.delay_multiplier(),
            active_job_ids,
            coordinated: true,
        }
    }

    /// Status used when the store is unavailable: allow, uncoordinated
    pub fn uncoordinated() -> Self {
        Self {
            coordinated: false,
            ..Self::from_active_ids(Vec::new())
        }
    }
}

/// Slot identifier for a job
pub fn slot_id(job_id: &str, job_type: &str) -> String {
    format!("{job_type}:{job_id}")
}

/// Result of [`JobSlotManager::run_with_slot`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome<T> {
    Completed(T),
    /// Admission refused; the work did not run
    Refused,
}

#[derive(Debug, Clone)]
pub struct JobSlotManager {
    store: SharedStore,
    keys: StoreKeys,
    clock: SharedClock,
    slot_ttl: Duration,
}

impl JobSlotManager {
    pub fn new(store: SharedStore, keys: StoreKeys, clock: SharedClock, slot_ttl: Duration) -> Self {
        Self {
            store,
            keys,
            clock,
            slot_ttl: slot_ttl.max(Duration::from_secs(1)),
        }
    }

    pub fn from_config(store: SharedStore, clock: SharedClock, config: &GuardConfig) -> Self {
        Self::new(
            store,
            StoreKeys::new(config.store.namespace.clone()),
            clock,
            config.backpressure.job_slot_ttl(),
        )
    }

    pub fn slot_ttl(&self) -> Duration {
        self.slot_ttl
    }

    fn ttl_secs(&self) -> u64 {
        self.slot_ttl.as_secs().max(1)
    }

    /// Current concurrency, after dropping slots whose keys have expired
    pub async fn get_job_slot_status(&self) -> GuardResult<JobSlotStatus> {
        match self.read_status().await {
            Ok(status) => {
                metrics::set_active_jobs(status.active_job_count);
                Ok(status)
            }
            Err(err) if err.is_unavailable() => {
                warn!(error = %err, "Job-slot status unavailable, failing open");
                Ok(JobSlotStatus::uncoordinated())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn read_status(&self) -> Result<JobSlotStatus, StoreError> {
        let ids_key = self.keys.active_job_ids();
        let count_key = self.keys.active_job_count();

        let members = self
            .store
            .execute(StoreCommand::smembers(&ids_key))
            .await?
            .into_list("SMEMBERS")?;

        let mut live = Vec::with_capacity(members.len());
        let mut stale = Vec::new();
        if !members.is_empty() {
            let checks = members
                .iter()
                .map(|member| StoreCommand::exists(self.keys.job_slot(member)))
                .collect();
            let replies = self.store.pipeline(checks).await?;
            for (member, reply) in members.into_iter().zip(replies) {
                if reply.into_int("EXISTS")? > 0 {
                    live.push(member);
                } else {
                    stale.push(member);
                }
            }
        }

        if !stale.is_empty() {
            info!(
                reclaimed = stale.len(),
                slots = ?stale,
                "Reclaiming job slots whose heartbeat expired"
            );
            let removals = stale
                .iter()
                .map(|member| StoreCommand::srem(&ids_key, member))
                .collect();
            self.store.pipeline(removals).await?;
        }

        let counter = self
            .store
            .execute(StoreCommand::get(&count_key))
            .await?
            .into_int("GET")?;
        let actual = live.len() as i64;
        if counter != actual {
            debug!(counter, actual, "Reconciling active job counter to slot set");
            self.write_counter(actual).await?;
        }

        live.sort();
        Ok(JobSlotStatus::from_active_ids(live))
    }

    async fn write_counter(&self, value: i64) -> Result<(), StoreError> {
        self.store
            .execute(StoreCommand::set_ex(
                self.keys.active_job_count(),
                value.max(0).to_string(),
                self.ttl_secs(),
            ))
            .await?;
        Ok(())
    }

    /// Claim a slot for `job_id`. Returns false when concurrency is HIGH or above.
    ///
    /// Fails open: with the store unavailable the job is admitted uncoordinated.
    pub async fn acquire_job_slot(&self, job_id: &str, job_type: &str) -> GuardResult<bool> {
        let status = self.get_job_slot_status().await?;
        if !status.can_start_new_job {
            info!(
                job_id,
                job_type,
                active_jobs = status.active_job_count,
                level = status.level.as_str(),
                "Job slot refused"
            );
            metrics::record_job_slot_decision(job_type, "refused");
            return Ok(false);
        }
        if !status.coordinated {
            metrics::record_job_slot_decision(job_type, "fail_open");
            return Ok(true);
        }

        match self.register_slot(job_id, job_type).await {
            Ok(()) => {
                debug!(job_id, job_type, "Job slot acquired");
                metrics::record_job_slot_decision(job_type, "admitted");
                Ok(true)
            }
            Err(err) if err.is_unavailable() => {
                warn!(job_id, job_type, error = %err, "Job slot not recorded, failing open");
                metrics::record_job_slot_decision(job_type, "fail_open");
                Ok(true)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn register_slot(&self, job_id: &str, job_type: &str) -> Result<(), StoreError> {
        let slot = slot_id(job_id, job_type);
        let count_key = self.keys.active_job_count();
        let ids_key = self.keys.active_job_ids();
        let ttl = self.ttl_secs();
        let marker = self.clock.now_millis().to_string();

        let replies = self
            .store
            .pipeline(vec![
                StoreCommand::incr(&count_key),
                StoreCommand::expire(&count_key, ttl),
                StoreCommand::sadd(&ids_key, &slot),
                StoreCommand::expire(&ids_key, ttl),
                StoreCommand::set_ex(self.keys.job_slot(&slot), marker, ttl),
            ])
            .await?;

        // Re-acquiring a slot we already hold must not count twice
        let added = replies
            .get(2)
            .cloned()
            .unwrap_or(StoreReply::Nil)
            .into_int("SADD")?;
        if added == 0 {
            debug!(slot = %slot, "Slot already held, undoing duplicate increment");
            self.store.execute(StoreCommand::decr(&count_key)).await?;
        }
        Ok(())
    }

    /// Give the slot back. Safe to call more than once.
    pub async fn release_job_slot(&self, job_id: &str, job_type: &str) -> GuardResult<()> {
        match self.unregister_slot(job_id, job_type).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_unavailable() => {
                warn!(
                    job_id,
                    job_type,
                    error = %err,
                    "Job slot release not recorded, TTL will reclaim it"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn unregister_slot(&self, job_id: &str, job_type: &str) -> Result<(), StoreError> {
        let slot = slot_id(job_id, job_type);
        let count_key = self.keys.active_job_count();

        let replies = self
            .store
            .pipeline(vec![
                StoreCommand::srem(self.keys.active_job_ids(), &slot),
                StoreCommand::del(self.keys.job_slot(&slot)),
            ])
            .await?;
        let removed = replies
            .into_iter()
            .next()
            .unwrap_or(StoreReply::Nil)
            .into_int("SREM")?;
        if removed == 0 {
            debug!(slot = %slot, "Slot was not held (already released or reclaimed)");
            return Ok(());
        }

        let remaining = self
            .store
            .execute(StoreCommand::decr(&count_key))
            .await?
            .into_int("DECR")?;
        if remaining < 0 {
            warn!(counter = remaining, "Active job counter went negative, clamping to zero");
            self.write_counter(0).await?;
        }
        debug!(slot = %slot, remaining = remaining.max(0), "Job slot released");
        Ok(())
    }

    /// Heartbeat: extend the slot's TTL. Returns false when the slot had
    /// already expired; it is then registered again.
    pub async fn renew_job_slot(&self, job_id: &str, job_type: &str) -> GuardResult<bool> {
        match self.extend_slot(job_id, job_type).await {
            Ok(still_held) => Ok(still_held),
            Err(err) if err.is_unavailable() => {
                warn!(job_id, job_type, error = %err, "Job slot heartbeat not recorded");
                Ok(true)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn extend_slot(&self, job_id: &str, job_type: &str) -> Result<bool, StoreError> {
        let slot = slot_id(job_id, job_type);
        let ttl = self.ttl_secs();

        let replies = self
            .store
            .pipeline(vec![
                StoreCommand::expire(self.keys.job_slot(&slot), ttl),
                StoreCommand::expire(self.keys.active_job_count(), ttl),
                StoreCommand::expire(self.keys.active_job_ids(), ttl),
            ])
            .await?;
        let extended = replies
            .into_iter()
            .next()
            .unwrap_or(StoreReply::Nil)
            .into_int("EXPIRE")?;
        if extended > 0 {
            return Ok(true);
        }

        warn!(slot = %slot, "Job slot expired before heartbeat, re-registering");
        self.register_slot(job_id, job_type).await?;
        Ok(false)
    }

    /// Acquire a slot, keep it alive while `work` runs, and always release it.
    ///
    /// The heartbeat renews every third of the slot TTL. If the future is
    /// dropped or panics, release is still scheduled on the runtime.
    pub async fn run_with_slot<F, Fut, T>(
        &self,
        job_id: &str,
        job_type: &str,
        work: F,
    ) -> GuardResult<SlotOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(guard) = self.acquire_guarded(job_id, job_type).await? else {
            return Ok(SlotOutcome::Refused);
        };
        let output = work().await;
        guard.release().await?;
        Ok(SlotOutcome::Completed(output))
    }

    /// Acquire a slot and start its heartbeat. `None` when admission is refused.
    pub async fn acquire_guarded(&self, job_id: &str, job_type: &str) -> GuardResult<Option<SlotGuard>> {
        if !self.acquire_job_slot(job_id, job_type).await? {
            return Ok(None);
        }
        let heartbeat = self.spawn_heartbeat(job_id.to_string(), job_type.to_string());
        Ok(Some(SlotGuard {
            manager: self.clone(),
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            heartbeat: Some(heartbeat),
            released: false,
        }))
    }

    fn spawn_heartbeat(&self, job_id: String, job_type: String) -> JoinHandle<()> {
        let manager = self.clone();
        let period = (self.slot_ttl / 3).max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(err) = manager.renew_job_slot(&job_id, &job_type).await {
                    warn!(job_id = %job_id, job_type = %job_type, error = %err, "Job slot heartbeat failed");
                }
            }
        })
    }
}

/// A held job slot with a running heartbeat
#[derive(Debug)]
pub struct SlotGuard {
    manager: JobSlotManager,
    job_id: String,
    job_type: String,
    heartbeat: Option<JoinHandle<()>>,
    released: bool,
}

impl SlotGuard {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Stop the heartbeat and release the slot
    pub async fn release(mut self) -> GuardResult<()> {
        self.stop_heartbeat();
        self.released = true;
        self.manager
            .release_job_slot(&self.job_id, &self.job_type)
            .await
    }

    fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.stop_heartbeat();
        if self.released {
            return;
        }
        let manager = self.manager.clone();
        let job_id = std::mem::take(&mut self.job_id);
        let job_type = std::mem::take(&mut self.job_type);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = manager.release_job_slot(&job_id, &job_type).await {
                        warn!(job_id = %job_id, error = %err, "Deferred job slot release failed");
                    }
                });
            }
            Err(_) => {
                warn!(job_id = %job_id, "No runtime to release job slot, TTL will reclaim it");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::store::{CoordinationStore, InMemoryCoordinationStore};
    use std::sync::Arc;

    fn manager() -> (JobSlotManager, Arc<InMemoryCoordinationStore>, Arc<MockClock>) {
        let clock = MockClock::shared();
        let store = Arc::new(InMemoryCoordinationStore::new(clock.clone()));
        let manager = JobSlotManager::new(
            store.clone(),
            StoreKeys::default(),
            clock.clone(),
            Duration::from_secs(300),
        );
        (manager, store, clock)
    }

    async fn counter(store: &InMemoryCoordinationStore) -> i64 {
        store
            .execute(StoreCommand::get(StoreKeys::default().active_job_count()))
            .await
            .unwrap()
            .into_int("GET")
            .unwrap()
    }

    #[test]
    fn test_level_bands() {
        assert_eq!(ConcurrencyLevel::from_active_count(0), ConcurrencyLevel::Normal);
        assert_eq!(ConcurrencyLevel::from_active_count(3), ConcurrencyLevel::Normal);
        assert_eq!(ConcurrencyLevel::from_active_count(4), ConcurrencyLevel::Elevated);
        assert_eq!(ConcurrencyLevel::from_active_count(5), ConcurrencyLevel::Elevated);
        assert_eq!(ConcurrencyLevel::from_active_count(6), ConcurrencyLevel::High);
        assert_eq!(ConcurrencyLevel::from_active_count(8), ConcurrencyLevel::High);
        assert_eq!(ConcurrencyLevel::from_active_count(9), ConcurrencyLevel::Critical);

        assert!(ConcurrencyLevel::Elevated.admits_new_jobs());
        assert!(!ConcurrencyLevel::High.admits_new_jobs());
        assert_eq!(ConcurrencyLevel::High.delay_multiplier(), 4);
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (manager, store, _) = manager();

        assert!(manager.acquire_job_slot("job-1", "import").await.unwrap());
        let status = manager.get_job_slot_status().await.unwrap();
        assert_eq!(status.active_job_count, 1);
        assert_eq!(status.active_job_ids, vec!["import:job-1".to_string()]);
        assert!(store.pttl(&StoreKeys::default().job_slot("import:job-1")).is_some());

        manager.release_job_slot("job-1", "import").await.unwrap();
        assert_eq!(counter(&store).await, 0);
        assert_eq!(manager.get_job_slot_status().await.unwrap().active_job_count, 0);
    }

    #[tokio::test]
    async fn test_double_release_does_not_go_negative() {
        let (manager, store, _) = manager();
        manager.acquire_job_slot("job-1", "import").await.unwrap();
        manager.release_job_slot("job-1", "import").await.unwrap();
        manager.release_job_slot("job-1", "import").await.unwrap();
        assert_eq!(counter(&store).await, 0);
    }

    #[tokio::test]
    async fn test_reacquire_same_slot_counts_once() {
        let (manager, store, _) = manager();
        manager.acquire_job_slot("job-1", "import").await.unwrap();
        manager.acquire_job_slot("job-1", "import").await.unwrap();
        assert_eq!(counter(&store).await, 1);
    }

    #[tokio::test]
    async fn test_refuses_at_high_concurrency() {
        let (manager, store, _) = manager();
        for n in 0..6 {
            assert!(manager.acquire_job_slot(&format!("job-{n}"), "annotate").await.unwrap());
        }
        assert!(!manager.acquire_job_slot("job-6", "annotate").await.unwrap());
        assert_eq!(counter(&store).await, 6);
        let status = manager.get_job_slot_status().await.unwrap();
        assert_eq!(status.level, ConcurrencyLevel::High);
        assert!(!status.active_job_ids.contains(&"annotate:job-6".to_string()));
    }

    #[tokio::test]
    async fn test_renew_reregisters_expired_slot() {
        let (manager, store, clock) = manager();
        manager.acquire_job_slot("job-1", "import").await.unwrap();
        assert!(manager.renew_job_slot("job-1", "import").await.unwrap());

        clock.advance(Duration::from_secs(301));
        assert!(!manager.renew_job_slot("job-1", "import").await.unwrap());
        assert_eq!(counter(&store).await, 1);
        assert_eq!(manager.get_job_slot_status().await.unwrap().active_job_count, 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_open() {
        let (manager, store, _) = manager();
        store.set_unavailable(true);

        assert!(manager.acquire_job_slot("job-1", "import").await.unwrap());
        let status = manager.get_job_slot_status().await.unwrap();
        assert!(!status.coordinated);
        assert!(status.can_start_new_job);
        manager.release_job_slot("job-1", "import").await.unwrap();
        assert!(manager.renew_job_slot("job-1", "import").await.unwrap());
    }

    #[tokio::test]
    async fn test_run_with_slot_releases_after_work() {
        let (manager, store, _) = manager();
        let outcome = manager
            .run_with_slot("job-1", "import", || async { 42 })
            .await
            .unwrap();
        assert_eq!(outcome, SlotOutcome::Completed(42));
        assert_eq!(counter(&store).await, 0);
    }

    #[tokio::test]
    async fn test_run_with_slot_releases_on_error_result() {
        let (manager, store, _) = manager();
        let outcome = manager
            .run_with_slot("job-1", "import", || async { Err::<(), _>("parse failed") })
            .await
            .unwrap();
        assert_eq!(outcome, SlotOutcome::Completed(Err("parse failed")));
        assert_eq!(counter(&store).await, 0);
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_slot() {
        let (manager, store, _) = manager();
        let guard = manager.acquire_guarded("job-1", "import").await.unwrap();
        assert!(guard.is_some());
        drop(guard);

        for _ in 0..50 {
            if counter(&store).await == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(counter(&store).await, 0);
    }
}
