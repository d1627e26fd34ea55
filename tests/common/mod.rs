#![allow(dead_code)]

pub mod strategies;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use workguard_core::backpressure::BackpressureController;
use workguard_core::clock::MockClock;
use workguard_core::config::GuardConfig;
use workguard_core::health::{DatabaseProbe, ProbeResult};
use workguard_core::job_slots::JobSlotManager;
use workguard_core::store::{InMemoryCoordinationStore, StoreKeys};

/// Probe whose answer the test controls
#[derive(Debug)]
pub struct ScriptedProbe {
    next: Mutex<ProbeResult>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(latency_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            next: Mutex::new(ProbeResult::success(latency_ms)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_latency(&self, latency_ms: u64) {
        *self.next.lock() = ProbeResult::success(latency_ms);
    }

    pub fn set_down(&self, error: &str) {
        *self.next.lock() = ProbeResult::failure(2, error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseProbe for ScriptedProbe {
    async fn check_database_health(&self) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next.lock().clone()
    }
}

/// In-memory store, mock clock and scripted probe wired into a controller
pub struct Harness {
    pub clock: Arc<MockClock>,
    pub store: Arc<InMemoryCoordinationStore>,
    pub probe: Arc<ScriptedProbe>,
    pub controller: BackpressureController,
}

impl Harness {
    pub fn new(latency_ms: u64) -> Self {
        let clock = MockClock::shared();
        let store = Arc::new(InMemoryCoordinationStore::new(clock.clone()));
        let probe = ScriptedProbe::new(latency_ms);
        let controller = BackpressureController::new(
            store.clone(),
            probe.clone(),
            clock.clone(),
            &GuardConfig::default(),
        );
        Self {
            clock,
            store,
            probe,
            controller,
        }
    }

    pub fn job_slots(&self) -> &JobSlotManager {
        self.controller.job_slots()
    }

    pub fn keys(&self) -> StoreKeys {
        StoreKeys::default()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

pub fn slot_manager() -> (JobSlotManager, Arc<InMemoryCoordinationStore>, Arc<MockClock>) {
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
