//! # Best-Effort Sink
//!
//! Fire-and-forget persistence of observability writes (mirrored health
//! counters) to the coordination store. Callers hand commands to
//! [`BestEffortSink::offer`], which never blocks and never fails. The queue is
//! bounded; when full, the oldest queued command is evicted.
//!
//! Commands are written either by a background flusher
//! ([`BestEffortSink::spawn_flusher`]) or explicitly at the end of a short
//! invocation ([`BestEffortSink::flush`]). Write errors are logged and dropped.

use crate::store::{SharedStore, StoreCommand};
use crate::telemetry::metrics;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct BestEffortSink {
    queue: Arc<ArrayQueue<StoreCommand>>,
    notify: Arc<Notify>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl BestEffortSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity.max(1))),
            notify: Arc::new(Notify::new()),
            dropped: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue a write; evicts the oldest queued write when full
    pub fn offer(&self, command: StoreCommand) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Some(evicted) = self.queue.force_push(command) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::record_sink_drop();
            trace!(command = evicted.name(), key = evicted.key(), "Sink full, evicted oldest write");
        }
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Writes evicted since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Write everything queued in one pipeline. Returns the number of commands written.
    pub async fn flush(&self, store: &SharedStore) -> usize {
        let mut batch = Vec::with_capacity(self.queue.len());
        while let Some(command) = self.queue.pop() {
            batch.push(command);
        }
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        match store.pipeline(batch).await {
            Ok(_) => {
                trace!(commands = count, "Flushed best-effort writes");
                count
            }
            Err(error) => {
                debug!(
                    commands = count,
                    error = %error,
                    "Best-effort writes lost"
                );
                0
            }
        }
    }

    /// Flush in the background whenever new writes arrive, until [`close`](Self::close)
    pub fn spawn_flusher(&self, store: SharedStore) -> JoinHandle<()> {
        let sink = self.clone();
        tokio::spawn(async move {
            loop {
                sink.notify.notified().await;
                sink.flush(&store).await;
                if sink.closed.load(Ordering::Acquire) {
                    break;
                }
            }
        })
    }

    /// Stop accepting writes and wake the flusher for a final pass
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::store::{CoordinationStore, InMemoryCoordinationStore, StoreReply};
    use std::time::Duration;

    #[test]
    fn test_full_queue_drops_oldest() {
        let sink = BestEffortSink::new(2);
        sink.offer(StoreCommand::incr("a"));
        sink.offer(StoreCommand::incr("b"));
        sink.offer(StoreCommand::incr("c"));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.dropped(), 1);
    }

    #[tokio::test]
    async fn test_flush_writes_queued_commands() {
        let memory = Arc::new(InMemoryCoordinationStore::new(MockClock::shared()));
        let store: SharedStore = memory.clone();
        let sink = BestEffortSink::new(8);
        sink.offer(StoreCommand::incr("requests"));
        sink.offer(StoreCommand::incr("requests"));

        assert_eq!(sink.flush(&store).await, 2);
        assert!(sink.is_empty());
        assert_eq!(
            memory.execute(StoreCommand::get("requests")).await.unwrap(),
            StoreReply::Text("2".into())
        );
    }

    #[tokio::test]
    async fn test_flush_swallows_store_errors() {
        let memory = Arc::new(InMemoryCoordinationStore::new(MockClock::shared()));
        memory.set_unavailable(true);
        let store: SharedStore = memory.clone();
        let sink = BestEffortSink::new(8);
        sink.offer(StoreCommand::incr("requests"));

        assert_eq!(sink.flush(&store).await, 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_background_flusher_drains_and_stops() {
        let memory = Arc::new(InMemoryCoordinationStore::new(MockClock::shared()));
        let store: SharedStore = memory.clone();
        let sink = BestEffortSink::new(8);
        let handle = sink.spawn_flusher(store);

        sink.offer(StoreCommand::incr("requests"));
        for _ in 0..50 {
            if sink.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sink.close();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            memory.execute(StoreCommand::get("requests")).await.unwrap(),
            StoreReply::Text("1".into())
        );
    }
}
