//! Invalidation fan-out.
//!
//! A broadcast snapshots the holders of a name, resolves each to its live
//! handle and enqueues one delivery per client on a bounded queue. A fixed
//! pool of worker tasks drains the queue. Neither side waits: a full
//! notification queue drops the delivery, and so does a full connection
//! queue. Each delivery is attempted at most once and its failure is logged
//! and discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cbfs_config::{log_notify_debug, log_notify_warn};
use flume::TrySendError;
use tokio::task::JoinHandle;

use crate::cache_index::CacheIndex;
use crate::registry::{ClientHandle, ClientRegistry, DeliveryError};
use crate::store::Invalidate;

struct Delivery {
    handle: Arc<ClientHandle>,
    name: Arc<str>,
}

/// Running counters, for logs and tests
#[derive(Debug, Default)]
pub struct BroadcastStats {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub delivered: u64,
    /// Holder unregistered or inactive
    pub skipped: u64,
    pub failed: u64,
    /// Queue full or closed
    pub dropped: u64,
}

impl BroadcastStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct InvalidationBroadcaster {
    registry: Arc<ClientRegistry>,
    index: Arc<CacheIndex>,
    tx: flume::Sender<Delivery>,
    stats: Arc<BroadcastStats>,
    workers: Vec<JoinHandle<()>>,
}

impl InvalidationBroadcaster {
    /// Spawn the worker pool. Must be called from within a Tokio runtime.
    pub fn start(
        registry: Arc<ClientRegistry>,
        index: Arc<CacheIndex>,
        workers: usize,
        queue: usize,
    ) -> Self {
        let (tx, rx) = flume::bounded(queue.max(1));
        let stats = Arc::new(BroadcastStats::default());

        let workers = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let stats = Arc::clone(&stats);
                tokio::spawn(run_worker(worker, rx, stats))
            })
            .collect();

        Self {
            registry,
            index,
            tx,
            stats,
            workers,
        }
    }

    /// Enqueue one invalidation per current holder of `name`.
    /// Returns the number of deliveries enqueued.
    pub fn broadcast_invalidate(&self, name: &str) -> usize {
        let holders = self.index.holders(name);
        if holders.is_empty() {
            return 0;
        }

        let shared: Arc<str> = Arc::from(name);
        let mut enqueued = 0;
        for client_id in &holders {
            let handle = match self.registry.lookup(client_id) {
                Ok(handle) if handle.is_active() => handle,
                _ => {
                    BroadcastStats::bump(&self.stats.skipped);
                    log_notify_debug!(
                        "Skipping departed client",
                        client_id = client_id.as_str(),
                        name = name
                    );
                    continue;
                }
            };

            let delivery = Delivery {
                handle,
                name: Arc::clone(&shared),
            };
            match self.tx.try_send(delivery) {
                Ok(()) => {
                    BroadcastStats::bump(&self.stats.enqueued);
                    enqueued += 1;
                }
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    BroadcastStats::bump(&self.stats.dropped);
                    log_notify_warn!(
                        "Notification queue unavailable, delivery dropped",
                        client_id = client_id.as_str(),
                        name = name
                    );
                }
            }
        }

        log_notify_debug!(
            "Invalidation broadcast",
            name = name,
            holders = holders.len(),
            enqueued = enqueued
        );
        enqueued
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Invalidate for InvalidationBroadcaster {
    fn invalidate(&self, name: &str) {
        self.broadcast_invalidate(name);
    }
}

impl Drop for InvalidationBroadcaster {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn run_worker(worker: usize, rx: flume::Receiver<Delivery>, stats: Arc<BroadcastStats>) {
    while let Ok(delivery) = rx.recv_async().await {
        let client_id = delivery.handle.id();
        match delivery.handle.deliver_invalidate(&delivery.name) {
            Ok(()) => {
                BroadcastStats::bump(&stats.delivered);
                log_notify_debug!(
                    "Invalidation delivered",
                    worker = worker,
                    client_id = client_id,
                    name = &*delivery.name
                );
            }
            Err(DeliveryError::Inactive) => {
                BroadcastStats::bump(&stats.skipped);
            }
            Err(e) => {
                BroadcastStats::bump(&stats.failed);
                let error = e.to_string();
                log_notify_warn!(
                    "Invalidation delivery failed",
                    client_id = client_id,
                    name = &*delivery.name,
                    error = error.as_str()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Callback, ConnectionId};
    use cbfs_ipc::{Notice, ServerFrame};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<ClientRegistry>,
        index: Arc<CacheIndex>,
        broadcaster: InvalidationBroadcaster,
    }

    fn fixture(workers: usize, queue: usize) -> Fixture {
        let registry = Arc::new(ClientRegistry::new());
        let index = Arc::new(CacheIndex::new());
        let broadcaster =
            InvalidationBroadcaster::start(Arc::clone(&registry), Arc::clone(&index), workers, queue);
        Fixture {
            registry,
            index,
            broadcaster,
        }
    }

    fn connect(f: &Fixture, id: &str, capacity: usize) -> mpsc::Receiver<ServerFrame> {
        let (tx, rx) = mpsc::channel(capacity);
        f.registry
            .register(id, Callback::new(ConnectionId::next(), tx))
            .unwrap();
        rx
    }

    async fn next_notice(rx: &mut mpsc::Receiver<ServerFrame>) -> Option<String> {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(ServerFrame::Notice(Notice::Invalidate { name }))) => Some(name),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_only_holders_are_notified() {
        let f = fixture(2, 16);
        let mut a = connect(&f, "a", 8);
        let mut b = connect(&f, "b", 8);
        f.index.record_cached("a", "f").unwrap();

        assert_eq!(f.broadcaster.broadcast_invalidate("f"), 1);
        assert_eq!(next_notice(&mut a).await.as_deref(), Some("f"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregistered_holder_is_skipped() {
        let f = fixture(1, 16);
        let _a = connect(&f, "a", 8);
        let mut b = connect(&f, "b", 8);
        f.index.record_cached("a", "f").unwrap();
        f.index.record_cached("b", "f").unwrap();
        f.registry.unregister("a").unwrap();

        assert_eq!(f.broadcaster.broadcast_invalidate("f"), 1);
        assert_eq!(next_notice(&mut b).await.as_deref(), Some("f"));
        assert_eq!(f.broadcaster.stats().skipped, 1);
    }

    #[tokio::test]
    async fn test_unregister_between_enqueue_and_delivery() {
        let f = fixture(1, 16);
        let mut a = connect(&f, "a", 8);
        f.index.record_cached("a", "f").unwrap();

        // Single-threaded runtime: the worker has not run yet
        assert_eq!(f.broadcaster.broadcast_invalidate("f"), 1);
        f.registry.unregister("a").unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(a.try_recv().is_err());
        let stats = f.broadcaster.stats();
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn test_one_failed_delivery_does_not_block_others() {
        let f = fixture(2, 16);
        let dead = connect(&f, "dead", 8);
        drop(dead);
        let mut live = connect(&f, "live", 8);
        f.index.record_cached("dead", "f").unwrap();
        f.index.record_cached("live", "f").unwrap();

        assert_eq!(f.broadcaster.broadcast_invalidate("f"), 2);
        assert_eq!(next_notice(&mut live).await.as_deref(), Some("f"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = f.broadcaster.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);
    }

    /// Register `id` on a connection queue of one that is already full
    /// and never drained
    fn connect_stalled(f: &Fixture, id: &str) -> mpsc::Receiver<ServerFrame> {
        let (tx, rx) = mpsc::channel(1);
        tx.try_send(ServerFrame::Notice(Notice::Invalidate {
            name: "filler".to_string(),
        }))
        .unwrap();
        f.registry
            .register(id, Callback::new(ConnectionId::next(), tx))
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let f = fixture(1, 1);
        let _slow = connect_stalled(&f, "slow");
        f.index.record_cached("slow", "f").unwrap();

        // The worker only runs once the test yields, so the queue of one
        // fills on the first broadcast.
        let started = std::time::Instant::now();
        for _ in 0..8 {
            f.broadcaster.broadcast_invalidate("f");
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(f.broadcaster.stats().dropped >= 1);
    }

    #[tokio::test]
    async fn test_stalled_holder_does_not_starve_live_holder() {
        let f = fixture(2, 64);
        let _slow = connect_stalled(&f, "a-slow");
        let mut live = connect(&f, "b-live", 64);
        for name in ["f", "g", "h"] {
            f.index.record_cached("a-slow", name).unwrap();
            f.index.record_cached("b-live", name).unwrap();
        }

        for name in ["f", "g", "h"] {
            assert_eq!(f.broadcaster.broadcast_invalidate(name), 2);
        }

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(next_notice(&mut live).await.unwrap());
        }
        received.sort();
        assert_eq!(received, vec!["f", "g", "h"]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = f.broadcaster.stats();
        assert_eq!(stats.enqueued, 6);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.failed, 3);
    }

    #[tokio::test]
    async fn test_no_holders_no_work() {
        let f = fixture(1, 4);
        assert_eq!(f.broadcaster.broadcast_invalidate("nobody"), 0);
        assert_eq!(f.broadcaster.stats(), StatsSnapshot::default());
        assert_eq!(f.broadcaster.worker_count(), 1);
    }
}
