use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

use crate::net::{ConnectivityMonitor, Subscription};
use crate::state::store::CaptureStore;

/// Process-wide view of the queue for live badges. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStatus {
    pub is_online: bool,
    pub pending_count: usize,
    /// A sync pass is in flight
    pub syncing: bool,
    /// false once the local store failed to initialize (degraded mode)
    pub storage_available: bool,
    /// Bumped on every successful enqueue
    pub queue_revision: u64,
}

/// Publishes `SyncStatus` changes to any number of subscribers.
///
/// Subscribers are only woken when a field actually changes.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    tx: Arc<watch::Sender<SyncStatus>>,
}

impl StatusBoard {
    pub fn new(is_online: bool, storage_available: bool) -> Self {
        let (tx, _rx) = watch::channel(SyncStatus {
            is_online,
            storage_available,
            ..SyncStatus::default()
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> SyncStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    /// Mirror the monitor's state into the board for as long as the
    /// returned subscription lives
    pub fn follow(&self, monitor: &ConnectivityMonitor) -> Subscription {
        self.set_online(monitor.current());
        let board = self.clone();
        monitor.subscribe(move |online| board.set_online(online))
    }

    pub fn set_online(&self, is_online: bool) {
        self.update(|s| s.is_online = is_online);
    }

    pub fn set_syncing(&self, syncing: bool) {
        self.update(|s| s.syncing = syncing);
    }

    pub fn set_storage_available(&self, available: bool) {
        self.update(|s| s.storage_available = available);
    }

    pub fn set_pending(&self, pending_count: usize) {
        self.update(|s| s.pending_count = pending_count);
    }

    /// Record a new capture together with the fresh pending count
    pub fn record_enqueue(&self, pending_count: usize) {
        self.update(|s| {
            s.pending_count = pending_count;
            s.queue_revision = s.queue_revision.wrapping_add(1);
        });
    }

    /// Re-read the pending count from the store and publish it
    pub async fn refresh_pending(&self, store: &CaptureStore) -> usize {
        if !store.is_available() {
            self.set_pending(0);
            return 0;
        }

        match store.count_pending().await {
            Ok(count) => {
                self.set_pending(count);
                count
            }
            Err(e) => {
                warn!("Failed to count pending captures: {e}");
                self.current().pending_count
            }
        }
    }

    fn update(&self, f: impl FnOnce(&mut SyncStatus)) {
        self.tx.send_if_modified(|status| {
            let before = *status;
            f(status);
            *status != before
        });
    }
}
