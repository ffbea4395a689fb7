//! Snapshot subscription lifecycle.
//!
//! Owns exactly one active subscription per synchronization key. A key
//! change tears the old subscription down (pump aborted, epoch bumped)
//! before the new one is established, so a delivery from a superseded
//! subscription is a guaranteed no-op.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::{RecordBackend, SnapshotEvent, SnapshotFeed};
use crate::error::Result;
use crate::models::{Record, SyncKey};
use crate::state::SyncState;
use crate::store::OptimisticStore;

struct ActiveSync {
    key: SyncKey,
    store: Arc<OptimisticStore>,
    pump: JoinHandle<()>,
}

/// Manages the single active subscription and the per-key store.
pub struct SubscriptionManager {
    backend: Arc<dyn RecordBackend>,
    view_tx: Arc<watch::Sender<Vec<Record>>>,
    state_tx: Arc<watch::Sender<SyncState>>,
    live_epoch: Arc<AtomicU64>,
    active: Option<ActiveSync>,
}

impl SubscriptionManager {
    /// Create a manager with no active subscription.
    #[must_use]
    pub fn new(
        backend: Arc<dyn RecordBackend>,
        view_tx: Arc<watch::Sender<Vec<Record>>>,
        state_tx: Arc<watch::Sender<SyncState>>,
        live_epoch: Arc<AtomicU64>,
    ) -> Self {
        Self {
            backend,
            view_tx,
            state_tx,
            live_epoch,
            active: None,
        }
    }

    /// The currently active synchronization key, if any.
    #[must_use]
    pub fn active_key(&self) -> Option<&SyncKey> {
        self.active.as_ref().map(|active| &active.key)
    }

    /// The store owned by the active key, if any.
    #[must_use]
    pub fn active_store(&self) -> Option<Arc<OptimisticStore>> {
        self.active.as_ref().map(|active| Arc::clone(&active.store))
    }

    /// Switch the active synchronization key.
    ///
    /// Requesting the key that is already active is a no-op. Any other
    /// request tears the old subscription down first; `None` leaves the
    /// manager unsubscribed with an empty view.
    pub async fn set_key(&mut self, key: Option<SyncKey>) -> Result<()> {
        if self.active_key() == key.as_ref() {
            return Ok(());
        }

        self.teardown();

        let Some(key) = key else {
            self.view_tx.send_replace(Vec::new());
            self.state_tx.send_replace(SyncState::Offline);
            return Ok(());
        };

        let epoch = self.live_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let store = Arc::new(OptimisticStore::new(
            epoch,
            Arc::clone(&self.live_epoch),
            Arc::clone(&self.view_tx),
        ));
        store.publish();
        self.state_tx.send_replace(SyncState::Syncing);

        let feed = match self.backend.subscribe(&key).await {
            Ok(feed) => feed,
            Err(error) => {
                tracing::error!("Failed to subscribe for {key}: {error}");
                self.state_tx.send_replace(SyncState::Error);
                return Err(error);
            }
        };

        tracing::debug!("Subscribed for {key}");
        let pump = tokio::spawn(pump_deliveries(
            feed,
            Arc::clone(&store),
            Arc::clone(&self.state_tx),
            key.clone(),
        ));

        self.active = Some(ActiveSync { key, store, pump });
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::debug!("Unsubscribing from {}", active.key);
            active.pump.abort();
            // Invalidate the old epoch so in-flight deliveries and mutation
            // confirmations tied to the old key become no-ops.
            self.live_epoch.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Forward deliveries from one subscription into its store, in order.
///
/// The liveness check runs at delivery time: a delivery that raced a key
/// change is discarded. Delivery errors clear the loading state and keep
/// last-known-good data visible; the store is never cleared on error and
/// no retry happens here.
async fn pump_deliveries(
    mut feed: SnapshotFeed,
    store: Arc<OptimisticStore>,
    state_tx: Arc<watch::Sender<SyncState>>,
    key: SyncKey,
) {
    while let Some(event) = feed.events.recv().await {
        if !store.is_live() {
            tracing::debug!("Discarding delivery from superseded subscription for {key}");
            break;
        }
        match event {
            SnapshotEvent::Snapshot(records) => {
                tracing::debug!("Applying snapshot of {} records for {key}", records.len());
                store.apply_snapshot(records);
                state_tx.send_replace(SyncState::Synced);
            }
            SnapshotEvent::Error(error) => {
                tracing::error!("Snapshot delivery failed for {key}: {error}");
                state_tx.send_replace(SyncState::Error);
            }
        }
    }
}
