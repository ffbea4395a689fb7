//! In-memory optimistic store for one synchronization key.
//!
//! Holds both server-confirmed and locally-pending records for a single
//! logical collection and republishes the reconciled view on every change.
//! A store is constructed when its sync key activates and is torn down on
//! key change; the epoch check keeps a detached store from publishing over
//! its successor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::models::{Record, RecordId, ServerId, TempId};
use crate::reconcile::reconciled;

/// Ordered collection of records, unique by id.
///
/// Every operation takes one lock acquisition, so a rebind is atomic with
/// respect to concurrent snapshot application: no reader ever observes both
/// a temp-id and a server-id copy of the same logical record, nor neither.
#[derive(Debug)]
pub struct OptimisticStore {
    entries: Mutex<Vec<Record>>,
    epoch: u64,
    live_epoch: Arc<AtomicU64>,
    view_tx: Arc<watch::Sender<Vec<Record>>>,
}

impl OptimisticStore {
    /// Create an empty store bound to the given epoch and view channel.
    #[must_use]
    pub fn new(
        epoch: u64,
        live_epoch: Arc<AtomicU64>,
        view_tx: Arc<watch::Sender<Vec<Record>>>,
    ) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            epoch,
            live_epoch,
            view_tx,
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Record>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether this store still belongs to the active sync key.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live_epoch.load(Ordering::SeqCst) == self.epoch
    }

    /// The reconciled list the UI observes.
    #[must_use]
    pub fn view(&self) -> Vec<Record> {
        reconciled(&self.entries())
    }

    /// Look up a record by id.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.entries().iter().find(|record| &record.id == id).cloned()
    }

    /// Insert or replace a record by id and republish the view.
    pub fn upsert(&self, record: Record) {
        let mut entries = self.entries();
        match entries.iter_mut().find(|entry| entry.id == record.id) {
            Some(entry) => *entry = record,
            None => entries.push(record),
        }
        self.publish_locked(&entries);
    }

    /// Delete a record by id, returning it for rollback paths.
    pub fn remove(&self, id: &RecordId) -> Option<Record> {
        let mut entries = self.entries();
        let position = entries.iter().position(|record| &record.id == id)?;
        let removed = entries.remove(position);
        self.publish_locked(&entries);
        Some(removed)
    }

    /// Apply an authoritative snapshot.
    ///
    /// Records still carrying a temp id are preserved untouched as an
    /// additive overlay; every confirmed record is replaced by the
    /// snapshot's contents in snapshot order.
    pub fn apply_snapshot(&self, records: Vec<Record>) {
        let mut entries = self.entries();
        entries.retain(Record::is_pending);
        for record in records {
            if record.is_pending() {
                tracing::warn!("Snapshot delivered a temp-id record; skipping {}", record.id);
                continue;
            }
            entries.push(record);
        }
        self.publish_locked(&entries);
    }

    /// Replace the record at `temp` with an identical record confirmed as
    /// `server`, atomically with respect to snapshot application.
    ///
    /// If a snapshot already delivered the confirmed record, the pending
    /// entry is dropped instead (explicit-rebind deduplication; records are
    /// never deduplicated by content). Returns `false` when no record holds
    /// the temp id anymore.
    pub fn rebind(&self, temp: &TempId, server: ServerId) -> bool {
        let mut entries = self.entries();
        let pending_id = RecordId::Pending(*temp);
        let Some(position) = entries.iter().position(|record| record.id == pending_id) else {
            return false;
        };

        let confirmed_id = RecordId::Confirmed(server);
        if entries.iter().any(|record| record.id == confirmed_id) {
            entries.remove(position);
        } else {
            let entry = &mut entries[position];
            entry.id = confirmed_id;
            entry.touch();
        }
        self.publish_locked(&entries);
        true
    }

    /// Republish the reconciled view, unless this store has been superseded
    /// by a sync key change.
    pub fn publish(&self) {
        let entries = self.entries();
        self.publish_locked(&entries);
    }

    fn publish_locked(&self, entries: &[Record]) {
        if self.is_live() {
            self.view_tx.send_replace(reconciled(entries));
        } else {
            tracing::debug!("Suppressing view publish from superseded store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map, Value};

    fn fields(name: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("name".to_string(), json!(name));
        map
    }

    fn test_store() -> (OptimisticStore, watch::Receiver<Vec<Record>>) {
        let (view_tx, view_rx) = watch::channel(Vec::new());
        let live = Arc::new(AtomicU64::new(1));
        (OptimisticStore::new(1, live, Arc::new(view_tx)), view_rx)
    }

    fn confirmed(raw: &str, name: &str) -> Record {
        Record::confirmed(ServerId::new(raw).unwrap(), fields(name))
    }

    #[test]
    fn upsert_replaces_by_id() {
        let (store, _rx) = test_store();
        let record = confirmed("p_1", "Aziz");
        store.upsert(record.clone());

        let mut edited = record;
        edited.fields = fields("Aziz Z.");
        store.upsert(edited);

        let view = store.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].fields["name"], json!("Aziz Z."));
    }

    #[test]
    fn snapshot_merge_is_idempotent() {
        let (store, _rx) = test_store();
        let snapshot = vec![confirmed("p_1", "Aziz"), confirmed("p_2", "Lena")];

        store.apply_snapshot(snapshot.clone());
        let once = store.view();
        store.apply_snapshot(snapshot);
        assert_eq!(store.view(), once);
    }

    #[test]
    fn snapshot_preserves_temp_id_overlay() {
        let (store, _rx) = test_store();
        let pending = Record::pending(TempId::new(), fields("Draft"));
        store.upsert(pending.clone());

        store.apply_snapshot(vec![confirmed("p_1", "Aziz")]);
        store.apply_snapshot(vec![]);

        let view = store.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0], pending);
    }

    #[test]
    fn snapshot_replaces_confirmed_entries_in_snapshot_order() {
        let (store, _rx) = test_store();
        store.apply_snapshot(vec![confirmed("p_1", "Aziz")]);
        store.apply_snapshot(vec![confirmed("p_2", "Lena"), confirmed("p_1", "Aziz")]);

        let ids: Vec<String> = store.view().iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["p_2", "p_1"]);
    }

    #[test]
    fn rebind_swaps_id_and_keeps_fields() {
        let (store, _rx) = test_store();
        let temp = TempId::new();
        store.upsert(Record::pending(temp, fields("Aziz")));

        assert!(store.rebind(&temp, ServerId::new("p_1").unwrap()));

        let view = store.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id.to_string(), "p_1");
        assert_eq!(view[0].fields["name"], json!("Aziz"));
        assert!(store.get(&RecordId::Pending(temp)).is_none());
    }

    #[test]
    fn rebind_drops_pending_when_snapshot_already_delivered_it() {
        let (store, _rx) = test_store();
        let temp = TempId::new();
        store.upsert(Record::pending(temp, fields("Aziz")));
        store.apply_snapshot(vec![confirmed("p_1", "Aziz")]);

        assert!(store.rebind(&temp, ServerId::new("p_1").unwrap()));

        let view = store.view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id.to_string(), "p_1");
    }

    #[test]
    fn rebind_is_a_noop_when_record_was_removed() {
        let (store, _rx) = test_store();
        let temp = TempId::new();
        store.upsert(Record::pending(temp, fields("Aziz")));
        store.remove(&RecordId::Pending(temp));

        assert!(!store.rebind(&temp, ServerId::new("p_1").unwrap()));
        assert!(store.view().is_empty());
    }

    #[test]
    fn publishes_view_on_every_change() {
        let (store, rx) = test_store();
        store.upsert(confirmed("p_1", "Aziz"));
        assert_eq!(rx.borrow().len(), 1);

        let id: RecordId = "p_1".parse().unwrap();
        store.remove(&id);
        assert!(rx.borrow().is_empty());
    }

    #[test]
    fn superseded_store_stops_publishing() {
        let (view_tx, rx) = watch::channel(Vec::new());
        let live = Arc::new(AtomicU64::new(1));
        let store = OptimisticStore::new(1, live.clone(), Arc::new(view_tx));

        store.upsert(confirmed("p_1", "Aziz"));
        assert_eq!(rx.borrow().len(), 1);

        live.store(2, Ordering::SeqCst);
        store.upsert(confirmed("p_2", "Lena"));
        assert_eq!(rx.borrow().len(), 1);
    }
}
