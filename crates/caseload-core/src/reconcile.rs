//! View derivation over the optimistic store.

use crate::models::Record;

/// Derive the list the UI observes from the store's entries.
///
/// Pending records come first in insertion order, followed by confirmed
/// records in snapshot order. O(n), no I/O; cheap enough to re-run on every
/// mutation and every snapshot tick. Id uniqueness is the store's invariant
/// and is not re-checked here.
#[must_use]
pub fn reconciled(entries: &[Record]) -> Vec<Record> {
    let mut view = Vec::with_capacity(entries.len());
    view.extend(entries.iter().filter(|r| r.is_pending()).cloned());
    view.extend(entries.iter().filter(|r| !r.is_pending()).cloned());
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Record, ServerId, TempId};
    use serde_json::Map;

    fn pending_record() -> Record {
        Record::pending(TempId::new(), Map::new())
    }

    fn confirmed_record(raw: &str) -> Record {
        Record::confirmed(ServerId::new(raw).unwrap(), Map::new())
    }

    #[test]
    fn pending_overlay_comes_first() {
        let entries = vec![
            confirmed_record("p_1"),
            pending_record(),
            confirmed_record("p_2"),
            pending_record(),
        ];

        let view = reconciled(&entries);
        assert!(view[0].is_pending());
        assert!(view[1].is_pending());
        assert_eq!(view[2].id, entries[0].id);
        assert_eq!(view[3].id, entries[2].id);
    }

    #[test]
    fn relative_order_is_preserved_within_each_group() {
        let first = pending_record();
        let second = pending_record();
        let entries = vec![first.clone(), confirmed_record("p_1"), second.clone()];

        let view = reconciled(&entries);
        assert_eq!(view[0].id, first.id);
        assert_eq!(view[1].id, second.id);
    }

    #[test]
    fn empty_store_yields_empty_view() {
        assert!(reconciled(&[]).is_empty());
    }
}
