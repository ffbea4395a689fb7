//! Pending preview references for assets that have not been uploaded yet.
//!
//! The cache maps a binding key (record id plus a purpose tag, e.g.
//! `"p_1_profile"`) to a locally-generated preview reference. Entries are
//! re-keyed when their record's id is rebound and discarded once the
//! authoritative URL lands on the record itself.

use std::collections::HashMap;

use crate::models::RecordId;

/// Build the binding key for a record id and purpose tag.
#[must_use]
pub fn binding_key(id: &RecordId, purpose: &str) -> String {
    format!("{id}_{purpose}")
}

/// In-memory map of pending preview references.
#[derive(Debug, Default)]
pub struct PreviewCache {
    entries: HashMap<String, String>,
}

impl PreviewCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a preview reference for a record id and purpose tag.
    pub fn insert(&mut self, id: &RecordId, purpose: &str, reference: impl Into<String>) {
        self.entries.insert(binding_key(id, purpose), reference.into());
    }

    /// Look up the preview reference for a record id and purpose tag.
    #[must_use]
    pub fn get(&self, id: &RecordId, purpose: &str) -> Option<&str> {
        self.entries.get(&binding_key(id, purpose)).map(String::as_str)
    }

    /// Drop the preview for a record id and purpose tag.
    pub fn discard(&mut self, id: &RecordId, purpose: &str) -> Option<String> {
        self.entries.remove(&binding_key(id, purpose))
    }

    /// Drop every preview bound to the given record id.
    pub fn discard_record(&mut self, id: &RecordId) {
        let prefix = format!("{id}_");
        self.entries.retain(|key, _| !key.starts_with(&prefix));
    }

    /// Move every preview bound to `old` under `new`, preserving purposes.
    ///
    /// Called when a record's temp id is rebound to its server id.
    pub fn rekey(&mut self, old: &RecordId, new: &RecordId) {
        let old_prefix = format!("{old}_");
        let moved: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(&old_prefix))
            .map(|(key, reference)| (key.clone(), reference.clone()))
            .collect();

        for (key, reference) in moved {
            self.entries.remove(&key);
            let purpose = &key[old_prefix.len()..];
            self.entries.insert(format!("{new}_{purpose}"), reference);
        }
    }

    /// Number of live preview references.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no preview references.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
