//! Shared sync lifecycle state.

/// Observable state of the snapshot subscription for the active sync key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// No sync key is active; nothing is subscribed.
    Offline,
    /// Subscribed, waiting for the first authoritative snapshot.
    Syncing,
    /// At least one snapshot has been applied; the view is live.
    Synced,
    /// The push channel reported an error; last-known data stays visible.
    Error,
}

impl SyncState {
    /// Whether the UI should show a loading indicator.
    #[must_use]
    pub const fn is_loading(self) -> bool {
        matches!(self, Self::Syncing)
    }
}
