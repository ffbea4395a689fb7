//! caseload-core - Core library for Caseload
//!
//! This crate keeps one account's record list consistent with a push-based
//! remote store while create/edit/delete actions take effect instantly:
//! optimistic store, snapshot reconciliation, subscription lifecycle, and
//! the mutation and attachment pipelines.

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod preview;
pub mod reconcile;
pub mod service;
pub mod state;
pub mod store;
pub mod subscription;

pub use backend::{Notifier, RecordBackend, SnapshotEvent, SnapshotFeed};
pub use error::{Error, Result};
pub use models::{Record, RecordId, ServerId, SyncKey, TempId};
pub use service::{CaseloadService, ImageChange, MutationHandle};
pub use state::SyncState;
