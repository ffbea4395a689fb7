//! Collaborator seams: the remote persistence store and the notification
//! sink.
//!
//! The engine never talks to a wire protocol directly; both collaborators
//! are consumed as black boxes behind these traits.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Record, ServerId, SyncKey};

/// One delivery on an active snapshot subscription.
#[derive(Debug)]
pub enum SnapshotEvent {
    /// Full authoritative state of the collection.
    Snapshot(Vec<Record>),
    /// The push channel reported a delivery error.
    Error(Error),
}

/// Handle to an active push subscription.
///
/// Deliveries arrive in order on `events`; dropping the feed unsubscribes.
#[derive(Debug)]
pub struct SnapshotFeed {
    /// Ordered deliveries from the remote store.
    pub events: mpsc::Receiver<SnapshotEvent>,
}

/// The remote persistence store, consumed as a black box.
///
/// Mutation calls are not cancellable once issued; the engine always awaits
/// them to completion.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Open the push subscription for one synchronization key.
    async fn subscribe(&self, key: &SyncKey) -> Result<SnapshotFeed>;

    /// Persist a new record; returns the server-assigned id.
    async fn create(&self, fields: &Value) -> Result<ServerId>;

    /// Persist changed fields for an existing record.
    async fn update(&self, id: &ServerId, payload: &Value) -> Result<()>;

    /// Delete a record.
    async fn delete(&self, id: &ServerId) -> Result<()>;

    /// Upload asset bytes; returns the authoritative URL.
    async fn upload_asset(&self, bytes: &[u8], object_key: &str) -> Result<String>;
}

/// Fire-and-forget user notification sink.
pub trait Notifier: Send + Sync {
    /// Surface a success notice.
    fn notify_success(&self, title: &str, message: &str);

    /// Surface an error notice.
    fn notify_error(&self, title: &str, message: &str);
}

/// Notifier that routes notices to the tracing log.
///
/// Useful as a default for headless hosts and tests that do not assert on
/// notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_success(&self, title: &str, message: &str) {
        tracing::info!("{title}: {message}");
    }

    fn notify_error(&self, title: &str, message: &str) {
        tracing::error!("{title}: {message}");
    }
}

/// Build a deterministic object key namespace for a record asset.
pub fn asset_object_key(record_id: &ServerId, file_name: &str) -> Result<String> {
    let normalized_record_id = sanitize_token(record_id.as_str());
    if normalized_record_id.is_empty() {
        return Err(Error::InvalidInput(
            "Asset record id cannot be empty".to_string(),
        ));
    }

    let normalized_file_name = sanitize_file_name(file_name);
    let ts = chrono::Utc::now().timestamp_millis();
    let id = Uuid::now_v7();

    Ok(format!(
        "records/{normalized_record_id}/{ts}-{id}-{normalized_file_name}"
    ))
}

fn sanitize_file_name(file_name: &str) -> String {
    let trimmed = file_name.trim().trim_matches('/');
    if trimmed.is_empty() {
        return "file".to_string();
    }

    let (stem, ext) = trimmed
        .rsplit_once('.')
        .map_or((trimmed, ""), |parts| parts);
    let stem = sanitize_token(stem);
    let stem = if stem.is_empty() {
        "file".to_string()
    } else {
        stem
    };
    let ext = sanitize_token(ext);

    if ext.is_empty() {
        stem
    } else {
        format!("{stem}.{ext}")
    }
}

fn sanitize_token(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = false;

    for ch in input.chars().flat_map(char::to_lowercase) {
        let keep = ch.is_ascii_alphanumeric();
        if keep {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }

    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_object_key_normalizes_id_and_filename() {
        let id = ServerId::new("REC::123").unwrap();
        let key = asset_object_key(&id, "My Photo (1).PNG").unwrap();

        assert!(key.starts_with("records/rec-123/"));
        assert!(key.ends_with("-my-photo-1.png"));
    }

    #[test]
    fn asset_object_key_rejects_unusable_record_id() {
        let id = ServerId::new("::::").unwrap();
        assert!(asset_object_key(&id, "photo.png").is_err());
    }

    #[test]
    fn sanitize_file_name_falls_back_for_empty_input() {
        assert_eq!(sanitize_file_name("  "), "file");
        assert_eq!(sanitize_file_name("...png"), "file.png");
        assert_eq!(sanitize_file_name("scan.pdf"), "scan.pdf");
    }

    #[test]
    fn log_notifier_is_fire_and_forget() {
        let notifier = LogNotifier;
        notifier.notify_success("Saved", "record saved");
        notifier.notify_error("Save failed", "record rejected");
    }
}
