//! Caseload service: optimistic mutation pipelines over the per-key store.
//!
//! Every mutation applies its optimistic change before returning and issues
//! the remote call on a spawned task, so callers never wait on the network.
//! Confirmation tasks always run to completion, but one whose sync key has
//! been superseded is a guaranteed no-op.

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::backend::{asset_object_key, Notifier, RecordBackend};
use crate::config::{FailurePolicy, Policies, SuccessNotice};
use crate::error::{Error, Result};
use crate::models::{
    Attachment, AttachmentId, AttachmentSource, Record, RecordId, ServerId, SyncKey, TempId,
};
use crate::preview::PreviewCache;
use crate::state::SyncState;
use crate::store::OptimisticStore;
use crate::subscription::SubscriptionManager;

/// An image uploaded alongside a record mutation, written into one of the
/// record's primary fields once the authoritative URL is known.
#[derive(Debug, Clone)]
pub struct ImageChange {
    /// Field the URL is written into (also the preview purpose tag).
    pub field: String,
    /// Original file name.
    pub file_name: String,
    /// Raw image bytes.
    pub bytes: Vec<u8>,
}

/// Handle to a mutation whose optimistic change is already applied.
///
/// The remote confirmation runs on a spawned task; `settled` awaits it.
#[derive(Debug)]
pub struct MutationHandle {
    record_id: RecordId,
    task: JoinHandle<()>,
}

impl MutationHandle {
    /// The id the optimistic change was applied under.
    #[must_use]
    pub const fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    /// Wait until the remote confirmation has run to completion.
    pub async fn settled(self) {
        let _ = self.task.await;
    }
}

/// Thread-safe engine facade owning the subscription, store, and pipelines.
#[derive(Clone)]
pub struct CaseloadService {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn RecordBackend>,
    notifier: Arc<dyn Notifier>,
    policies: Policies,
    subscriptions: Mutex<SubscriptionManager>,
    previews: StdMutex<PreviewCache>,
    view_tx: Arc<watch::Sender<Vec<Record>>>,
    state_tx: Arc<watch::Sender<SyncState>>,
}

impl Inner {
    fn previews(&self) -> MutexGuard<'_, PreviewCache> {
        self.previews.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CaseloadService {
    /// Create a service with the default mutation policies.
    #[must_use]
    pub fn new(backend: Arc<dyn RecordBackend>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_policies(backend, notifier, Policies::default())
    }

    /// Create a service with explicit mutation policies.
    #[must_use]
    pub fn with_policies(
        backend: Arc<dyn RecordBackend>,
        notifier: Arc<dyn Notifier>,
        policies: Policies,
    ) -> Self {
        let (view_tx, _) = watch::channel(Vec::new());
        let (state_tx, _) = watch::channel(SyncState::Offline);
        let view_tx = Arc::new(view_tx);
        let state_tx = Arc::new(state_tx);
        let subscriptions = SubscriptionManager::new(
            Arc::clone(&backend),
            Arc::clone(&view_tx),
            Arc::clone(&state_tx),
            Arc::new(AtomicU64::new(0)),
        );

        Self {
            inner: Arc::new(Inner {
                backend,
                notifier,
                policies,
                subscriptions: Mutex::new(subscriptions),
                previews: StdMutex::new(PreviewCache::new()),
                view_tx,
                state_tx,
            }),
        }
    }

    /// Switch the active synchronization key (e.g. on account change).
    pub async fn set_key(&self, key: Option<SyncKey>) -> Result<()> {
        self.inner.subscriptions.lock().await.set_key(key).await
    }

    /// The reconciled list the UI observes right now.
    #[must_use]
    pub fn view(&self) -> Vec<Record> {
        self.inner.view_tx.borrow().clone()
    }

    /// Watch the reconciled list; re-emits on every store change.
    #[must_use]
    pub fn watch_view(&self) -> watch::Receiver<Vec<Record>> {
        self.inner.view_tx.subscribe()
    }

    /// Current sync lifecycle state.
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        *self.inner.state_tx.borrow()
    }

    /// Watch the sync lifecycle state.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state_tx.subscribe()
    }

    /// Look up the pending preview reference for a record id and purpose.
    #[must_use]
    pub fn preview_reference(&self, id: &RecordId, purpose: &str) -> Option<String> {
        self.inner.previews().get(id, purpose).map(ToString::to_string)
    }

    async fn active_store(&self) -> Result<Arc<OptimisticStore>> {
        self.inner
            .subscriptions
            .lock()
            .await
            .active_store()
            .ok_or_else(|| Error::InvalidInput("No active sync key".to_string()))
    }

    /// Create a record optimistically and confirm it in the background.
    pub async fn create(&self, fields: Value) -> Result<MutationHandle> {
        self.create_inner(fields, None).await
    }

    /// Create a record with a primary image; the image is previewed
    /// immediately and uploaded once the create confirms.
    pub async fn create_with_image(
        &self,
        fields: Value,
        image: ImageChange,
    ) -> Result<MutationHandle> {
        validate_image(&image)?;
        self.create_inner(fields, Some(image)).await
    }

    async fn create_inner(
        &self,
        fields: Value,
        image: Option<ImageChange>,
    ) -> Result<MutationHandle> {
        let fields = normalize_fields(fields)?;
        let store = self.active_store().await?;

        let temp = TempId::new();
        let record = Record::pending(temp, fields);
        // The temp id never leaves this client; the payload carries fields only.
        let payload = record.remote_payload();
        store.upsert(record);

        let pending_id = RecordId::Pending(temp);
        if let Some(image) = &image {
            let reference = format!("preview://{pending_id}/{}", image.field);
            self.inner
                .previews()
                .insert(&pending_id, &image.field, reference);
        }

        let policy = self.inner.policies.create;
        if policy.notice == SuccessNotice::Immediate {
            self.inner.notifier.notify_success("Saved", "Record saved.");
        }

        let inner = Arc::clone(&self.inner);
        let task_store = Arc::clone(&store);
        let task = tokio::spawn(async move {
            match inner.backend.create(&payload).await {
                Ok(server_id) => {
                    if !task_store.is_live() {
                        tracing::debug!("Create confirmed after key change; ignoring {pending_id}");
                        return;
                    }
                    if task_store.rebind(&temp, server_id.clone()) {
                        let confirmed_id = RecordId::Confirmed(server_id.clone());
                        inner.previews().rekey(&pending_id, &confirmed_id);
                        if policy.notice == SuccessNotice::Deferred {
                            inner.notifier.notify_success("Saved", "Record saved.");
                        }
                        if let Some(image) = image {
                            apply_primary_image(&inner, &task_store, &confirmed_id, image).await;
                        }
                    } else {
                        tracing::debug!("Record {pending_id} was removed before confirmation");
                    }
                }
                Err(error) => {
                    if !task_store.is_live() {
                        tracing::debug!("Create failed after key change; ignoring {pending_id}");
                        return;
                    }
                    tracing::warn!("Create failed for {pending_id}: {error}");
                    if policy.failure == FailurePolicy::Revert {
                        task_store.remove(&pending_id);
                        inner.previews().discard_record(&pending_id);
                    }
                    inner
                        .notifier
                        .notify_error("Save failed", &error.to_string());
                }
            }
        });

        Ok(MutationHandle {
            record_id: RecordId::Pending(temp),
            task,
        })
    }

    /// Update a confirmed record optimistically.
    pub async fn update(&self, id: &RecordId, fields: Value) -> Result<MutationHandle> {
        self.update_inner(id, fields, None).await
    }

    /// Update a confirmed record and replace one of its primary images.
    ///
    /// The record save and the image upload are independent failure
    /// domains; a broken upload never blocks or reverses the field save.
    pub async fn update_with_image(
        &self,
        id: &RecordId,
        fields: Value,
        image: ImageChange,
    ) -> Result<MutationHandle> {
        validate_image(&image)?;
        self.update_inner(id, fields, Some(image)).await
    }

    async fn update_inner(
        &self,
        id: &RecordId,
        fields: Value,
        image: Option<ImageChange>,
    ) -> Result<MutationHandle> {
        let fields = normalize_fields(fields)?;
        let store = self.active_store().await?;
        let Some(server_id) = id.as_server_id().cloned() else {
            return Err(Error::InvalidInput(format!(
                "Record {id} has not been confirmed by the remote store yet"
            )));
        };
        let previous = store
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let mut record = previous.clone();
        record.fields = fields;
        record.touch();
        let payload = record.remote_payload();
        store.upsert(record);

        if let Some(image) = &image {
            let reference = format!("preview://{id}/{}", image.field);
            self.inner.previews().insert(id, &image.field, reference);
        }

        let policy = self.inner.policies.update;
        if policy.notice == SuccessNotice::Immediate {
            self.inner
                .notifier
                .notify_success("Saved", "Changes saved.");
        }

        let inner = Arc::clone(&self.inner);
        let task_store = Arc::clone(&store);
        let record_id = id.clone();
        let task = tokio::spawn(async move {
            match inner.backend.update(&server_id, &payload).await {
                Ok(()) => {
                    if !task_store.is_live() {
                        return;
                    }
                    if policy.notice == SuccessNotice::Deferred {
                        inner
                            .notifier
                            .notify_success("Saved", "Changes saved.");
                    }
                    if let Some(image) = image {
                        apply_primary_image(&inner, &task_store, &record_id, image).await;
                    }
                }
                Err(error) => {
                    if !task_store.is_live() {
                        tracing::debug!("Update failed after key change; ignoring {record_id}");
                        return;
                    }
                    tracing::warn!("Update failed for {record_id}: {error}");
                    if policy.failure == FailurePolicy::Revert {
                        task_store.upsert(previous);
                    }
                    inner
                        .notifier
                        .notify_error("Save failed", &error.to_string());
                }
            }
        });

        Ok(MutationHandle {
            record_id: id.clone(),
            task,
        })
    }

    /// Delete a record optimistically.
    ///
    /// With the default policy a failed remote delete is surfaced but not
    /// re-inserted; the next snapshot corrects the view if the delete did
    /// not land server-side.
    pub async fn delete(&self, id: &RecordId) -> Result<MutationHandle> {
        let store = self.active_store().await?;
        let removed = store
            .remove(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        self.inner.previews().discard_record(id);

        let policy = self.inner.policies.delete;
        if policy.notice == SuccessNotice::Immediate {
            self.inner
                .notifier
                .notify_success("Deleted", "Record deleted.");
        }

        let Some(server_id) = id.as_server_id().cloned() else {
            // Never persisted; there is nothing to delete remotely. If an
            // in-flight create still confirms, the rebind finds nothing and
            // the next snapshot is authoritative.
            tracing::debug!("Deleted unconfirmed record {id} locally");
            return Ok(MutationHandle {
                record_id: id.clone(),
                task: tokio::spawn(async {}),
            });
        };

        let inner = Arc::clone(&self.inner);
        let task_store = Arc::clone(&store);
        let record_id = id.clone();
        let task = tokio::spawn(async move {
            match inner.backend.delete(&server_id).await {
                Ok(()) => {
                    if task_store.is_live() && policy.notice == SuccessNotice::Deferred {
                        inner
                            .notifier
                            .notify_success("Deleted", "Record deleted.");
                    }
                }
                Err(error) => {
                    if !task_store.is_live() {
                        tracing::debug!("Delete failed after key change; ignoring {record_id}");
                        return;
                    }
                    tracing::warn!("Delete failed for {record_id}: {error}");
                    if policy.failure == FailurePolicy::Revert {
                        task_store.upsert(removed);
                    }
                    inner
                        .notifier
                        .notify_error("Delete failed", &error.to_string());
                }
            }
        });

        Ok(MutationHandle {
            record_id: id.clone(),
            task,
        })
    }

    /// Attach an asset to a confirmed record.
    ///
    /// The attachment appears immediately with a local preview reference;
    /// the asset uploads in the background. If the upload fails the
    /// attachment is compensated away again: a permanently-broken local
    /// reference is strictly worse than no attachment.
    pub async fn add_attachment(
        &self,
        id: &RecordId,
        label: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<MutationHandle> {
        let store = self.active_store().await?;
        let Some(server_id) = id.as_server_id().cloned() else {
            return Err(Error::InvalidInput(format!(
                "Cannot attach to {id}: record has not been confirmed yet"
            )));
        };
        let mut record = store
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let attachment = Attachment::with_preview(label, file_name)?;
        let purpose = attachment.id.as_str();
        if let Some(reference) = attachment.preview_reference() {
            self.inner.previews().insert(id, &purpose, reference);
        }
        record.attachments.push(attachment.clone());
        record.touch();
        store.upsert(record);

        let inner = Arc::clone(&self.inner);
        let task_store = Arc::clone(&store);
        let record_id = id.clone();
        let task = tokio::spawn(async move {
            let uploaded = match asset_object_key(&server_id, &attachment.file_name) {
                Ok(object_key) => inner.backend.upload_asset(&bytes, &object_key).await,
                Err(error) => Err(error),
            };

            match uploaded {
                Ok(url) => {
                    if !task_store.is_live() {
                        return;
                    }
                    let Some(mut record) = task_store.get(&record_id) else {
                        tracing::debug!("Record {record_id} removed while uploading attachment");
                        return;
                    };
                    if let Some(entry) = record
                        .attachments
                        .iter_mut()
                        .find(|entry| entry.id == attachment.id)
                    {
                        entry.source = AttachmentSource::Remote(url);
                    }
                    record.touch();
                    let payload = record.remote_payload();
                    task_store.upsert(record);
                    inner.previews().discard(&record_id, &purpose);

                    match inner.backend.update(&server_id, &payload).await {
                        Ok(()) => inner
                            .notifier
                            .notify_success("Attachment added", &attachment.label),
                        Err(error) => {
                            tracing::warn!(
                                "Failed to persist attachment list for {record_id}: {error}"
                            );
                            inner
                                .notifier
                                .notify_error("Attachment failed", &error.to_string());
                        }
                    }
                }
                Err(error) => {
                    if !task_store.is_live() {
                        return;
                    }
                    tracing::warn!("Attachment upload failed for {record_id}: {error}");
                    if let Some(mut record) = task_store.get(&record_id) {
                        record.attachments.retain(|entry| entry.id != attachment.id);
                        record.touch();
                        task_store.upsert(record);
                    }
                    inner.previews().discard(&record_id, &purpose);
                    inner
                        .notifier
                        .notify_error("Attachment failed", &error.to_string());
                }
            }
        });

        Ok(MutationHandle {
            record_id: id.clone(),
            task,
        })
    }

    /// Remove an attachment optimistically and persist the updated list.
    pub async fn remove_attachment(
        &self,
        id: &RecordId,
        attachment_id: &AttachmentId,
    ) -> Result<MutationHandle> {
        let store = self.active_store().await?;
        let Some(server_id) = id.as_server_id().cloned() else {
            return Err(Error::InvalidInput(format!(
                "Cannot detach from {id}: record has not been confirmed yet"
            )));
        };
        let mut record = store
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if !record
            .attachments
            .iter()
            .any(|entry| &entry.id == attachment_id)
        {
            return Err(Error::NotFound(format!(
                "Attachment {attachment_id} on {id}"
            )));
        }

        record
            .attachments
            .retain(|entry| &entry.id != attachment_id);
        record.touch();
        let payload = record.remote_payload();
        store.upsert(record);
        self.inner.previews().discard(id, &attachment_id.as_str());

        let inner = Arc::clone(&self.inner);
        let task_store = Arc::clone(&store);
        let record_id = id.clone();
        let task = tokio::spawn(async move {
            if let Err(error) = inner.backend.update(&server_id, &payload).await {
                if !task_store.is_live() {
                    return;
                }
                tracing::warn!("Attachment removal failed for {record_id}: {error}");
                inner
                    .notifier
                    .notify_error("Attachment failed", &error.to_string());
            }
        });

        Ok(MutationHandle {
            record_id: id.clone(),
            task,
        })
    }
}

/// Upload a primary-field image and write its URL into the record.
///
/// Failures are logged only; the primary save already stands and one broken
/// upload must never reverse it.
async fn apply_primary_image(
    inner: &Arc<Inner>,
    store: &Arc<OptimisticStore>,
    id: &RecordId,
    image: ImageChange,
) {
    let Some(server_id) = id.as_server_id().cloned() else {
        return;
    };
    let object_key = match asset_object_key(&server_id, &image.file_name) {
        Ok(object_key) => object_key,
        Err(error) => {
            tracing::warn!("Skipping image upload for {id}: {error}");
            return;
        }
    };

    match inner.backend.upload_asset(&image.bytes, &object_key).await {
        Ok(url) => {
            if !store.is_live() {
                return;
            }
            let Some(mut record) = store.get(id) else {
                tracing::debug!("Record {id} removed while uploading image");
                return;
            };
            record.fields.insert(image.field.clone(), Value::String(url));
            record.touch();
            let payload = record.remote_payload();
            store.upsert(record);
            inner.previews().discard(id, &image.field);

            if let Err(error) = inner.backend.update(&server_id, &payload).await {
                tracing::warn!("Failed to persist image URL for {id}: {error}");
            }
        }
        Err(error) => {
            tracing::warn!("Image upload failed for {id}: {error}");
        }
    }
}

fn normalize_fields(fields: Value) -> Result<Map<String, Value>> {
    match fields {
        Value::Object(map) => Ok(map),
        _ => Err(Error::InvalidInput(
            "Record fields must be a JSON object".to_string(),
        )),
    }
}

fn validate_image(image: &ImageChange) -> Result<()> {
    if image.field.trim().is_empty() {
        return Err(Error::InvalidInput(
            "Image field name cannot be empty".to_string(),
        ));
    }
    Ok(())
}
