//! Attachment model

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for an attachment, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(Uuid);

impl AttachmentId {
    /// Create a new unique attachment ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for AttachmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AttachmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Where an attachment's bytes currently live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AttachmentSource {
    /// Locally-generated preview reference; not yet uploaded.
    Preview(String),
    /// Authoritative URL assigned after upload.
    Remote(String),
}

impl AttachmentSource {
    /// Whether the asset has been uploaded to the remote store.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Attachment metadata held on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Unique attachment identifier.
    pub id: AttachmentId,
    /// User-facing label (e.g. "profile", "intake form").
    pub label: String,
    /// Original file name.
    pub file_name: String,
    /// Current location of the asset bytes.
    pub source: AttachmentSource,
    /// Creation timestamp (Unix ms).
    pub created_at: i64,
}

impl Attachment {
    /// Create a new attachment metadata record.
    pub fn new(
        label: impl Into<String>,
        file_name: impl Into<String>,
        source: AttachmentSource,
    ) -> Result<Self> {
        let label = label.into().trim().to_string();
        let file_name = file_name.into().trim().to_string();

        if label.is_empty() {
            return Err(Error::InvalidInput(
                "Attachment label cannot be empty".to_string(),
            ));
        }
        if file_name.is_empty() {
            return Err(Error::InvalidInput(
                "Attachment file_name cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            id: AttachmentId::new(),
            label,
            file_name,
            source,
            created_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Create an attachment whose asset has not been uploaded yet.
    ///
    /// The source is a locally-generated preview reference derived from the
    /// new attachment id.
    pub fn with_preview(
        label: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Result<Self> {
        let id = AttachmentId::new();
        let mut attachment = Self::new(
            label,
            file_name,
            AttachmentSource::Preview(format!("preview://{id}")),
        )?;
        attachment.id = id;
        Ok(attachment)
    }

    /// The local preview reference, while the asset is pending upload.
    #[must_use]
    pub fn preview_reference(&self) -> Option<&str> {
        match &self.source {
            AttachmentSource::Preview(reference) => Some(reference),
            AttachmentSource::Remote(_) => None,
        }
    }

    /// Representation persisted to the remote store.
    ///
    /// The URL is present only once the asset is remote; local preview
    /// references stay on this client.
    #[must_use]
    pub fn remote_value(&self) -> Value {
        let url = match &self.source {
            AttachmentSource::Remote(url) => json!(url),
            AttachmentSource::Preview(_) => Value::Null,
        };
        json!({
            "id": self.id.as_str(),
            "label": self.label,
            "file_name": self.file_name,
            "url": url,
        })
    }
}
