//! Record model and identifiers

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::attachment::Attachment;

/// Marker prefix carried by the string form of placeholder identifiers.
///
/// The in-memory origin of a record is the [`RecordId`] variant; the marker
/// exists only at the string boundary (display, parsing, serde) so wire data
/// can round-trip without a separate origin flag.
pub const TEMP_ID_MARKER: &str = "tmp_";

/// A client-generated placeholder identifier for a record the remote store
/// has not acknowledged yet. Uses UUID v7 (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TempId(Uuid);

impl TempId {
    /// Allocate a new placeholder id, unique for the client session.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TEMP_ID_MARKER}{}", self.0)
    }
}

impl FromStr for TempId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.strip_prefix(TEMP_ID_MARKER).ok_or_else(|| {
            Error::InvalidInput(format!("Temp id must start with '{TEMP_ID_MARKER}': {s}"))
        })?;
        let uuid = Uuid::parse_str(raw)
            .map_err(|error| Error::InvalidInput(format!("Invalid temp id '{s}': {error}")))?;
        Ok(Self(uuid))
    }
}

impl From<TempId> for String {
    fn from(id: TempId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for TempId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// An opaque identifier assigned by the remote store upon creation.
///
/// Rejects strings carrying the temp-id marker so a server id can never be
/// mistaken for a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ServerId(String);

impl ServerId {
    /// Wrap a server-assigned identifier, validating it is non-empty and
    /// does not collide with the temp-id marker.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into().trim().to_string();
        if raw.is_empty() {
            return Err(Error::InvalidInput(
                "Server id cannot be empty".to_string(),
            ));
        }
        if raw.starts_with(TEMP_ID_MARKER) {
            return Err(Error::InvalidInput(format!(
                "Server id cannot start with '{TEMP_ID_MARKER}': {raw}"
            )));
        }
        Ok(Self(raw))
    }

    /// Borrow the raw identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl From<ServerId> for String {
    fn from(id: ServerId) -> Self {
        id.0
    }
}

impl TryFrom<String> for ServerId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

/// A record identifier, tagged by origin.
///
/// `Pending` records exist only on this client; `Confirmed` records carry the
/// identity assigned by the remote store. The two are never deduplicated by
/// content, only through an explicit rebind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RecordId {
    /// Not yet acknowledged by the remote store.
    Pending(TempId),
    /// Assigned by the remote store.
    Confirmed(ServerId),
}

impl RecordId {
    /// Whether this record is still awaiting remote confirmation.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// The server id, when confirmed.
    #[must_use]
    pub const fn as_server_id(&self) -> Option<&ServerId> {
        match self {
            Self::Pending(_) => None,
            Self::Confirmed(id) => Some(id),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(id) => id.fmt(f),
            Self::Confirmed(id) => id.fmt(f),
        }
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with(TEMP_ID_MARKER) {
            Ok(Self::Pending(s.parse()?))
        } else {
            Ok(Self::Confirmed(s.parse()?))
        }
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for RecordId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Synchronization key scoping one logical collection (e.g. an account id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SyncKey(String);

impl SyncKey {
    /// Wrap a non-empty synchronization key.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into().trim().to_string();
        if raw.is_empty() {
            return Err(Error::InvalidInput("Sync key cannot be empty".to_string()));
        }
        Ok(Self(raw))
    }

    /// Borrow the raw key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SyncKey> for String {
    fn from(key: SyncKey) -> Self {
        key.0
    }
}

impl TryFrom<String> for SyncKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

/// A domain record held by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier, tagged by origin.
    pub id: RecordId,
    /// Domain payload (name, contact info, status, nested lists).
    pub fields: Map<String, Value>,
    /// Attached assets.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Creation timestamp (Unix ms).
    pub created_at: i64,
    /// Last update timestamp (Unix ms).
    pub updated_at: i64,
}

impl Record {
    /// Create a record awaiting remote confirmation.
    #[must_use]
    pub fn pending(id: TempId, fields: Map<String, Value>) -> Self {
        Self::with_id(RecordId::Pending(id), fields)
    }

    /// Create a record already confirmed by the remote store.
    #[must_use]
    pub fn confirmed(id: ServerId, fields: Map<String, Value>) -> Self {
        Self::with_id(RecordId::Confirmed(id), fields)
    }

    fn with_id(id: RecordId, fields: Map<String, Value>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id,
            fields,
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this record is still awaiting remote confirmation.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.id.is_pending()
    }

    /// Bump the update timestamp after a local edit.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Build the payload sent to the remote store for create/update calls.
    ///
    /// Never contains the record id (the remote store assigns identity), and
    /// attachment entries carry a URL only once the asset is remote; local
    /// preview references are never persisted.
    #[must_use]
    pub fn remote_payload(&self) -> Value {
        let mut payload = self.fields.clone();
        payload.insert(
            "attachments".to_string(),
            Value::Array(
                self.attachments
                    .iter()
                    .map(Attachment::remote_value)
                    .collect(),
            ),
        );
        Value::Object(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attachment, AttachmentSource};
    use serde_json::json;

    fn fields(name: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("name".to_string(), json!(name));
        map
    }

    #[test]
    fn temp_id_unique() {
        assert_ne!(TempId::new(), TempId::new());
    }

    #[test]
    fn temp_id_string_roundtrip_carries_marker() {
        let id = TempId::new();
        let rendered = id.to_string();
        assert!(rendered.starts_with(TEMP_ID_MARKER));

        let parsed: TempId = rendered.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn temp_id_parse_rejects_unmarked_strings() {
        assert!("p_1".parse::<TempId>().is_err());
    }

    #[test]
    fn server_id_rejects_marker_collision() {
        assert!(ServerId::new("tmp_123").is_err());
        assert!(ServerId::new("   ").is_err());
        assert!(ServerId::new("p_1").is_ok());
    }

    #[test]
    fn record_id_parses_by_marker() {
        let pending: RecordId = TempId::new().to_string().parse().unwrap();
        assert!(pending.is_pending());

        let confirmed: RecordId = "p_1".parse().unwrap();
        assert!(!confirmed.is_pending());
        assert_eq!(confirmed.as_server_id().unwrap().as_str(), "p_1");
    }

    #[test]
    fn sync_key_rejects_empty() {
        assert!(SyncKey::new("  ").is_err());
        assert_eq!(SyncKey::new(" acct-1 ").unwrap().as_str(), "acct-1");
    }

    #[test]
    fn record_payload_excludes_id() {
        let record = Record::pending(TempId::new(), fields("Aziz"));
        let payload = record.remote_payload();

        assert_eq!(payload["name"], json!("Aziz"));
        assert!(payload.get("id").is_none());
        assert_eq!(payload["attachments"], json!([]));
    }

    #[test]
    fn record_payload_keeps_only_remote_attachment_urls() {
        let mut record = Record::confirmed(ServerId::new("p_1").unwrap(), fields("Aziz"));
        record.attachments.push(
            Attachment::new("scan", "scan.png", AttachmentSource::Preview("preview://a".into()))
                .unwrap(),
        );
        record.attachments.push(
            Attachment::new(
                "photo",
                "photo.png",
                AttachmentSource::Remote("https://cdn.example.com/p.png".into()),
            )
            .unwrap(),
        );

        let payload = record.remote_payload();
        let attachments = payload["attachments"].as_array().unwrap();
        assert_eq!(attachments[0]["url"], Value::Null);
        assert_eq!(attachments[1]["url"], json!("https://cdn.example.com/p.png"));
    }
}
