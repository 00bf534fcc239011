/// Shared data structures for the capture queue
///
/// These structs represent the data model that flows between
/// the database layer, the queue and the sync engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::preview::PreviewHandle;

/// Prefix separating local capture ids from ids assigned by the backend
pub const LOCAL_ID_PREFIX: &str = "offline-";

/// Locally generated capture id (e.g., "offline-0b6c...")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a fresh id in the local namespace
    pub fn generate() -> Self {
        Self(format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id was generated on this device
    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Capture context carried through to the remote insert
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMeta {
    /// Id of the user who took the picture, if signed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
    /// File name as captured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
}

/// One locally queued image capture
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    pub id: RecordId,
    /// The store (or other parent entity) the picture belongs to
    pub owner_id: String,
    /// Image bytes as captured
    pub payload: Vec<u8>,
    /// Advisory name, only used for the remote extension
    pub file_name: String,
    /// Rendering handle, process-local, never persisted
    pub preview: Option<PreviewHandle>,
    /// Capture time in milliseconds since the Unix epoch
    pub created_at_ms: i64,
    /// false = pending, true = delivered to the backend
    pub uploaded: bool,
    pub meta: CaptureMeta,
}

impl CaptureRecord {
    pub fn is_pending(&self) -> bool {
        !self.uploaded
    }
}

impl PartialEq for CaptureRecord {
    fn eq(&self, other: &Self) -> bool {
        // previews are derived data
        self.id == other.id
            && self.owner_id == other.owner_id
            && self.payload == other.payload
            && self.file_name == other.file_name
            && self.created_at_ms == other.created_at_ms
            && self.uploaded == other.uploaded
            && self.meta == other.meta
    }
}

/// Sort records for display (oldest capture first)
pub fn sort_by_capture_time(records: &mut [CaptureRecord]) {
    records.sort_by(|a, b| {
        a.created_at_ms
            .cmp(&b.created_at_ms)
            .then_with(|| a.id.cmp(&b.id))
    });
}
