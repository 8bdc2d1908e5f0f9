//! # Domain Types
//!
//! Types shared by the storage layer and the sync engine.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Domain Types                                   │
//! │                                                                         │
//! │  Local store                  Link                      Change feed     │
//! │  ┌─────────────────┐   ┌──────────────────────┐   ┌─────────────────┐  │
//! │  │ LocalCollection │◄──│ Correlation          │   │ ChronicleEntry  │  │
//! │  │ LocalEntity     │◄──│  local_* / remote_*  │   │ ChronicleDelta  │  │
//! │  └─────────────────┘   │  lock_* (lease)      │   │ Watermark       │  │
//! │                        │  altered_at          │   └─────────────────┘  │
//! │  ┌─────────────────┐   │  performed_at        │                        │
//! │  │ EntityKind      │   └──────────────────────┘                        │
//! │  │ CorrelationType │                                                   │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// =============================================================================
// Entity Kind
// =============================================================================

/// Kind of groupware data a collection holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Contact,
    Event,
    Task,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Contact, EntityKind::Event, EntityKind::Task];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Contact => "contact",
            EntityKind::Event => "event",
            EntityKind::Task => "task",
        }
    }

    /// Maps an ActiveSync folder type to the kind it holds.
    ///
    /// Default and user-created folders both count: 9/14 contacts, 8/13
    /// calendar, 7/15 tasks. Mail, notes and journal folders are not bridged.
    pub fn from_folder_type(folder_type: u32) -> Option<Self> {
        match folder_type {
            9 | 14 => Some(EntityKind::Contact),
            8 | 13 => Some(EntityKind::Event),
            7 | 15 => Some(EntityKind::Task),
            _ => None,
        }
    }

    /// ActiveSync folder type used when creating a user folder of this kind.
    pub fn user_folder_type(&self) -> u32 {
        match self {
            EntityKind::Contact => 14,
            EntityKind::Event => 13,
            EntityKind::Task => 15,
        }
    }

    /// Value of the AirSync `Class` element.
    pub fn class_name(&self) -> &'static str {
        match self {
            EntityKind::Contact => "Contacts",
            EntityKind::Event => "Calendar",
            EntityKind::Task => "Tasks",
        }
    }

    pub fn collection_correlation(&self) -> CorrelationType {
        match self {
            EntityKind::Contact => CorrelationType::ContactCollection,
            EntityKind::Event => CorrelationType::EventCollection,
            EntityKind::Task => CorrelationType::TaskCollection,
        }
    }

    pub fn object_correlation(&self) -> CorrelationType {
        match self {
            EntityKind::Contact => CorrelationType::ContactObject,
            EntityKind::Event => CorrelationType::EventObject,
            EntityKind::Task => CorrelationType::TaskObject,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contact" => Ok(EntityKind::Contact),
            "event" => Ok(EntityKind::Event),
            "task" => Ok(EntityKind::Task),
            other => Err(CoreError::invalid("kind", other)),
        }
    }
}

// =============================================================================
// Correlation
// =============================================================================

/// What a correlation links: a collection or an object, of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
pub enum CorrelationType {
    #[serde(rename = "CC")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "CC"))]
    ContactCollection,
    #[serde(rename = "CO")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "CO"))]
    ContactObject,
    #[serde(rename = "EC")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "EC"))]
    EventCollection,
    #[serde(rename = "EO")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "EO"))]
    EventObject,
    #[serde(rename = "TC")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "TC"))]
    TaskCollection,
    #[serde(rename = "TO")]
    #[cfg_attr(feature = "sqlx", sqlx(rename = "TO"))]
    TaskObject,
}

impl CorrelationType {
    pub fn code(&self) -> &'static str {
        match self {
            CorrelationType::ContactCollection => "CC",
            CorrelationType::ContactObject => "CO",
            CorrelationType::EventCollection => "EC",
            CorrelationType::EventObject => "EO",
            CorrelationType::TaskCollection => "TC",
            CorrelationType::TaskObject => "TO",
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            CorrelationType::ContactCollection
                | CorrelationType::EventCollection
                | CorrelationType::TaskCollection
        )
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            CorrelationType::ContactCollection | CorrelationType::ContactObject => {
                EntityKind::Contact
            }
            CorrelationType::EventCollection | CorrelationType::EventObject => EntityKind::Event,
            CorrelationType::TaskCollection | CorrelationType::TaskObject => EntityKind::Task,
        }
    }
}

impl fmt::Display for CorrelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for CorrelationType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CC" => Ok(CorrelationType::ContactCollection),
            "CO" => Ok(CorrelationType::ContactObject),
            "EC" => Ok(CorrelationType::EventCollection),
            "EO" => Ok(CorrelationType::EventObject),
            "TC" => Ok(CorrelationType::TaskCollection),
            "TO" => Ok(CorrelationType::TaskObject),
            other => Err(CoreError::invalid("correlation type", other)),
        }
    }
}

/// Durable link between one local object/collection and its remote counterpart.
///
/// For a collection correlation `local_object_id` is the local collection id,
/// `remote_object_id` the folder's ServerId and `remote_collection_id` its
/// ParentId. For an object correlation the collection fields name the owning
/// local collection and remote folder, and `affiliation_id` points at the
/// collection correlation.
///
/// `local_state` holds the chronicle watermark and `remote_state` the
/// ActiveSync SyncKey last agreed for a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub id: i64,
    pub user_id: String,
    pub correlation_type: CorrelationType,
    pub affiliation_id: Option<i64>,

    pub local_object_id: i64,
    pub local_collection_id: Option<i64>,
    pub local_object_signature: Option<String>,
    pub local_state: Option<String>,

    pub remote_object_id: String,
    pub remote_collection_id: Option<String>,
    pub remote_object_signature: Option<String>,
    pub remote_state: Option<String>,

    /// 0 = unlocked.
    pub lock_state: i32,
    pub lock_holder: Option<String>,
    pub lock_heartbeat: Option<DateTime<Utc>>,

    /// Set when the local side changed or deleted something still owed to the remote.
    pub altered_at: Option<DateTime<Utc>>,
    /// Last successful synchronization of this record.
    pub performed_at: Option<DateTime<Utc>>,
}

impl Correlation {
    fn blank(user_id: &str, correlation_type: CorrelationType) -> Self {
        Self {
            id: 0,
            user_id: user_id.to_string(),
            correlation_type,
            affiliation_id: None,
            local_object_id: 0,
            local_collection_id: None,
            local_object_signature: None,
            local_state: None,
            remote_object_id: String::new(),
            remote_collection_id: None,
            remote_object_signature: None,
            remote_state: None,
            lock_state: 0,
            lock_holder: None,
            lock_heartbeat: None,
            altered_at: None,
            performed_at: None,
        }
    }

    /// New, unsaved collection correlation.
    pub fn collection(
        user_id: &str,
        kind: EntityKind,
        local_collection_id: i64,
        remote_folder_id: &str,
        remote_parent_id: &str,
    ) -> Self {
        Self {
            local_object_id: local_collection_id,
            remote_object_id: remote_folder_id.to_string(),
            remote_collection_id: Some(remote_parent_id.to_string()),
            ..Self::blank(user_id, kind.collection_correlation())
        }
    }

    /// New, unsaved object correlation affiliated with `parent`.
    pub fn object(
        parent: &Correlation,
        local_entity_id: i64,
        remote_server_id: &str,
    ) -> Self {
        Self {
            affiliation_id: Some(parent.id),
            local_object_id: local_entity_id,
            local_collection_id: Some(parent.local_object_id),
            remote_object_id: remote_server_id.to_string(),
            remote_collection_id: Some(parent.remote_object_id.clone()),
            ..Self::blank(&parent.user_id, parent.correlation_type.kind().object_correlation())
        }
    }

    /// True while another worker's lease is live.
    pub fn is_held(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.lock_state != 0
            && self
                .lock_heartbeat
                .map(|beat| now - beat <= stale_after)
                .unwrap_or(false)
    }

    pub fn is_altered(&self) -> bool {
        self.altered_at.is_some()
    }
}

// =============================================================================
// Change Chronicle
// =============================================================================

/// Mutation recorded in the chronicle. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[repr(i32)]
pub enum ChronicleOperation {
    Created = 1,
    Modified = 2,
    Deleted = 3,
}

impl ChronicleOperation {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ChronicleOperation::Created),
            2 => Some(ChronicleOperation::Modified),
            3 => Some(ChronicleOperation::Deleted),
            _ => None,
        }
    }
}

/// One append-only chronicle row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChronicleEntry {
    /// Storage-assigned sequence; the watermark is built from it.
    pub id: i64,
    pub user_id: String,
    pub tag: EntityKind,
    pub collection_id: i64,
    pub entity_id: i64,
    pub entity_uuid: String,
    pub operation: ChronicleOperation,
    /// Wall-clock time of the write, microsecond precision. Diagnostic only.
    pub stamp: DateTime<Utc>,
}

/// One entity's collapsed change within a reminisce window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChronicleItem {
    pub entity_id: i64,
    pub entity_uuid: String,
    pub operation: ChronicleOperation,
    /// Highest chronicle sequence seen for the entity in the window.
    pub sequence: i64,
}

/// Result of a reminisce call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChronicleDelta {
    pub additions: Vec<ChronicleItem>,
    pub modifications: Vec<ChronicleItem>,
    pub deletions: Vec<ChronicleItem>,
    /// Opaque token to pass to the next call.
    pub watermark: String,
}

impl ChronicleDelta {
    pub fn len(&self) -> usize {
        self.additions.len() + self.modifications.len() + self.deletions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Files an item into the bucket for its operation.
    pub fn push(&mut self, item: ChronicleItem) {
        match item.operation {
            ChronicleOperation::Created => self.additions.push(item),
            ChronicleOperation::Modified => self.modifications.push(item),
            ChronicleOperation::Deleted => self.deletions.push(item),
        }
    }

    /// All items, in bucket order.
    pub fn items(&self) -> impl Iterator<Item = &ChronicleItem> {
        self.additions
            .iter()
            .chain(self.modifications.iter())
            .chain(self.deletions.iter())
    }
}

/// Position in the chronicle. Callers only ever see the encoded form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Watermark(i64);

impl Watermark {
    /// Before the first entry.
    pub const ORIGIN: Watermark = Watermark(0);

    pub fn new(sequence: i64) -> Self {
        Watermark(sequence.max(0))
    }

    pub fn sequence(&self) -> i64 {
        self.0
    }

    pub fn encode(&self) -> String {
        STANDARD.encode(self.0.to_string())
    }

    /// Parses an encoded watermark. Anything malformed yields `None`.
    pub fn decode(token: &str) -> Option<Self> {
        let bytes = STANDARD.decode(token.trim()).ok()?;
        let text = std::str::from_utf8(&bytes).ok()?;
        let sequence: i64 = text.parse().ok()?;
        (sequence >= 0).then_some(Watermark(sequence))
    }

    /// Decodes an optional token, falling back to the origin.
    pub fn decode_or_origin(token: Option<&str>) -> Self {
        token.and_then(Watermark::decode).unwrap_or(Watermark::ORIGIN)
    }
}

// =============================================================================
// Local Store Records
// =============================================================================

/// A local address book, calendar or task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalCollection {
    pub id: i64,
    pub user_id: String,
    pub kind: EntityKind,
    pub uuid: String,
    pub label: String,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl LocalCollection {
    /// New, unsaved collection with a fresh uuid.
    pub fn new(user_id: &str, kind: EntityKind, label: &str) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id: user_id.to_string(),
            kind,
            uuid: uuid::Uuid::new_v4().to_string(),
            label: label.to_string(),
            color: None,
            created_at: now,
            modified_at: now,
        }
    }
}

/// A local contact, event or task. `data` is the JSON-serialized object model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntity {
    pub id: i64,
    pub user_id: String,
    pub kind: EntityKind,
    pub collection_id: i64,
    pub uuid: String,
    pub signature: String,
    pub label: Option<String>,
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl LocalEntity {
    /// New, unsaved entity. The signature is derived from `data`.
    pub fn new(collection: &LocalCollection, label: Option<String>, data: String) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id: collection.user_id.clone(),
            kind: collection.kind,
            collection_id: collection.id,
            uuid: uuid::Uuid::new_v4().to_string(),
            signature: content_signature(data.as_bytes()),
            label,
            data,
            created_at: now,
            modified_at: now,
        }
    }

    /// Replaces the payload and refreshes the signature.
    pub fn set_data(&mut self, data: String) {
        self.signature = content_signature(data.as_bytes());
        self.data = data;
    }
}

/// Per-user remote state outside any collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub user_id: String,
    /// FolderSync key; "0" before the first hierarchy sync.
    pub hierarchy_key: String,
    pub updated_at: DateTime<Utc>,
}

/// Content hash used as the local signature of an entity payload.
pub fn content_signature(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
