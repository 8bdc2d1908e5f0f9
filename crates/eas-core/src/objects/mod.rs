//! # Entity Object Models
//!
//! Typed contacts, events and tasks. Each is stored locally as JSON and
//! converted to and from the ActiveSync `ApplicationData` element.
//!
//! ```text
//!   entities.data (JSON) ◄──serde──► ContactObject ◄──► ApplicationData
//!                                    EventObject          (TaggedNode)
//!                                    TaskObject
//! ```

pub mod contact;
pub mod datetime;
pub mod event;
pub mod task;

pub use contact::{
    AddressKind, ContactAddress, ContactName, ContactObject, ContactPhone, ContactRelation,
    PhoneKind, RelationKind,
};
pub use event::{Attendee, BusyStatus, EventObject, Recurrence, RecurrenceType, Sensitivity};
pub use task::{Importance, TaskObject};

use serde::{Deserialize, Serialize};

use crate::codepage::ns;
use crate::error::{CoreError, CoreResult};
use crate::model::TaggedNode;
use crate::types::EntityKind;

/// Any bridged object, dispatched by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityObject {
    Contact(ContactObject),
    Event(EventObject),
    Task(TaskObject),
}

impl EntityObject {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityObject::Contact(_) => EntityKind::Contact,
            EntityObject::Event(_) => EntityKind::Event,
            EntityObject::Task(_) => EntityKind::Task,
        }
    }

    /// Human-readable name used as the stored entity label.
    pub fn label(&self) -> Option<String> {
        match self {
            EntityObject::Contact(c) => c.label(),
            EntityObject::Event(e) => e.subject.clone(),
            EntityObject::Task(t) => t.subject.clone(),
        }
    }

    /// Parses an `ApplicationData` element received from the remote.
    pub fn from_application_data(kind: EntityKind, data: &TaggedNode) -> CoreResult<Self> {
        Ok(match kind {
            EntityKind::Contact => EntityObject::Contact(ContactObject::from_application_data(data)?),
            EntityKind::Event => EntityObject::Event(EventObject::from_application_data(data)?),
            EntityKind::Task => EntityObject::Task(TaskObject::from_application_data(data)?),
        })
    }

    /// Builds the `ApplicationData` element sent to the remote.
    pub fn to_application_data(&self) -> TaggedNode {
        match self {
            EntityObject::Contact(c) => c.to_application_data(),
            EntityObject::Event(e) => e.to_application_data(),
            EntityObject::Task(t) => t.to_application_data(),
        }
    }

    /// Stored payload form: the bare object, without the enum wrapper.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(match self {
            EntityObject::Contact(c) => serde_json::to_string(c)?,
            EntityObject::Event(e) => serde_json::to_string(e)?,
            EntityObject::Task(t) => serde_json::to_string(t)?,
        })
    }

    pub fn from_json(kind: EntityKind, json: &str) -> CoreResult<Self> {
        Ok(match kind {
            EntityKind::Contact => EntityObject::Contact(serde_json::from_str(json)?),
            EntityKind::Event => EntityObject::Event(serde_json::from_str(json)?),
            EntityKind::Task => EntityObject::Task(serde_json::from_str(json)?),
        })
    }
}

// =============================================================================
// Shared ApplicationData helpers
// =============================================================================

/// Plain-text body type for AirSyncBase `Body/Type`.
pub(crate) const BODY_TYPE_PLAIN: &str = "1";

/// Fresh `ApplicationData` element.
pub(crate) fn application_data() -> TaggedNode {
    TaggedNode::new(ns::AIR_SYNC)
}

/// Appends an AirSyncBase `Body` with plain-text `Data`.
pub(crate) fn push_body(data: &mut TaggedNode, notes: &Option<String>) {
    if let Some(text) = notes {
        let body = TaggedNode::new(ns::AIR_SYNC_BASE)
            .with_text("Type", BODY_TYPE_PLAIN)
            .with_text("Data", text.as_str());
        data.push_node("Body", body);
    }
}

pub(crate) fn read_body(data: &TaggedNode) -> Option<String> {
    data.node("Body")
        .and_then(|body| body.text("Data"))
        .map(str::to_string)
}

/// Appends `Categories/Category*` in `namespace` when the list is non-empty.
pub(crate) fn push_categories(data: &mut TaggedNode, namespace: &str, categories: &[String]) {
    if categories.is_empty() {
        return;
    }
    let mut node = TaggedNode::new(namespace);
    for category in categories {
        node.push_text("Category", category.as_str());
    }
    data.push_node("Categories", node);
}

pub(crate) fn read_categories(data: &TaggedNode) -> Vec<String> {
    data.node("Categories")
        .map(|node| node.texts("Category").map(str::to_string).collect())
        .unwrap_or_default()
}

pub(crate) fn push_opt(data: &mut TaggedNode, namespace: &str, tag: &str, value: &Option<String>) {
    if let Some(v) = value {
        data.push_text_ns(namespace, tag, v.as_str());
    }
}

pub(crate) fn read_opt(data: &TaggedNode, tag: &str) -> Option<String> {
    data.text(tag).map(str::to_string)
}

pub(crate) fn read_bool(data: &TaggedNode, tag: &str) -> CoreResult<Option<bool>> {
    match data.text(tag) {
        None => Ok(None),
        Some("1") => Ok(Some(true)),
        Some("0") | Some("") => Ok(Some(false)),
        Some(other) => Err(CoreError::invalid(tag, other)),
    }
}

pub(crate) fn read_number<T: std::str::FromStr>(data: &TaggedNode, tag: &str) -> CoreResult<Option<T>> {
    data.text(tag)
        .map(|text| {
            text.trim()
                .parse::<T>()
                .map_err(|_| CoreError::invalid(tag, text))
        })
        .transpose()
}

pub(crate) fn bool_text(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_dispatch_by_kind() {
        let task = TaskObject {
            subject: Some("File taxes".into()),
            ..Default::default()
        };
        let object = EntityObject::Task(task);
        let json = object.to_json().unwrap();
        assert!(json.contains("File taxes"));

        let restored = EntityObject::from_json(EntityKind::Task, &json).unwrap();
        assert_eq!(restored, object);
        assert_eq!(restored.kind(), EntityKind::Task);
        assert_eq!(restored.label().as_deref(), Some("File taxes"));
    }

    #[test]
    fn test_json_kind_mismatch_is_error() {
        let err = EntityObject::from_json(EntityKind::Contact, "[1,2,3]").unwrap_err();
        assert!(matches!(err, CoreError::Serialization(_)));
    }

    #[test]
    fn test_bool_and_number_readers() {
        let node = TaggedNode::new(ns::TASKS)
            .with_text("Complete", "1")
            .with_text("Importance", "x");
        assert_eq!(read_bool(&node, "Complete").unwrap(), Some(true));
        assert_eq!(read_bool(&node, "ReminderSet").unwrap(), None);
        assert!(read_number::<u8>(&node, "Importance").is_err());
    }
}
