//! FolderSync: the remote folder hierarchy.
//!
//! ```text
//! FolderSync (FolderHierarchy)
//! ├── Status
//! ├── SyncKey
//! └── Changes
//!     ├── Count
//!     ├── Add*     ServerId, ParentId, DisplayName, Type
//!     ├── Update*  ServerId, ParentId, DisplayName, Type
//!     └── Delete*  ServerId
//! ```

use super::{command_element, parse_status, Command, STATUS_SUCCESS};
use crate::error::{SyncError, SyncResult};
use eas_core::codepage::ns;
use eas_core::{wbxml, EntityKind, TaggedNode};

/// The remote no longer recognizes the hierarchy key; start over from "0".
pub const STATUS_INVALID_KEY: u32 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSyncRequest {
    pub sync_key: String,
}

impl FolderSyncRequest {
    pub fn new(sync_key: impl Into<String>) -> Self {
        FolderSyncRequest {
            sync_key: sync_key.into(),
        }
    }

    pub fn to_document(&self) -> TaggedNode {
        let body = TaggedNode::new(ns::FOLDER_HIERARCHY).with_text("SyncKey", self.sync_key.as_str());
        wbxml::document(Command::FolderSync.as_str(), body)
    }

    /// Reads a request document back; used by test doubles of the remote.
    pub fn parse(document: &TaggedNode) -> SyncResult<Self> {
        let body = command_element(Command::FolderSync, document)?;
        let sync_key = body
            .text("SyncKey")
            .ok_or_else(|| SyncError::UnexpectedResponse("FolderSync without SyncKey".into()))?;
        Ok(FolderSyncRequest::new(sync_key))
    }
}

/// One folder reported by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    pub server_id: String,
    pub parent_id: String,
    pub display_name: String,
    pub folder_type: u32,
}

impl RemoteFolder {
    /// Entity kind for contact, calendar and task folders; `None` for mail and the rest.
    pub fn kind(&self) -> Option<EntityKind> {
        EntityKind::from_folder_type(self.folder_type)
    }

    fn parse(node: &TaggedNode) -> SyncResult<Self> {
        let server_id = node
            .text("ServerId")
            .ok_or_else(|| SyncError::UnexpectedResponse("folder without ServerId".into()))?;
        let folder_type = node
            .text("Type")
            .and_then(|t| t.trim().parse().ok())
            .ok_or_else(|| {
                SyncError::UnexpectedResponse(format!("folder {server_id} has no valid Type"))
            })?;

        Ok(RemoteFolder {
            server_id: server_id.to_string(),
            parent_id: node.text("ParentId").unwrap_or("0").to_string(),
            display_name: node.text("DisplayName").unwrap_or_default().to_string(),
            folder_type,
        })
    }

    fn to_node(&self) -> TaggedNode {
        TaggedNode::new(ns::FOLDER_HIERARCHY)
            .with_text("ServerId", self.server_id.as_str())
            .with_text("ParentId", self.parent_id.as_str())
            .with_text("DisplayName", self.display_name.as_str())
            .with_text("Type", self.folder_type.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FolderSyncResponse {
    pub status: u32,
    pub sync_key: Option<String>,
    pub added: Vec<RemoteFolder>,
    pub updated: Vec<RemoteFolder>,
    pub deleted: Vec<String>,
}

impl FolderSyncResponse {
    pub fn parse(document: &TaggedNode) -> SyncResult<Self> {
        let body = command_element(Command::FolderSync, document)?;
        let status = parse_status(Command::FolderSync, body)?.ok_or_else(|| {
            SyncError::UnexpectedResponse("FolderSync response without Status".into())
        })?;

        let mut response = FolderSyncResponse {
            status,
            sync_key: body.text("SyncKey").map(str::to_string),
            ..Default::default()
        };

        if let Some(changes) = body.node("Changes") {
            for add in changes.nodes("Add") {
                response.added.push(RemoteFolder::parse(add)?);
            }
            for update in changes.nodes("Update") {
                response.updated.push(RemoteFolder::parse(update)?);
            }
            for delete in changes.nodes("Delete") {
                if let Some(server_id) = delete.text("ServerId") {
                    response.deleted.push(server_id.to_string());
                }
            }
        }

        Ok(response)
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Builds the response document; the inverse of [`parse`](Self::parse).
    pub fn to_document(&self) -> TaggedNode {
        let mut body = TaggedNode::new(ns::FOLDER_HIERARCHY).with_text("Status", self.status.to_string());
        if let Some(key) = &self.sync_key {
            body.push_text("SyncKey", key.as_str());
        }

        let count = self.added.len() + self.updated.len() + self.deleted.len();
        if self.is_success() {
            let mut changes =
                TaggedNode::new(ns::FOLDER_HIERARCHY).with_text("Count", count.to_string());
            for folder in &self.added {
                changes.push_node("Add", folder.to_node());
            }
            for folder in &self.updated {
                changes.push_node("Update", folder.to_node());
            }
            for server_id in &self.deleted {
                changes.push_node(
                    "Delete",
                    TaggedNode::new(ns::FOLDER_HIERARCHY).with_text("ServerId", server_id.as_str()),
                );
            }
            body.push_node("Changes", changes);
        }

        wbxml::document(Command::FolderSync.as_str(), body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(server_id: &str, name: &str, folder_type: u32) -> RemoteFolder {
        RemoteFolder {
            server_id: server_id.into(),
            parent_id: "0".into(),
            display_name: name.into(),
            folder_type,
        }
    }

    #[test]
    fn test_request_document() {
        let doc = FolderSyncRequest::new("0").to_document();
        let body = doc.node("FolderSync").unwrap();
        assert_eq!(body.namespace, ns::FOLDER_HIERARCHY);
        assert_eq!(body.text("SyncKey"), Some("0"));

        let bytes = wbxml::encode(&doc).unwrap();
        let parsed = FolderSyncRequest::parse(&wbxml::decode(&bytes).unwrap()).unwrap();
        assert_eq!(parsed.sync_key, "0");
    }

    #[test]
    fn test_response_over_the_wire() {
        let response = FolderSyncResponse {
            status: STATUS_SUCCESS,
            sync_key: Some("1".into()),
            added: vec![
                folder("2", "Inbox", 2),
                folder("8", "Contacts", 9),
                folder("9", "Calendar", 8),
            ],
            updated: vec![folder("10", "Tasks", 7)],
            deleted: vec!["11".into()],
        };

        let bytes = wbxml::encode(&response.to_document()).unwrap();
        let parsed = FolderSyncResponse::parse(&wbxml::decode(&bytes).unwrap()).unwrap();
        assert_eq!(parsed, response);

        let kinds: Vec<_> = parsed.added.iter().map(RemoteFolder::kind).collect();
        assert_eq!(kinds, vec![None, Some(EntityKind::Contact), Some(EntityKind::Event)]);
        assert_eq!(parsed.updated[0].kind(), Some(EntityKind::Task));
    }

    #[test]
    fn test_invalid_key_status() {
        let response = FolderSyncResponse {
            status: STATUS_INVALID_KEY,
            ..Default::default()
        };
        let parsed = FolderSyncResponse::parse(&response.to_document()).unwrap();
        assert!(!parsed.is_success());
        assert_eq!(parsed.status, STATUS_INVALID_KEY);
        assert!(parsed.added.is_empty());
    }

    #[test]
    fn test_missing_status_rejected() {
        let doc = wbxml::document(
            "FolderSync",
            TaggedNode::new(ns::FOLDER_HIERARCHY).with_text("SyncKey", "1"),
        );
        assert!(matches!(
            FolderSyncResponse::parse(&doc),
            Err(SyncError::UnexpectedResponse(_))
        ));
    }
}
