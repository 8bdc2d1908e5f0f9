//! Sync: item changes within one remote folder.
//!
//! ```text
//! Sync (AirSync)
//! └── Collections
//!     └── Collection
//!         ├── SyncKey, CollectionId
//!         ├── GetChanges, WindowSize, Options      (request)
//!         ├── Status, MoreAvailable                (response)
//!         ├── Commands
//!         │   ├── Add*         ClientId|ServerId, ApplicationData
//!         │   ├── Change*      ServerId, ApplicationData
//!         │   ├── Delete*      ServerId
//!         │   └── SoftDelete*  ServerId            (response)
//!         └── Responses                            (response)
//!             ├── Add*         ClientId, ServerId, Status
//!             └── Change*      ServerId, Status
//! ```

use super::{command_element, parse_status, Command, STATUS_SUCCESS};
use crate::error::{SyncError, SyncResult};
use eas_core::codepage::ns;
use eas_core::{wbxml, TaggedNode};

/// The remote does not recognize the SyncKey; resynchronize from "0".
pub const STATUS_INVALID_KEY: u32 = 3;

/// The object named by a client command does not exist on the remote.
pub const STATUS_OBJECT_NOT_FOUND: u32 = 8;

/// The folder hierarchy changed; run FolderSync first.
pub const STATUS_HIERARCHY_CHANGED: u32 = 12;

/// AirSyncBase body type requested for item bodies.
const BODY_TYPE_PLAIN: &str = "1";

// =============================================================================
// Request
// =============================================================================

/// A local change sent to the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Add { client_id: String, data: TaggedNode },
    Change { server_id: String, data: TaggedNode },
    Delete { server_id: String },
}

impl ClientCommand {
    fn tag(&self) -> &'static str {
        match self {
            ClientCommand::Add { .. } => "Add",
            ClientCommand::Change { .. } => "Change",
            ClientCommand::Delete { .. } => "Delete",
        }
    }

    fn to_node(&self) -> TaggedNode {
        let node = TaggedNode::new(ns::AIR_SYNC);
        match self {
            ClientCommand::Add { client_id, data } => node
                .with_text("ClientId", client_id.as_str())
                .with_node("ApplicationData", data.clone()),
            ClientCommand::Change { server_id, data } => node
                .with_text("ServerId", server_id.as_str())
                .with_node("ApplicationData", data.clone()),
            ClientCommand::Delete { server_id } => node.with_text("ServerId", server_id.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub sync_key: String,
    pub collection_id: String,
    pub get_changes: bool,
    pub window_size: u32,
    pub commands: Vec<ClientCommand>,
}

impl SyncRequest {
    /// First Sync of a folder: key "0", no changes requested either way.
    pub fn initial(collection_id: impl Into<String>) -> Self {
        SyncRequest {
            sync_key: eas_core::INITIAL_SYNC_KEY.to_string(),
            collection_id: collection_id.into(),
            get_changes: false,
            window_size: 0,
            commands: Vec::new(),
        }
    }

    /// Asks for remote changes, `window_size` at a time.
    pub fn pull(sync_key: impl Into<String>, collection_id: impl Into<String>, window_size: u32) -> Self {
        SyncRequest {
            sync_key: sync_key.into(),
            collection_id: collection_id.into(),
            get_changes: true,
            window_size,
            commands: Vec::new(),
        }
    }

    /// Sends local changes without asking for remote ones.
    pub fn push(
        sync_key: impl Into<String>,
        collection_id: impl Into<String>,
        commands: Vec<ClientCommand>,
    ) -> Self {
        SyncRequest {
            sync_key: sync_key.into(),
            collection_id: collection_id.into(),
            get_changes: false,
            window_size: 0,
            commands,
        }
    }

    pub fn to_document(&self) -> TaggedNode {
        let mut collection = TaggedNode::new(ns::AIR_SYNC)
            .with_text("SyncKey", self.sync_key.as_str())
            .with_text("CollectionId", self.collection_id.as_str());

        if self.get_changes {
            collection.push_node("GetChanges", TaggedNode::new(ns::AIR_SYNC));
        }
        if self.window_size > 0 {
            collection.push_text("WindowSize", self.window_size.to_string());
        }
        if self.sync_key != eas_core::INITIAL_SYNC_KEY {
            let preference = TaggedNode::new(ns::AIR_SYNC_BASE).with_text("Type", BODY_TYPE_PLAIN);
            let options = TaggedNode::new(ns::AIR_SYNC).with_node("BodyPreference", preference);
            collection.push_node("Options", options);
        }
        if !self.commands.is_empty() {
            let mut commands = TaggedNode::new(ns::AIR_SYNC);
            for command in &self.commands {
                commands.push_node(command.tag(), command.to_node());
            }
            collection.push_node("Commands", commands);
        }

        let collections = TaggedNode::new(ns::AIR_SYNC).with_node("Collection", collection);
        wbxml::document(
            Command::Sync.as_str(),
            TaggedNode::new(ns::AIR_SYNC).with_node("Collections", collections),
        )
    }

    /// Reads a request document back; used by test doubles of the remote.
    pub fn parse(document: &TaggedNode) -> SyncResult<Self> {
        let collection = command_element(Command::Sync, document)?
            .path(&["Collections", "Collection"])
            .ok_or_else(|| SyncError::UnexpectedResponse("Sync without Collection".into()))?;

        let required = |tag: &str| {
            collection
                .text(tag)
                .map(str::to_string)
                .ok_or_else(|| SyncError::UnexpectedResponse(format!("Sync without {tag}")))
        };

        let mut commands = Vec::new();
        if let Some(node) = collection.node("Commands") {
            for add in node.nodes("Add") {
                commands.push(ClientCommand::Add {
                    client_id: add.text("ClientId").unwrap_or_default().to_string(),
                    data: add.node("ApplicationData").cloned().unwrap_or_else(empty_data),
                });
            }
            for change in node.nodes("Change") {
                commands.push(ClientCommand::Change {
                    server_id: change.text("ServerId").unwrap_or_default().to_string(),
                    data: change.node("ApplicationData").cloned().unwrap_or_else(empty_data),
                });
            }
            for server_id in node.nodes("Delete").filter_map(|d| d.text("ServerId")) {
                commands.push(ClientCommand::Delete {
                    server_id: server_id.to_string(),
                });
            }
        }

        Ok(SyncRequest {
            sync_key: required("SyncKey")?,
            collection_id: required("CollectionId")?,
            get_changes: collection.contains("GetChanges"),
            window_size: collection
                .text("WindowSize")
                .and_then(|w| w.parse().ok())
                .unwrap_or(0),
            commands,
        })
    }
}

fn empty_data() -> TaggedNode {
    TaggedNode::new(ns::AIR_SYNC)
}

// =============================================================================
// Response
// =============================================================================

/// A remote change delivered to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    Add { server_id: String, data: TaggedNode },
    Change { server_id: String, data: TaggedNode },
    Delete { server_id: String },
    /// Item left the sync window (filter); handled like a delete.
    SoftDelete { server_id: String },
}

impl ServerCommand {
    pub fn server_id(&self) -> &str {
        match self {
            ServerCommand::Add { server_id, .. }
            | ServerCommand::Change { server_id, .. }
            | ServerCommand::Delete { server_id }
            | ServerCommand::SoftDelete { server_id } => server_id,
        }
    }
}

/// Outcome of a client Add: the ServerId the remote assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddResponse {
    pub client_id: String,
    pub server_id: Option<String>,
    pub status: u32,
}

/// Outcome of a client Change. Only failures are usually reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeResponse {
    pub server_id: String,
    pub status: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncResponse {
    pub status: u32,
    pub sync_key: Option<String>,
    pub collection_id: Option<String>,
    pub more_available: bool,
    pub commands: Vec<ServerCommand>,
    pub add_responses: Vec<AddResponse>,
    pub change_responses: Vec<ChangeResponse>,
}

impl SyncResponse {
    /// Parses a decoded response. `None` (empty body) means nothing changed.
    ///
    /// `commands` comes out grouped as every Add, then Change, then Delete,
    /// then SoftDelete, each group in document order. The decoded tree keys
    /// children by tag, so the server's interleaving across kinds is gone by
    /// the time this runs. Add/Change before Delete is right for an item
    /// created or edited and then removed inside one window. A ServerId that
    /// is deleted and then re-added within one window ends up deleted locally
    /// until the server next reports it.
    pub fn parse(document: Option<&TaggedNode>) -> SyncResult<Self> {
        let Some(document) = document else {
            return Ok(SyncResponse {
                status: STATUS_SUCCESS,
                ..Default::default()
            });
        };

        let sync = command_element(Command::Sync, document)?;
        let top_status = parse_status(Command::Sync, sync)?;

        let Some(collection) = sync.path(&["Collections", "Collection"]) else {
            // Request-level failures carry only a top-level Status.
            return match top_status {
                Some(status) => Ok(SyncResponse {
                    status,
                    ..Default::default()
                }),
                None => Err(SyncError::UnexpectedResponse(
                    "Sync response without Collection or Status".into(),
                )),
            };
        };

        let status = parse_status(Command::Sync, collection)?
            .or(top_status)
            .unwrap_or(STATUS_SUCCESS);

        let mut response = SyncResponse {
            status,
            sync_key: collection.text("SyncKey").map(str::to_string),
            collection_id: collection.text("CollectionId").map(str::to_string),
            more_available: collection.contains("MoreAvailable"),
            ..Default::default()
        };

        if let Some(commands) = collection.node("Commands") {
            for add in commands.nodes("Add") {
                response.commands.push(ServerCommand::Add {
                    server_id: server_id_of(add)?,
                    data: add.node("ApplicationData").cloned().unwrap_or_else(empty_data),
                });
            }
            for change in commands.nodes("Change") {
                response.commands.push(ServerCommand::Change {
                    server_id: server_id_of(change)?,
                    data: change.node("ApplicationData").cloned().unwrap_or_else(empty_data),
                });
            }
            for delete in commands.nodes("Delete") {
                response.commands.push(ServerCommand::Delete {
                    server_id: server_id_of(delete)?,
                });
            }
            for delete in commands.nodes("SoftDelete") {
                response.commands.push(ServerCommand::SoftDelete {
                    server_id: server_id_of(delete)?,
                });
            }
        }

        if let Some(responses) = collection.node("Responses") {
            for add in responses.nodes("Add") {
                response.add_responses.push(AddResponse {
                    client_id: add.text("ClientId").unwrap_or_default().to_string(),
                    server_id: add.text("ServerId").map(str::to_string),
                    status: parse_status(Command::Sync, add)?.unwrap_or(STATUS_SUCCESS),
                });
            }
            for change in responses.nodes("Change") {
                response.change_responses.push(ChangeResponse {
                    server_id: server_id_of(change)?,
                    status: parse_status(Command::Sync, change)?.unwrap_or(STATUS_SUCCESS),
                });
            }
        }

        Ok(response)
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }

    /// Builds the response document; the inverse of [`parse`](Self::parse).
    pub fn to_document(&self) -> TaggedNode {
        let mut collection = TaggedNode::new(ns::AIR_SYNC);
        if let Some(key) = &self.sync_key {
            collection.push_text("SyncKey", key.as_str());
        }
        if let Some(id) = &self.collection_id {
            collection.push_text("CollectionId", id.as_str());
        }
        collection.push_text("Status", self.status.to_string());
        if self.more_available {
            collection.push_node("MoreAvailable", TaggedNode::new(ns::AIR_SYNC));
        }

        if !self.commands.is_empty() {
            let mut commands = TaggedNode::new(ns::AIR_SYNC);
            for command in &self.commands {
                let (tag, node) = match command {
                    ServerCommand::Add { server_id, data } => (
                        "Add",
                        with_server_id(server_id).with_node("ApplicationData", data.clone()),
                    ),
                    ServerCommand::Change { server_id, data } => (
                        "Change",
                        with_server_id(server_id).with_node("ApplicationData", data.clone()),
                    ),
                    ServerCommand::Delete { server_id } => ("Delete", with_server_id(server_id)),
                    ServerCommand::SoftDelete { server_id } => ("SoftDelete", with_server_id(server_id)),
                };
                commands.push_node(tag, node);
            }
            collection.push_node("Commands", commands);
        }

        if !self.add_responses.is_empty() || !self.change_responses.is_empty() {
            let mut responses = TaggedNode::new(ns::AIR_SYNC);
            for add in &self.add_responses {
                let mut node = TaggedNode::new(ns::AIR_SYNC).with_text("ClientId", add.client_id.as_str());
                if let Some(server_id) = &add.server_id {
                    node.push_text("ServerId", server_id.as_str());
                }
                node.push_text("Status", add.status.to_string());
                responses.push_node("Add", node);
            }
            for change in &self.change_responses {
                responses.push_node(
                    "Change",
                    with_server_id(&change.server_id).with_text("Status", change.status.to_string()),
                );
            }
            collection.push_node("Responses", responses);
        }

        let collections = TaggedNode::new(ns::AIR_SYNC).with_node("Collection", collection);
        wbxml::document(
            Command::Sync.as_str(),
            TaggedNode::new(ns::AIR_SYNC).with_node("Collections", collections),
        )
    }
}

fn server_id_of(node: &TaggedNode) -> SyncResult<String> {
    node.text("ServerId")
        .map(str::to_string)
        .ok_or_else(|| SyncError::UnexpectedResponse("Sync item without ServerId".into()))
}

fn with_server_id(server_id: &str) -> TaggedNode {
    TaggedNode::new(ns::AIR_SYNC).with_text("ServerId", server_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eas_core::{ContactObject, EntityObject};

    fn contact_data(name: &str) -> TaggedNode {
        let mut contact = ContactObject::default();
        contact.name.first = Some(name.into());
        EntityObject::Contact(contact).to_application_data()
    }

    #[test]
    fn test_initial_request_is_bare() {
        let doc = SyncRequest::initial("8").to_document();
        let collection = doc.path(&["Sync", "Collections", "Collection"]).unwrap();
        assert_eq!(collection.text("SyncKey"), Some("0"));
        assert_eq!(collection.text("CollectionId"), Some("8"));
        assert!(!collection.contains("GetChanges"));
        assert!(!collection.contains("Options"));
        assert!(!collection.contains("Commands"));
    }

    #[test]
    fn test_pull_request_element_order() {
        let doc = SyncRequest::pull("42", "8", 50).to_document();
        let collection = doc.path(&["Sync", "Collections", "Collection"]).unwrap();
        let tags: Vec<_> = collection.children().map(|(tag, _)| tag).collect();
        assert_eq!(tags, vec!["SyncKey", "CollectionId", "GetChanges", "WindowSize", "Options"]);
        assert_eq!(
            collection.path(&["Options", "BodyPreference"]).unwrap().text("Type"),
            Some("1")
        );
    }

    #[test]
    fn test_push_request_survives_wire() {
        let request = SyncRequest::push(
            "42",
            "8",
            vec![
                ClientCommand::Add {
                    client_id: "c-1".into(),
                    data: contact_data("Ann"),
                },
                ClientCommand::Change {
                    server_id: "8:3".into(),
                    data: contact_data("Bob"),
                },
                ClientCommand::Delete {
                    server_id: "8:4".into(),
                },
            ],
        );

        let bytes = wbxml::encode(&request.to_document()).unwrap();
        let parsed = SyncRequest::parse(&wbxml::decode(&bytes).unwrap()).unwrap();
        assert_eq!(parsed.sync_key, "42");
        assert!(!parsed.get_changes);
        assert_eq!(parsed.commands.len(), 3);
        assert!(matches!(&parsed.commands[2], ClientCommand::Delete { server_id } if server_id == "8:4"));
    }

    #[test]
    fn test_response_with_commands_and_responses() {
        let response = SyncResponse {
            status: STATUS_SUCCESS,
            sync_key: Some("43".into()),
            collection_id: Some("8".into()),
            more_available: true,
            commands: vec![
                ServerCommand::Add {
                    server_id: "8:1".into(),
                    data: contact_data("Ann"),
                },
                ServerCommand::SoftDelete {
                    server_id: "8:2".into(),
                },
            ],
            add_responses: vec![AddResponse {
                client_id: "c-1".into(),
                server_id: Some("8:9".into()),
                status: STATUS_SUCCESS,
            }],
            change_responses: vec![ChangeResponse {
                server_id: "8:3".into(),
                status: STATUS_OBJECT_NOT_FOUND,
            }],
        };

        let bytes = wbxml::encode(&response.to_document()).unwrap();
        let decoded = wbxml::decode(&bytes).unwrap();
        let parsed = SyncResponse::parse(Some(&decoded)).unwrap();
        assert_eq!(parsed, response);
        assert_eq!(parsed.commands[1].server_id(), "8:2");
    }

    #[test]
    fn test_commands_grouped_by_kind() {
        let response = SyncResponse {
            status: STATUS_SUCCESS,
            sync_key: Some("44".into()),
            commands: vec![
                ServerCommand::Delete {
                    server_id: "8:5".into(),
                },
                ServerCommand::Change {
                    server_id: "8:4".into(),
                    data: contact_data("Bo"),
                },
                ServerCommand::Add {
                    server_id: "8:6".into(),
                    data: contact_data("Cy"),
                },
            ],
            ..Default::default()
        };

        let parsed = SyncResponse::parse(Some(&response.to_document())).unwrap();
        let order: Vec<_> = parsed.commands.iter().map(ServerCommand::server_id).collect();
        assert_eq!(order, vec!["8:6", "8:4", "8:5"]);
        assert!(matches!(parsed.commands[2], ServerCommand::Delete { .. }));
    }

    #[test]
    fn test_empty_body_means_no_changes() {
        let parsed = SyncResponse::parse(None).unwrap();
        assert!(parsed.is_success());
        assert!(parsed.sync_key.is_none());
        assert!(parsed.commands.is_empty());
        assert!(!parsed.more_available);
    }

    #[test]
    fn test_top_level_status_only() {
        let doc = wbxml::document("Sync", TaggedNode::new(ns::AIR_SYNC).with_text("Status", "4"));
        let parsed = SyncResponse::parse(Some(&doc)).unwrap();
        assert_eq!(parsed.status, 4);
        assert!(!parsed.is_success());
    }

    #[test]
    fn test_invalid_key_status_parsed() {
        let response = SyncResponse {
            status: STATUS_INVALID_KEY,
            sync_key: Some("0".into()),
            collection_id: Some("8".into()),
            ..Default::default()
        };
        let parsed = SyncResponse::parse(Some(&response.to_document())).unwrap();
        assert_eq!(parsed.status, STATUS_INVALID_KEY);
    }
}
