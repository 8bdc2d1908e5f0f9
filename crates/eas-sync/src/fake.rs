//! In-process ActiveSync endpoint for engine tests.
//!
//! Decodes the real WBXML requests the pass sends and answers with real WBXML
//! responses, keeping one mailbox per username with its own folder hierarchy,
//! items and sync keys.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::protocol::folder::STATUS_INVALID_KEY as FOLDER_INVALID_KEY;
use crate::protocol::sync::{STATUS_INVALID_KEY, STATUS_OBJECT_NOT_FOUND};
use crate::protocol::{
    AddResponse, ChangeResponse, ClientCommand, Command, FolderSyncRequest, FolderSyncResponse,
    RemoteFolder, ServerCommand, SyncRequest, SyncResponse, STATUS_SUCCESS,
};
use crate::transport::{RemoteRequest, RemoteTransport};
use eas_core::{wbxml, TaggedNode, INITIAL_SYNC_KEY};

pub(crate) const CONTACTS: &str = "8";
pub(crate) const CALENDAR: &str = "9";
pub(crate) const TASKS: &str = "10";
pub(crate) const INBOX: &str = "2";

#[derive(Debug, Default)]
struct Folder {
    items: BTreeMap<String, TaggedNode>,
    /// Changes not yet delivered to the client, oldest first.
    pending: VecDeque<ServerCommand>,
    sync_key: u32,
}

#[derive(Debug, Default)]
struct Mailbox {
    hierarchy: Vec<RemoteFolder>,
    hierarchy_key: u32,
    added_folders: Vec<RemoteFolder>,
    deleted_folders: Vec<String>,
    folders: HashMap<String, Folder>,
    next_item: u32,
    /// Every client command received, in order.
    received: Vec<ClientCommand>,
    /// Requests seen, by command.
    requests: Vec<Command>,
}

impl Mailbox {
    fn with_default_folders() -> Self {
        let mut mailbox = Mailbox::default();
        mailbox.add_folder(INBOX, "Inbox", 2);
        mailbox.add_folder(CONTACTS, "Contacts", 9);
        mailbox.add_folder(CALENDAR, "Calendar", 8);
        mailbox.add_folder(TASKS, "Tasks", 7);
        mailbox.added_folders.clear();
        mailbox
    }

    fn add_folder(&mut self, server_id: &str, name: &str, folder_type: u32) {
        let folder = RemoteFolder {
            server_id: server_id.into(),
            parent_id: "0".into(),
            display_name: name.into(),
            folder_type,
        };
        self.hierarchy.push(folder.clone());
        self.added_folders.push(folder);
        self.folders.entry(server_id.to_string()).or_default();
    }

    fn folder_sync(&mut self, request: FolderSyncRequest) -> FolderSyncResponse {
        let expected = self.hierarchy_key.to_string();
        if request.sync_key != INITIAL_SYNC_KEY && request.sync_key != expected {
            return FolderSyncResponse {
                status: FOLDER_INVALID_KEY,
                ..Default::default()
            };
        }

        let (added, deleted) = if request.sync_key == INITIAL_SYNC_KEY {
            self.added_folders.clear();
            self.deleted_folders.clear();
            (self.hierarchy.clone(), Vec::new())
        } else {
            (
                std::mem::take(&mut self.added_folders),
                std::mem::take(&mut self.deleted_folders),
            )
        };

        self.hierarchy_key += 1;
        FolderSyncResponse {
            status: STATUS_SUCCESS,
            sync_key: Some(self.hierarchy_key.to_string()),
            added,
            updated: Vec::new(),
            deleted,
        }
    }

    fn sync(&mut self, request: SyncRequest) -> Option<SyncResponse> {
        let next_id = &mut self.next_item;
        let folder = self.folders.entry(request.collection_id.clone()).or_default();

        if request.sync_key == INITIAL_SYNC_KEY {
            folder.sync_key = 1;
            folder.pending = folder
                .items
                .iter()
                .map(|(server_id, data)| ServerCommand::Add {
                    server_id: server_id.clone(),
                    data: data.clone(),
                })
                .collect();
            return Some(SyncResponse {
                status: STATUS_SUCCESS,
                sync_key: Some("1".into()),
                collection_id: Some(request.collection_id),
                ..Default::default()
            });
        }

        if request.sync_key != folder.sync_key.to_string() {
            return Some(SyncResponse {
                status: STATUS_INVALID_KEY,
                sync_key: Some(INITIAL_SYNC_KEY.into()),
                collection_id: Some(request.collection_id),
                ..Default::default()
            });
        }

        let mut response = SyncResponse {
            status: STATUS_SUCCESS,
            collection_id: Some(request.collection_id.clone()),
            ..Default::default()
        };

        for command in &request.commands {
            self.received.push(command.clone());
            match command {
                ClientCommand::Add { client_id, data } => {
                    *next_id += 1;
                    let server_id = format!("{}:{}", request.collection_id, next_id);
                    folder.items.insert(server_id.clone(), data.clone());
                    response.add_responses.push(AddResponse {
                        client_id: client_id.clone(),
                        server_id: Some(server_id),
                        status: STATUS_SUCCESS,
                    });
                }
                ClientCommand::Change { server_id, data } => match folder.items.get_mut(server_id) {
                    Some(item) => *item = data.clone(),
                    None => response.change_responses.push(ChangeResponse {
                        server_id: server_id.clone(),
                        status: STATUS_OBJECT_NOT_FOUND,
                    }),
                },
                ClientCommand::Delete { server_id } => {
                    folder.items.remove(server_id);
                }
            }
        }

        if request.get_changes {
            let window = request.window_size.max(1) as usize;
            let take = window.min(folder.pending.len());
            response.commands = folder.pending.drain(..take).collect();
            response.more_available = !folder.pending.is_empty();
        }

        // Nothing to say: real servers answer with an empty body.
        if request.commands.is_empty() && response.commands.is_empty() {
            return None;
        }

        folder.sync_key += 1;
        response.sync_key = Some(folder.sync_key.to_string());
        Some(response)
    }
}

/// Fake remote shared by a test and the pass under test.
#[derive(Debug, Default)]
pub(crate) struct FakeRemote {
    mailboxes: Mutex<HashMap<String, Mailbox>>,
    rejected: Mutex<HashSet<String>>,
    /// Delay before answering a Sync request.
    sync_latency: Mutex<Option<Duration>>,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        FakeRemote::default()
    }

    fn with_mailbox<T>(&self, username: &str, f: impl FnOnce(&mut Mailbox) -> T) -> T {
        let mut mailboxes = self.mailboxes.lock().unwrap();
        let mailbox = mailboxes
            .entry(username.to_string())
            .or_insert_with(Mailbox::with_default_folders);
        f(mailbox)
    }

    /// Answers every request from `username` with HTTP 401.
    pub(crate) fn reject(&self, username: &str) {
        self.rejected.lock().unwrap().insert(username.to_string());
    }

    pub(crate) fn slow_sync(&self, latency: Duration) {
        *self.sync_latency.lock().unwrap() = Some(latency);
    }

    pub(crate) fn add_folder(&self, username: &str, server_id: &str, name: &str, folder_type: u32) {
        self.with_mailbox(username, |m| m.add_folder(server_id, name, folder_type));
    }

    pub(crate) fn delete_folder(&self, username: &str, server_id: &str) {
        self.with_mailbox(username, |m| {
            m.hierarchy.retain(|f| f.server_id != server_id);
            m.folders.remove(server_id);
            m.deleted_folders.push(server_id.to_string());
        });
    }

    /// Forgets the hierarchy key so the next FolderSync gets status 9.
    pub(crate) fn invalidate_hierarchy(&self, username: &str) {
        self.with_mailbox(username, |m| m.hierarchy_key += 100);
    }

    /// Forgets the folder's sync key so the next Sync gets status 3.
    pub(crate) fn invalidate_key(&self, username: &str, folder: &str) {
        self.with_mailbox(username, |m| {
            if let Some(f) = m.folders.get_mut(folder) {
                f.sync_key += 100;
            }
        });
    }

    /// Creates an item on the remote side and queues it for delivery.
    pub(crate) fn remote_add(&self, username: &str, folder: &str, data: TaggedNode) -> String {
        self.with_mailbox(username, |m| {
            m.next_item += 1;
            let server_id = format!("{folder}:{}", m.next_item);
            let f = m.folders.entry(folder.to_string()).or_default();
            f.items.insert(server_id.clone(), data.clone());
            f.pending.push_back(ServerCommand::Add {
                server_id: server_id.clone(),
                data,
            });
            server_id
        })
    }

    pub(crate) fn remote_change(&self, username: &str, folder: &str, server_id: &str, data: TaggedNode) {
        self.with_mailbox(username, |m| {
            let f = m.folders.entry(folder.to_string()).or_default();
            f.items.insert(server_id.to_string(), data.clone());
            f.pending.push_back(ServerCommand::Change {
                server_id: server_id.to_string(),
                data,
            });
        });
    }

    pub(crate) fn remote_delete(&self, username: &str, folder: &str, server_id: &str) {
        self.with_mailbox(username, |m| {
            let f = m.folders.entry(folder.to_string()).or_default();
            f.items.remove(server_id);
            f.pending.push_back(ServerCommand::Delete {
                server_id: server_id.to_string(),
            });
        });
    }

    pub(crate) fn item(&self, username: &str, folder: &str, server_id: &str) -> Option<TaggedNode> {
        self.with_mailbox(username, |m| {
            m.folders.get(folder).and_then(|f| f.items.get(server_id).cloned())
        })
    }

    pub(crate) fn item_count(&self, username: &str, folder: &str) -> usize {
        self.with_mailbox(username, |m| m.folders.get(folder).map_or(0, |f| f.items.len()))
    }

    pub(crate) fn received(&self, username: &str) -> Vec<ClientCommand> {
        self.with_mailbox(username, |m| m.received.clone())
    }

    pub(crate) fn request_count(&self, username: &str, command: Command) -> usize {
        self.with_mailbox(username, |m| m.requests.iter().filter(|c| **c == command).count())
    }
}

#[async_trait]
impl RemoteTransport for FakeRemote {
    async fn post(&self, request: RemoteRequest) -> SyncResult<Vec<u8>> {
        let username = request.credentials.username.clone();
        if self.rejected.lock().unwrap().contains(&username) {
            return Err(SyncError::AuthenticationFailed(username));
        }

        let latency = *self.sync_latency.lock().unwrap();
        if let (Command::Sync, Some(latency)) = (request.command, latency) {
            tokio::time::sleep(latency).await;
        }

        let document = wbxml::decode(&request.body)?;
        let response = self.with_mailbox(&username, |mailbox| -> SyncResult<Option<TaggedNode>> {
            mailbox.requests.push(request.command);
            Ok(match request.command {
                Command::FolderSync => {
                    let parsed = FolderSyncRequest::parse(&document)?;
                    Some(mailbox.folder_sync(parsed).to_document())
                }
                Command::Sync => {
                    let parsed = SyncRequest::parse(&document)?;
                    mailbox.sync(parsed).map(|r| r.to_document())
                }
            })
        })?;

        match response {
            Some(document) => Ok(wbxml::encode(&document)?),
            None => Ok(Vec::new()),
        }
    }
}
