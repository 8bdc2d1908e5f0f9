//! # ActiveSync Commands
//!
//! Request builders and response parsers for the two commands the bridge
//! speaks. Everything here works on [`TaggedNode`] trees; the transport
//! only ever sees encoded WBXML bytes.
//!
//! ## Exchange
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        One Command Round Trip                           │
//! │                                                                         │
//! │  FolderSyncRequest / SyncRequest                                       │
//! │       │ to_document()                                                  │
//! │       ▼                                                                 │
//! │  TaggedNode ──► wbxml::encode ──► RemoteTransport::post (HTTP POST)    │
//! │                                          │                              │
//! │                                          ▼                              │
//! │  FolderSyncResponse / SyncResponse ◄── wbxml::decode (or empty body)   │
//! │       parse()                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod folder;
pub mod sync;

pub use folder::{FolderSyncRequest, FolderSyncResponse, RemoteFolder};
pub use sync::{
    AddResponse, ChangeResponse, ClientCommand, ServerCommand, SyncRequest, SyncResponse,
};

use std::fmt;

use tracing::trace;

use crate::error::{SyncError, SyncResult};
use crate::transport::{Credentials, RemoteRequest, RemoteTransport};
use eas_core::{wbxml, TaggedNode};

/// Command-level status meaning success, for every command.
pub const STATUS_SUCCESS: u32 = 1;

/// The ActiveSync commands the bridge issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    FolderSync,
    Sync,
}

impl Command {
    /// Value of the `Cmd` query parameter and the document's command element.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::FolderSync => "FolderSync",
            Command::Sync => "Sync",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encodes `document`, posts it and decodes the reply.
///
/// An empty response body is returned as `None`; for Sync it means the
/// remote has nothing to report.
pub async fn exchange(
    remote: &dyn RemoteTransport,
    command: Command,
    credentials: &Credentials,
    document: &TaggedNode,
) -> SyncResult<Option<TaggedNode>> {
    let body = wbxml::encode(document)?;
    trace!(%command, bytes = body.len(), "Posting request");

    let response = remote
        .post(RemoteRequest {
            command,
            credentials: credentials.clone(),
            body,
        })
        .await?;

    if response.is_empty() {
        trace!(%command, "Empty response body");
        return Ok(None);
    }

    let document = wbxml::decode(&response)?;
    Ok(Some(document))
}

/// Parses a decimal `Status` element.
pub(crate) fn parse_status(command: Command, node: &TaggedNode) -> SyncResult<Option<u32>> {
    match node.text("Status") {
        None => Ok(None),
        Some(text) => text.trim().parse().map(Some).map_err(|_| {
            SyncError::UnexpectedResponse(format!("{command} status is not a number: {text}"))
        }),
    }
}

/// Takes the command element out of a decoded document.
pub(crate) fn command_element<'a>(
    command: Command,
    document: &'a TaggedNode,
) -> SyncResult<&'a TaggedNode> {
    document.node(command.as_str()).ok_or_else(|| {
        SyncError::UnexpectedResponse(format!("response has no {command} element"))
    })
}
