//! # WBXML Codec
//!
//! Binary XML as spoken by ActiveSync: per-namespace code pages, inline and
//! opaque strings, no attributes, no string table references.
//!
//! ```text
//!   bytes ──► Decoder ──► TaggedNode ──► (objects, protocol parsers)
//!   bytes ◄── Encoder ◄── TaggedNode ◄── (objects, protocol builders)
//! ```
//!
//! [`decode`] and [`encode`] use the process-wide ActiveSync code pages.
//! Build a [`Decoder`]/[`Encoder`] directly to use another registry.

mod decoder;
mod encoder;
pub mod mbuint;
pub mod tokens;

pub use decoder::{Decoder, MAX_DEPTH};
pub use encoder::Encoder;

use crate::codepage::{ns, ActiveSyncCodePages};
use crate::error::CodecResult;
use crate::model::TaggedNode;

/// MIME type of WBXML request and response bodies.
pub const CONTENT_TYPE: &str = "application/vnd.ms-sync.wbxml";

/// Decodes a complete document with the standard ActiveSync code pages.
pub fn decode(bytes: &[u8]) -> CodecResult<TaggedNode> {
    Decoder::new(bytes, ActiveSyncCodePages::global()).decode()
}

/// Encodes a document with the standard ActiveSync code pages.
pub fn encode(root: &TaggedNode) -> CodecResult<Vec<u8>> {
    Encoder::new(Vec::new(), ActiveSyncCodePages::global()).encode(root)
}

/// Wraps a command element (`Sync`, `FolderSync`, ...) in a document root.
pub fn document(tag: &str, command: TaggedNode) -> TaggedNode {
    TaggedNode::new(ns::AIR_SYNC).with_node(tag, command)
}
