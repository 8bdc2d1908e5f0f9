//! WBXML encoder: [`TaggedNode`] tree → byte stream.
//!
//! Children are written in stored order. A sequence slot repeats its tag once
//! per element, which is how ActiveSync itself expresses multiplicity.

use std::io::Write;

use crate::codepage::CodePageRegistry;
use crate::error::{CodecError, CodecResult};
use crate::model::{ChildSlot, TaggedChild, TaggedNode, TaggedProperty, TaggedValue};

use super::{mbuint, tokens};

/// Streaming encoder over any writer.
pub struct Encoder<'a, W> {
    writer: W,
    registry: &'a dyn CodePageRegistry,
    page: u8,
}

impl<'a, W: Write> Encoder<'a, W> {
    pub fn new(writer: W, registry: &'a dyn CodePageRegistry) -> Self {
        Self {
            writer,
            registry,
            page: 0,
        }
    }

    /// Writes the header followed by every top-level child of `root`.
    pub fn encode(mut self, root: &TaggedNode) -> CodecResult<W> {
        self.write_header()?;
        self.write_children(root)?;
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn write_header(&mut self) -> CodecResult<()> {
        self.writer.write_all(&[tokens::VERSION_1_3])?;
        mbuint::write(&mut self.writer, tokens::PUBLIC_ID_UNKNOWN)?;
        mbuint::write(&mut self.writer, tokens::CHARSET_UTF8)?;
        mbuint::write(&mut self.writer, 0)?;
        Ok(())
    }

    fn write_children(&mut self, node: &TaggedNode) -> CodecResult<()> {
        for (tag, slot) in node.children() {
            match slot {
                ChildSlot::Empty => {}
                ChildSlot::Single(child) => self.write_child(tag, child)?,
                ChildSlot::Sequence(items) => {
                    for child in items {
                        self.write_child(tag, child)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn write_child(&mut self, tag: &str, child: &TaggedChild) -> CodecResult<()> {
        let token = self.select_token(child.namespace(), tag)?;
        match child {
            TaggedChild::Node(node) if node.is_empty() => {
                self.writer.write_all(&[token])?;
            }
            TaggedChild::Node(node) => {
                self.writer.write_all(&[token | tokens::TAG_CONTENT])?;
                self.write_children(node)?;
                self.writer.write_all(&[tokens::END])?;
            }
            TaggedChild::Property(property) => {
                self.writer.write_all(&[token | tokens::TAG_CONTENT])?;
                self.write_value(tag, property)?;
                self.writer.write_all(&[tokens::END])?;
            }
        }
        Ok(())
    }

    /// Resolves the token for `tag`, switching pages first if needed.
    fn select_token(&mut self, namespace: &str, tag: &str) -> CodecResult<u8> {
        let page = self
            .registry
            .page_for_namespace(namespace)
            .ok_or_else(|| CodecError::UnknownNamespace(namespace.to_string()))?;
        let token = self
            .registry
            .token_for_name(page, tag)
            .ok_or_else(|| CodecError::unknown_tag(namespace, tag))?;

        if page != self.page {
            self.writer.write_all(&[tokens::SWITCH_PAGE, page])?;
            self.page = page;
        }
        Ok(token)
    }

    fn write_value(&mut self, tag: &str, property: &TaggedProperty) -> CodecResult<()> {
        match &property.value {
            TaggedValue::Text(text) => {
                if text.as_bytes().contains(&0) {
                    return Err(CodecError::InvalidLength(format!(
                        "{tag}: inline string contains a NUL byte"
                    )));
                }
                self.writer.write_all(&[tokens::STR_I])?;
                self.writer.write_all(text.as_bytes())?;
                self.writer.write_all(&[0])?;
            }
            TaggedValue::Opaque(bytes) => {
                let len = u32::try_from(bytes.len()).map_err(|_| {
                    CodecError::InvalidLength(format!("{tag}: opaque value too large"))
                })?;
                self.writer.write_all(&[tokens::OPAQUE])?;
                mbuint::write(&mut self.writer, len)?;
                self.writer.write_all(bytes)?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codepage::{ns, ActiveSyncCodePages};
    use crate::wbxml::{decode, encode};

    fn sync_request() -> TaggedNode {
        let collection = TaggedNode::new(ns::AIR_SYNC)
            .with_text("SyncKey", "0")
            .with_text("CollectionId", "8")
            .with_text("GetChanges", "0");
        let collections = TaggedNode::new(ns::AIR_SYNC).with_node("Collection", collection);
        let sync = TaggedNode::new(ns::AIR_SYNC).with_node("Collections", collections);
        TaggedNode::new(ns::AIR_SYNC).with_node("Sync", sync)
    }

    #[test]
    fn test_header_and_exact_bytes() {
        let bytes = encode(&sync_request()).unwrap();
        let expected: Vec<u8> = vec![
            0x03, 0x01, 0x6A, 0x00, // header
            0x45, // Sync
            0x5C, // Collections
            0x4F, // Collection
            0x4B, 0x03, b'0', 0x00, 0x01, // SyncKey
            0x52, 0x03, b'8', 0x00, 0x01, // CollectionId
            0x53, 0x03, b'0', 0x00, 0x01, // GetChanges
            0x01, 0x01, 0x01,
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_folder_sync_request_scenario() {
        let bytes = encode(&sync_request()).unwrap();
        let decoded = decode(&bytes).unwrap();

        let collection = decoded
            .path(&["Sync", "Collections", "Collection"])
            .unwrap();
        assert_eq!(collection.text("SyncKey"), Some("0"));
        assert_eq!(collection.text("CollectionId"), Some("8"));
        assert_eq!(collection.text("GetChanges"), Some("0"));
        assert_eq!(decoded, sync_request());
    }

    #[test]
    fn test_round_trip_across_pages() {
        let mut body = TaggedNode::new(ns::AIR_SYNC_BASE);
        body.push_text("Type", "1");
        body.push_text("Data", "Hello");

        let mut data = TaggedNode::new(ns::AIR_SYNC);
        data.push_text_ns(ns::CONTACTS, "FileAs", "Doe, Jane");
        data.push_text_ns(ns::CONTACTS, "Email1Address", "jane@example.com");
        data.push_node("Body", body);
        data.push_text_ns(ns::CONTACTS2, "NickName", "JD");
        data.attach(
            "Picture",
            TaggedProperty::opaque(ns::CONTACTS, vec![0x00, 0x01, 0xFF]),
        );

        let mut add = TaggedNode::new(ns::AIR_SYNC);
        add.push_text("ServerId", "1:1");
        add.push_node("ApplicationData", data);
        add.push_node("MoreAvailable", TaggedNode::new(ns::AIR_SYNC));

        let root = TaggedNode::new(ns::AIR_SYNC).with_node("Add", add);
        let decoded = decode(&encode(&root).unwrap()).unwrap();
        assert_eq!(decoded, root);
    }

    #[test]
    fn test_sequences_repeat_tag() {
        let mut folders = TaggedNode::new(ns::FOLDER_HIERARCHY);
        for name in ["Contacts", "Calendar", "Tasks"] {
            folders.push_node(
                "Folder",
                TaggedNode::new(ns::FOLDER_HIERARCHY).with_text("DisplayName", name),
            );
        }
        let root = TaggedNode::new(ns::AIR_SYNC).with_node("Folders", folders);

        let decoded = decode(&encode(&root).unwrap()).unwrap();
        assert_eq!(decoded, root);
        let names: Vec<_> = decoded
            .node("Folders")
            .unwrap()
            .nodes("Folder")
            .filter_map(|f| f.text("DisplayName"))
            .collect();
        assert_eq!(names, vec!["Contacts", "Calendar", "Tasks"]);
    }

    #[test]
    fn test_empty_node_has_no_content_bit() {
        let root = TaggedNode::new(ns::AIR_SYNC).with_node("Sync", TaggedNode::new(ns::AIR_SYNC));
        let bytes = encode(&root).unwrap();
        assert_eq!(&bytes[4..], &[0x05]);
    }

    #[test]
    fn test_unknown_tag_fails() {
        let root = TaggedNode::new(ns::AIR_SYNC).with_text("FileAs", "x");
        let err = encode(&root).unwrap_err();
        assert!(matches!(err, CodecError::UnknownTag { ref tag, .. } if tag == "FileAs"));
    }

    #[test]
    fn test_unknown_namespace_fails() {
        let root = TaggedNode::new("Bogus").with_text("Sync", "x");
        let err = encode(&root).unwrap_err();
        assert!(matches!(err, CodecError::UnknownNamespace(_)));
    }

    #[test]
    fn test_encoder_into_writer() {
        let out = Encoder::new(Vec::new(), ActiveSyncCodePages::global())
            .encode(&sync_request())
            .unwrap();
        assert_eq!(out, encode(&sync_request()).unwrap());
    }
}
