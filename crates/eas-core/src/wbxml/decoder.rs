//! WBXML decoder: byte stream → [`TaggedNode`] tree.
//!
//! ```text
//! ┌────────┬──────────┬─────────┬─────────┬──────────────┬───────────────────┐
//! │version │ publicId │ [index] │ charset │ strtbl len+… │ body tokens → EOF │
//! └────────┴──────────┴─────────┴─────────┴──────────────┴───────────────────┘
//! ```
//!
//! The active code page is decoder-wide state: a SWITCH_PAGE inside an element
//! stays in force after its END.

use std::io::{self, Read};

use crate::codepage::CodePageRegistry;
use crate::error::{CodecError, CodecResult};
use crate::model::{TaggedChild, TaggedNode, TaggedProperty, TaggedValue};

use super::{mbuint, tokens};

/// Deepest element nesting accepted. ActiveSync documents stay under ten.
pub const MAX_DEPTH: usize = 64;

/// Streaming decoder over any reader.
pub struct Decoder<'a, R> {
    reader: R,
    registry: &'a dyn CodePageRegistry,
    page: u8,
}

/// Character data collected inside one element.
enum Content {
    None,
    Text(String),
    Opaque(Vec<u8>),
}

impl Content {
    fn append(&mut self, value: TaggedValue) {
        let current = std::mem::replace(self, Content::None);
        *self = match (current, value) {
            (Content::None, TaggedValue::Text(s)) => Content::Text(s),
            (Content::None, TaggedValue::Opaque(b)) => Content::Opaque(b),
            (Content::Text(mut a), TaggedValue::Text(b)) => {
                a.push_str(&b);
                Content::Text(a)
            }
            (Content::Text(a), TaggedValue::Opaque(b)) => {
                let mut bytes = a.into_bytes();
                bytes.extend_from_slice(&b);
                Content::Opaque(bytes)
            }
            (Content::Opaque(mut a), TaggedValue::Text(b)) => {
                a.extend_from_slice(b.as_bytes());
                Content::Opaque(a)
            }
            (Content::Opaque(mut a), TaggedValue::Opaque(b)) => {
                a.extend_from_slice(&b);
                Content::Opaque(a)
            }
        };
    }

    fn into_value(self) -> Option<TaggedValue> {
        match self {
            Content::None => None,
            Content::Text(s) => Some(TaggedValue::Text(s)),
            Content::Opaque(b) => Some(TaggedValue::Opaque(b)),
        }
    }
}

impl<'a, R: Read> Decoder<'a, R> {
    pub fn new(reader: R, registry: &'a dyn CodePageRegistry) -> Self {
        Self {
            reader,
            registry,
            page: 0,
        }
    }

    /// Decodes a whole document.
    ///
    /// The returned root is a container in the page-0 namespace whose children
    /// are the document's top-level elements.
    pub fn decode(mut self) -> CodecResult<TaggedNode> {
        self.read_header()?;

        let root_namespace = self
            .registry
            .namespace(0)
            .ok_or(CodecError::InvalidCodePage(0))?
            .to_string();
        let mut root = TaggedNode::new(root_namespace);

        while let Some(byte) = self.next_byte()? {
            match byte {
                tokens::SWITCH_PAGE => self.switch_page()?,
                tokens::END => return Err(CodecError::UnexpectedEnd),
                tokens::STR_I | tokens::OPAQUE => {
                    return Err(CodecError::MixedContent("document root".into()))
                }
                _ => {
                    let (tag, child) = self.read_element(byte, 1)?;
                    root.attach(tag, child);
                }
            }
        }

        Ok(root)
    }

    // =========================================================================
    // Header
    // =========================================================================

    fn read_header(&mut self) -> CodecResult<()> {
        let version = self
            .next_byte()?
            .ok_or(CodecError::Truncated("header"))?;
        if !tokens::SUPPORTED_VERSIONS.contains(&version) {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let public_id = mbuint::read(&mut self.reader)?;
        if public_id == 0 {
            // Public id given as a string table index.
            mbuint::read(&mut self.reader)?;
        }
        let _charset = mbuint::read(&mut self.reader)?;

        let table_len = u64::from(mbuint::read(&mut self.reader)?);
        let skipped = io::copy(&mut (&mut self.reader).take(table_len), &mut io::sink())?;
        if skipped != table_len {
            return Err(CodecError::Truncated("string table"));
        }
        Ok(())
    }

    // =========================================================================
    // Body
    // =========================================================================

    fn read_element(&mut self, byte: u8, depth: usize) -> CodecResult<(String, TaggedChild)> {
        if tokens::is_unsupported(byte) {
            return Err(CodecError::UnsupportedToken(byte));
        }
        if byte & tokens::TAG_ATTRIBUTES != 0 {
            return Err(CodecError::UnsupportedAttributes(byte));
        }
        if depth > MAX_DEPTH {
            return Err(CodecError::NestingTooDeep(MAX_DEPTH));
        }

        let page = self.page;
        let id = byte & tokens::TAG_ID_MASK;
        let tag = match self.registry.name_for_token(page, id) {
            Some(name) => name.to_string(),
            None => format!("Unknown_0x{page:02X}_0x{id:02X}"),
        };
        let namespace = self
            .registry
            .namespace(page)
            .ok_or(CodecError::InvalidCodePage(page))?
            .to_string();

        if byte & tokens::TAG_CONTENT == 0 {
            return Ok((tag, TaggedNode::new(namespace).into()));
        }

        let mut node = TaggedNode::new(namespace);
        let mut content = Content::None;
        loop {
            let byte = self
                .next_byte()?
                .ok_or(CodecError::Truncated("open element"))?;
            match byte {
                tokens::SWITCH_PAGE => self.switch_page()?,
                tokens::END => break,
                tokens::STR_I => content.append(TaggedValue::Text(self.read_inline_string()?)),
                tokens::OPAQUE => content.append(TaggedValue::Opaque(self.read_opaque()?)),
                _ => {
                    let (child_tag, child) = self.read_element(byte, depth + 1)?;
                    node.attach(child_tag, child);
                }
            }
        }

        match content.into_value() {
            None => Ok((tag, node.into())),
            Some(_) if !node.is_empty() => Err(CodecError::MixedContent(tag)),
            Some(value) => {
                let property = TaggedProperty {
                    namespace: node.namespace,
                    value,
                };
                Ok((tag, property.into()))
            }
        }
    }

    fn switch_page(&mut self) -> CodecResult<()> {
        let page = self
            .next_byte()?
            .ok_or(CodecError::Truncated("SWITCH_PAGE operand"))?;
        if !self.registry.contains_page(page) {
            return Err(CodecError::InvalidCodePage(page));
        }
        self.page = page;
        Ok(())
    }

    fn read_inline_string(&mut self) -> CodecResult<String> {
        let mut bytes = Vec::new();
        loop {
            match self.next_byte()? {
                Some(0) => break,
                Some(b) => bytes.push(b),
                None => return Err(CodecError::Truncated("inline string")),
            }
        }
        Ok(String::from_utf8(bytes)?)
    }

    fn read_opaque(&mut self) -> CodecResult<Vec<u8>> {
        let len = mbuint::read(&mut self.reader)? as usize;
        let mut data = Vec::new();
        (&mut self.reader).take(len as u64).read_to_end(&mut data)?;
        if data.len() != len {
            return Err(CodecError::Truncated("opaque data"));
        }
        Ok(data)
    }

    fn next_byte(&mut self) -> CodecResult<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
