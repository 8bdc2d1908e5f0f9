//! # Error Types
//!
//! Domain-specific error types for eas-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  eas-core errors (this file)                                           │
//! │  ├── CodecError       - WBXML decode/encode failures                   │
//! │  └── CoreError        - Object model conversion failures               │
//! │                                                                         │
//! │  eas-db errors (separate crate)                                        │
//! │  └── DbError          - Storage and lease failures                     │
//! │                                                                         │
//! │  eas-sync errors (separate crate)                                      │
//! │  └── SyncError        - Transport, protocol, pass failures             │
//! │                                                                         │
//! │  Flow: CodecError → CoreError → SyncError → logged per user            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include the offending byte, page or tag in the message
//! 3. Decode errors are fatal to the whole document: no partial trees

use thiserror::Error;

// =============================================================================
// Codec Error
// =============================================================================

/// WBXML codec errors.
///
/// Every decode error aborts the current document. The caller treats the whole
/// remote response as invalid.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Header version byte is not one of the recognized WBXML versions.
    #[error("Unsupported WBXML version: 0x{0:02X}")]
    UnsupportedVersion(u8),

    /// SWITCH_PAGE selected a page the registry doesn't know.
    #[error("Invalid code page: {0}")]
    InvalidCodePage(u8),

    /// A global token this protocol profile never uses (ENTITY, LITERAL, PI, EXT_*, STR_T).
    #[error("Unsupported WBXML token: 0x{0:02X}")]
    UnsupportedToken(u8),

    /// A tag token with the attribute bit set.
    #[error("Attributes are not supported (tag token 0x{0:02X})")]
    UnsupportedAttributes(u8),

    /// The stream ended inside the header, a string or an open element.
    #[error("Truncated WBXML stream: {0}")]
    Truncated(&'static str),

    /// A multi-byte integer overflowed or a length prefix is unusable.
    #[error("Invalid length field: {0}")]
    InvalidLength(String),

    /// Inline string is not valid UTF-8.
    #[error("Invalid inline string: {0}")]
    InvalidString(#[from] std::string::FromUtf8Error),

    /// END token at document level with no open element.
    #[error("Unexpected END token outside of an element")]
    UnexpectedEnd,

    /// Element holds both child elements and a text/opaque value.
    #[error("Element {0} mixes child elements and character data")]
    MixedContent(String),

    /// Nesting deeper than any ActiveSync document legitimately goes.
    #[error("Element nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// Encoder was asked for a tag that isn't in the namespace's code page.
    #[error("Tag {tag} is not defined in namespace {namespace}")]
    UnknownTag { namespace: String, tag: String },

    /// Encoder was asked for a namespace with no code page.
    #[error("No code page registered for namespace {0}")]
    UnknownNamespace(String),

    /// Underlying reader/writer failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Builds an `UnknownTag` error.
    pub fn unknown_tag(namespace: impl Into<String>, tag: impl Into<String>) -> Self {
        CodecError::UnknownTag {
            namespace: namespace.into(),
            tag: tag.into(),
        }
    }

    /// Returns true for errors caused by the remote document rather than our own tree.
    pub fn is_decode_error(&self) -> bool {
        !matches!(
            self,
            CodecError::UnknownTag { .. } | CodecError::UnknownNamespace(_)
        )
    }
}

// =============================================================================
// Core Error
// =============================================================================

/// Object model errors.
///
/// Raised when converting between stored entity payloads and ActiveSync
/// `ApplicationData` trees.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A field holds a value that can't be interpreted.
    #[error("{field} has invalid value '{value}'")]
    InvalidField { field: String, value: String },

    /// A required field is absent.
    #[error("{0} is required")]
    MissingField(String),

    /// Payload (de)serialization failed.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Codec error (wraps CodecError).
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl CoreError {
    /// Builds an `InvalidField` error.
    pub fn invalid(field: impl Into<String>, value: impl Into<String>) -> Self {
        CoreError::InvalidField {
            field: field.into(),
            value: value.into(),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Convenience type alias for codec results.
pub type CodecResult<T> = Result<T, CodecError>;

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CodecError::UnsupportedToken(0x04).to_string(),
            "Unsupported WBXML token: 0x04"
        );
        assert_eq!(
            CodecError::unknown_tag("AirSync", "Bogus").to_string(),
            "Tag Bogus is not defined in namespace AirSync"
        );
    }

    #[test]
    fn test_decode_error_classification() {
        assert!(CodecError::UnsupportedVersion(9).is_decode_error());
        assert!(CodecError::Truncated("header").is_decode_error());
        assert!(!CodecError::unknown_tag("Contacts", "Nope").is_decode_error());
    }

    #[test]
    fn test_codec_converts_to_core_error() {
        let core_err: CoreError = CodecError::UnexpectedEnd.into();
        assert!(matches!(core_err, CoreError::Codec(_)));
    }
}
