//! # eas-core: Protocol & Domain Logic for the EAS Bridge
//!
//! Everything the bridge needs that does not touch a database or a socket:
//! the WBXML codec, the ActiveSync code pages, the tagged object tree, the
//! correlation/chronicle domain types and the entity object models.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        EAS Bridge Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    eas-sync (engine)                            │   │
//! │  │   FolderSync/Sync builders ──► HttpTransport ──► SyncPass       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ eas-core (THIS CRATE) ★                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   wbxml   │  │ codepage  │  │   model   │  │  objects  │  │   │
//! │  │   │  Decoder  │  │ registry  │  │ TaggedNode│  │  Contact  │  │   │
//! │  │   │  Encoder  │  │ 0..25,FE  │  │ ChildSlot │  │  Event    │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   types: Correlation, ChronicleDelta, Watermark, LocalEntity    │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    eas-db (Database Layer)                      │   │
//! │  │       correlations, lease, chronicle, collections, entities     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`wbxml`] - Binary XML decoder/encoder
//! - [`codepage`] - Token tables per ActiveSync namespace
//! - [`model`] - Tagged object tree
//! - [`types`] - Correlation, chronicle and local store types
//! - [`objects`] - Contact, event and task models
//! - [`error`] - Codec and model errors
//!
//! ## Example Usage
//!
//! ```rust
//! use eas_core::codepage::ns;
//! use eas_core::model::TaggedNode;
//! use eas_core::wbxml;
//!
//! let collection = TaggedNode::new(ns::AIR_SYNC)
//!     .with_text("SyncKey", "0")
//!     .with_text("CollectionId", "8");
//! let sync = TaggedNode::new(ns::AIR_SYNC)
//!     .with_node("Collections", TaggedNode::new(ns::AIR_SYNC).with_node("Collection", collection));
//!
//! let bytes = wbxml::encode(&wbxml::document("Sync", sync)).unwrap();
//! let decoded = wbxml::decode(&bytes).unwrap();
//! let key = decoded.path(&["Sync", "Collections", "Collection"]).unwrap().text("SyncKey");
//! assert_eq!(key, Some("0"));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod codepage;
pub mod error;
pub mod model;
pub mod objects;
pub mod types;
pub mod wbxml;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use codepage::{ActiveSyncCodePages, CodePageRegistry};
pub use error::{CodecError, CodecResult, CoreError, CoreResult};
pub use model::{ChildSlot, TaggedChild, TaggedNode, TaggedProperty, TaggedValue};
pub use objects::{ContactObject, EntityObject, EventObject, TaskObject};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Seconds without a heartbeat after which a correlation lease may be reclaimed.
pub const DEFAULT_LEASE_STALE_SECS: u64 = 600;

/// Items requested per Sync round trip and pushed per batch.
pub const DEFAULT_WINDOW_SIZE: u32 = 100;

/// SyncKey / FolderSync key meaning "no state yet".
pub const INITIAL_SYNC_KEY: &str = "0";
