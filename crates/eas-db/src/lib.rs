//! # eas-db: Storage Layer for the EAS Bridge
//!
//! SQLite storage via sqlx: the correlation store with its lease protocol,
//! the change chronicle, and the thin local collection/entity store the
//! bridge synchronizes against.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        EAS Bridge Data Flow                             │
//! │                                                                         │
//! │  SyncPass (eas-sync)                                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     eas-db (THIS CRATE)                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ Correlations   │    │ 001_initial_ │  │   │
//! │  │   │ SqlitePool    │◄───│ Chronicle      │    │   schema.sql │  │   │
//! │  │   │ WAL, FKs on   │    │ Collections    │    │              │  │   │
//! │  │   │               │    │ Entities       │    │              │  │   │
//! │  │   └───────────────┘    │ AccountStates  │    └──────────────┘  │   │
//! │  │                        └────────────────┘                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/bridge.db                                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use eas_db::{Database, DbConfig};
//! use chrono::Duration;
//!
//! let db = Database::new(DbConfig::new("bridge.db")).await?;
//!
//! if db.correlations().acquire_lease(id, "agent-1", Duration::seconds(300)).await? {
//!     let delta = db.chronicle(EntityKind::Contact).reminisce("alice", 3, None, None, 0).await?;
//!     // ...
//!     db.correlations().release_lease(id, "agent-1").await?;
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use migrations::SchemaVersion;
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::account_state::AccountStateRepository;
pub use repository::chronicle::ChronicleRepository;
pub use repository::collection::CollectionRepository;
pub use repository::correlation::CorrelationRepository;
pub use repository::entity::{EntityRepository, Filter, FilterField, FilterOperator, FilterValue};
