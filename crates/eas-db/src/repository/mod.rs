//! # Repository Module
//!
//! One repository per table, each holding a pool handle.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Who touches what                                     │
//! │                                                                         │
//! │  SyncPass / CorrelationHooks                                           │
//! │       │                                                                 │
//! │       │  db.correlations().acquire_lease(id, holder, stale)            │
//! │       │  db.chronicle(kind).reminisce(user, collection, wm, ..)        │
//! │       ▼                                                                 │
//! │  ┌──────────────────────┐   ┌──────────────────────┐                   │
//! │  │ CorrelationRepository│   │ ChronicleRepository  │◄── append() ──┐   │
//! │  │  lookups, CRUD, lease│   │  reminisce, apex     │               │   │
//! │  └──────────────────────┘   └──────────────────────┘               │   │
//! │  ┌──────────────────────┐   ┌──────────────────────┐               │   │
//! │  │ CollectionRepository │   │ EntityRepository     │── same tx ────┘   │
//! │  │  local containers    │   │  filters, CRUD       │                   │
//! │  └──────────────────────┘   └──────────────────────┘                   │
//! │  ┌──────────────────────┐                                              │
//! │  │AccountStateRepository│   FolderSync key per user                    │
//! │  └──────────────────────┘                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Queries are built at runtime with `sqlx::query`/`query_as` and bound
//! parameters, mapped through private `FromRow` row structs.
//!
//! ## Available Repositories
//!
//! - [`CorrelationRepository`] - Identity links and the lease protocol
//! - [`ChronicleRepository`] - Mutation log and watermark deltas
//! - [`CollectionRepository`] - Local collections
//! - [`EntityRepository`] - Local entities with filters
//! - [`AccountStateRepository`] - Per-user hierarchy key
//!
//! [`CorrelationRepository`]: correlation::CorrelationRepository
//! [`ChronicleRepository`]: chronicle::ChronicleRepository
//! [`CollectionRepository`]: collection::CollectionRepository
//! [`EntityRepository`]: entity::EntityRepository
//! [`AccountStateRepository`]: account_state::AccountStateRepository

pub mod account_state;
pub mod chronicle;
pub mod collection;
pub mod correlation;
pub mod entity;
