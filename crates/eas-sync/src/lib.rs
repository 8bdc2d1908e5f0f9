//! # eas-sync: Sync Engine for the EAS Bridge
//!
//! Keeps local contact, calendar and task collections in step with an
//! ActiveSync server, one user at a time.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   SyncAgent (poll loop, per account)             │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                          SyncPass                                │  │
//! │  │                                                                  │  │
//! │  │  FolderSync → pair folders with local collections               │  │
//! │  │  per collection: lease → pull → push → persist → release        │  │
//! │  └───────┬───────────────────────┬──────────────────────┬───────────┘  │
//! │          ▼                       ▼                      ▼               │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌─────────────────────┐   │
//! │  │   protocol     │  │    transport       │  │   eas-db            │   │
//! │  │                │  │                    │  │                     │   │
//! │  │ FolderSync and │  │ RemoteTransport    │  │ correlations+lease  │   │
//! │  │ Sync documents │  │ HttpTransport      │  │ chronicle, store    │   │
//! │  └────────────────┘  └────────────────────┘  └─────────────────────┘   │
//! │                                                                         │
//! │  CorrelationHooks: local deletions reported by the store's owner       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - `SyncAgent` poll loop and status
//! - [`pass`] - One sync pass for one user
//! - [`protocol`] - FolderSync and Sync request/response documents
//! - [`transport`] - HTTP transport with retry
//! - [`hooks`] - Local deletion hooks
//! - [`config`] - Bridge configuration (TOML + env)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use eas_sync::{BridgeConfig, HttpTransport, SyncAgent, TransportConfig};
//! use eas_db::{Database, DbConfig};
//!
//! let config = BridgeConfig::load(None)?;
//! let db = Database::new(DbConfig::new(config.database_path()?)).await?;
//! let remote = Arc::new(HttpTransport::new(TransportConfig::from_bridge(&config)?)?);
//!
//! let handle = SyncAgent::new(config, db, remote).spawn();
//! // ...
//! handle.shutdown().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod error;
pub mod hooks;
pub mod pass;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{AccountStatus, RoundSummary, SyncAgent, SyncAgentHandle, SyncStatus};
pub use config::{AccountConfig, BridgeConfig, DeviceConfig, RemoteConfig, SyncSettings};
pub use error::{SyncError, SyncResult};
pub use hooks::CorrelationHooks;
pub use pass::{PassReport, PassSettings, SyncPass};
pub use protocol::Command;
pub use transport::{Credentials, HttpTransport, RemoteTransport, TransportConfig};
