//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  Codec                  │ │
//! │  │  MissingDeviceId│  │  Timeout        │  │  UnexpectedResponse     │ │
//! │  │  InvalidUrl     │  │  HttpStatus     │  │  RemoteStatus           │ │
//! │  │  ConfigLoad/Save│  │  Provisioning   │  │  InvalidObject          │ │
//! │  │                 │  │  Authentication │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Database     │  │     Lease       │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  DatabaseError  │  │  NotAcquired    │  │  Internal               │ │
//! │  │                 │  │  LeaseLost      │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid bridge configuration.
    #[error("Invalid bridge configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID (required by every ActiveSync request).
    #[error("Device ID not configured")]
    MissingDeviceId,

    /// Invalid remote URL.
    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Could not reach the remote endpoint.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request exceeded its timeout.
    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    /// Non-success HTTP status not covered by a more specific variant.
    #[error("HTTP {status} from remote for {command}")]
    HttpStatus { status: u16, command: String },

    /// HTTP 449: the device must run Provision before syncing.
    #[error("Remote requires provisioning (HTTP 449)")]
    ProvisioningRequired,

    /// HTTP 401: credentials rejected.
    #[error("Authentication failed for {0}")]
    AuthenticationFailed(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// WBXML encode/decode failure.
    #[error("Codec error: {0}")]
    Codec(#[from] eas_core::CodecError),

    /// Response decoded but is missing required elements.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Command-level status other than success.
    #[error("{command} returned status {status}")]
    RemoteStatus { command: String, status: u32 },

    /// ApplicationData or stored payload could not be converted.
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    // =========================================================================
    // Lease Errors
    // =========================================================================
    /// Another worker holds a live lease on the correlation.
    #[error("Lease on correlation {0} is held by another worker")]
    LeaseNotAcquired(i64),

    /// The lease was reclaimed while this worker was still using it.
    #[error("Lease on correlation {correlation_id} lost by {holder}")]
    LeaseLost { correlation_id: i64, holder: String },

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Storage operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync agent error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<eas_db::DbError> for SyncError {
    fn from(err: eas_db::DbError) -> Self {
        match err {
            eas_db::DbError::LeaseLost {
                correlation_id,
                holder,
            } => SyncError::LeaseLost {
                correlation_id,
                holder,
            },
            other => SyncError::DatabaseError(other.to_string()),
        }
    }
}

impl From<eas_core::CoreError> for SyncError {
    fn from(err: eas_core::CoreError) -> Self {
        match err {
            eas_core::CoreError::Codec(codec) => SyncError::Codec(codec),
            other => SyncError::InvalidObject(other.to_string()),
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(0)
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the request can be repeated as-is.
    ///
    /// ## Retryable Errors
    /// - Connection failures and timeouts
    /// - HTTP 5xx and 429
    ///
    /// ## Non-Retryable Errors
    /// - Configuration, authentication and provisioning
    /// - Protocol errors: the same request gets the same answer
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_) | SyncError::Timeout(_) => true,
            SyncError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the remote said something we could not use.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            SyncError::Codec(_)
                | SyncError::UnexpectedResponse(_)
                | SyncError::RemoteStatus { .. }
                | SyncError::InvalidObject(_)
        )
    }

    /// Returns true for lease contention; the collection is retried next pass.
    pub fn is_lease_error(&self) -> bool {
        matches!(self, SyncError::LeaseNotAcquired(_) | SyncError::LeaseLost { .. })
    }
}
