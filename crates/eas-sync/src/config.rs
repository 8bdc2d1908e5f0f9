//! # Bridge Configuration
//!
//! Configuration management for the bridge.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     EAS_BRIDGE_REMOTE_URL=https://mail.example.com/Microsoft-Server-   │
//! │                           ActiveSync                                    │
//! │     EAS_BRIDGE_DEVICE_ID=bridge01                                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/eas-bridge/bridge.toml (Linux)                           │
//! │     ~/Library/Application Support/org.eas.bridge/bridge.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     protocol 14.1, 60s poll, 600s lease staleness                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # bridge.toml
//! [device]
//! id = "bridge01"
//! device_type = "EASBridge"
//!
//! [remote]
//! url = "https://mail.example.com/Microsoft-Server-ActiveSync"
//! protocol_version = "14.1"
//!
//! [sync]
//! poll_interval_secs = 60
//! lease_stale_secs = 600
//! window_size = 100
//!
//! [database]
//! path = "/var/lib/eas-bridge/bridge.db"
//!
//! [[accounts]]
//! user_id = "alice"
//! username = "alice@example.com"
//! password = "secret"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use eas_core::{DEFAULT_LEASE_STALE_SECS, DEFAULT_WINDOW_SIZE};

/// ActiveSync protocol versions the bridge can speak.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["12.1", "14.0", "14.1", "16.0", "16.1"];

/// Largest WindowSize the protocol allows.
pub const MAX_WINDOW_SIZE: u32 = 512;

// =============================================================================
// Device Configuration
// =============================================================================

/// How the bridge identifies itself to the remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// `DeviceId` query parameter. Alphanumeric, stable across restarts.
    #[serde(default = "default_device_id")]
    pub id: String,

    /// `DeviceType` query parameter.
    #[serde(default = "default_device_type")]
    pub device_type: String,

    /// `User-Agent` header.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_device_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn default_device_type() -> String {
    "EASBridge".to_string()
}

fn default_user_agent() -> String {
    concat!("eas-bridge/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: default_device_id(),
            device_type: default_device_type(),
            user_agent: default_user_agent(),
        }
    }
}

// =============================================================================
// Remote Configuration
// =============================================================================

/// The ActiveSync endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Full endpoint URL, usually ending in `/Microsoft-Server-ActiveSync`.
    #[serde(default)]
    pub url: String,

    /// Value of the `MS-ASProtocolVersion` header.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// `X-MS-PolicyKey` header, once the device has been provisioned.
    #[serde(default)]
    pub policy_key: Option<String>,
}

fn default_protocol_version() -> String {
    "14.1".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            url: String::new(),
            protocol_version: default_protocol_version(),
            policy_key: None,
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between agent passes (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Heartbeat age after which another worker may reclaim a lease (seconds).
    #[serde(default = "default_lease_stale")]
    pub lease_stale_secs: u64,

    /// Items per Sync round trip, both directions.
    #[serde(default = "default_window_size")]
    pub window_size: u32,

    /// Whole-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Attempts per request before giving up. 0 means a single attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff duration (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_poll_interval() -> u64 {
    60
}
fn default_lease_stale() -> u64 {
    DEFAULT_LEASE_STALE_SECS
}
fn default_window_size() -> u32 {
    DEFAULT_WINDOW_SIZE
}
fn default_request_timeout() -> u64 {
    60
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            poll_interval_secs: default_poll_interval(),
            lease_stale_secs: default_lease_stale(),
            window_size: default_window_size(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl SyncSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lease_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.lease_stale_secs).unwrap_or(i64::MAX / 1_000))
    }

    /// Lease renewal period during a request: a third of the staleness window.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs((self.lease_stale_secs / 3).max(1))
    }

    /// Longest one request can take: every attempt timing out, plus the
    /// backoff between attempts at its jittered maximum (1.5 × max_backoff).
    pub fn request_budget_secs(&self) -> u64 {
        let attempts = u64::from(self.max_retries) + 1;
        let backoff = u64::from(self.max_retries).saturating_mul(self.max_backoff_secs) * 3 / 2;
        attempts
            .saturating_mul(self.request_timeout_secs)
            .saturating_add(backoff)
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `bridge.db` in the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Accounts
// =============================================================================

/// One local user bridged to one remote mailbox.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Local user id: owner of collections, correlations and chronicle rows.
    pub user_id: String,

    /// Remote login, sent as the `User` parameter and in basic auth.
    pub username: String,

    pub password: String,
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Main Bridge Configuration
// =============================================================================

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl BridgeConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (bridge.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading bridge config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Bridge config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::MissingDeviceId);
        }
        if !self.device.id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SyncError::InvalidConfig(format!(
                "device id must be alphanumeric, got: {}",
                self.device.id
            )));
        }

        let url = url::Url::parse(&self.remote.url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "Remote URL must start with http:// or https://, got: {}",
                self.remote.url
            )));
        }

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&self.remote.protocol_version.as_str()) {
            return Err(SyncError::InvalidConfig(format!(
                "unsupported protocol version '{}'. Valid options: {}",
                self.remote.protocol_version,
                SUPPORTED_PROTOCOL_VERSIONS.join(", ")
            )));
        }

        if self.sync.window_size == 0 || self.sync.window_size > MAX_WINDOW_SIZE {
            return Err(SyncError::InvalidConfig(format!(
                "window_size must be between 1 and {MAX_WINDOW_SIZE}"
            )));
        }
        if self.sync.poll_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }
        if self.sync.lease_stale_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "lease_stale_secs must be greater than 0".into(),
            ));
        }
        let budget = self.sync.request_budget_secs();
        if self.sync.lease_stale_secs <= budget {
            return Err(SyncError::InvalidConfig(format!(
                "lease_stale_secs ({}) must exceed the worst-case request time of {budget}s \
                 (request_timeout_secs, max_retries, max_backoff_secs)",
                self.sync.lease_stale_secs
            )));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.user_id.is_empty() || account.username.is_empty() {
                return Err(SyncError::InvalidConfig(
                    "accounts need a user_id and a username".into(),
                ));
            }
            if !seen.insert(account.user_id.as_str()) {
                return Err(SyncError::InvalidConfig(format!(
                    "duplicate account user_id '{}'",
                    account.user_id
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("EAS_BRIDGE_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(url) = std::env::var("EAS_BRIDGE_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.remote.url = url;
        }

        if let Ok(version) = std::env::var("EAS_BRIDGE_PROTOCOL_VERSION") {
            self.remote.protocol_version = version;
        }

        if let Ok(path) = std::env::var("EAS_BRIDGE_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(interval) = std::env::var("EAS_BRIDGE_POLL_INTERVAL") {
            match interval.parse::<u64>() {
                Ok(secs) => self.sync.poll_interval_secs = secs,
                Err(_) => warn!(value = %interval, "Ignoring invalid EAS_BRIDGE_POLL_INTERVAL"),
            }
        }

        if let Ok(stale) = std::env::var("EAS_BRIDGE_LEASE_STALE_SECS") {
            match stale.parse::<u64>() {
                Ok(secs) => self.sync.lease_stale_secs = secs,
                Err(_) => warn!(value = %stale, "Ignoring invalid EAS_BRIDGE_LEASE_STALE_SECS"),
            }
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("org", "eas", "bridge")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("bridge.toml"))
    }

    /// Database file: configured path, else `bridge.db` in the data directory.
    pub fn database_path(&self) -> SyncResult<PathBuf> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }
        Self::project_dirs()
            .map(|dirs| dirs.data_dir().join("bridge.db"))
            .ok_or_else(|| SyncError::InvalidConfig("no database path and no data directory".into()))
    }

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn account(&self, user_id: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.user_id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.remote.url = "https://mail.example.com/Microsoft-Server-ActiveSync".into();
        config.accounts.push(AccountConfig {
            user_id: "alice".into(),
            username: "alice@example.com".into(),
            password: "secret".into(),
        });
        config
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert!(!config.device.id.is_empty());
        assert_eq!(config.remote.protocol_version, "14.1");
        assert_eq!(config.sync.window_size, 100);
        assert_eq!(config.sync.lease_stale_secs, 600);
    }

    #[test]
    fn test_config_validation() {
        let mut config = valid();
        assert!(config.validate().is_ok());

        config.device.id = String::new();
        assert!(matches!(config.validate(), Err(SyncError::MissingDeviceId)));

        config.device.id = "bridge-01".into();
        assert!(config.validate().is_err());

        config.device.id = "bridge01".into();
        config.remote.url = "ftp://mail.example.com".into();
        assert!(config.validate().is_err());

        config.remote.url = "https://mail.example.com/Microsoft-Server-ActiveSync".into();
        config.remote.protocol_version = "2.5".into();
        assert!(config.validate().is_err());

        config.remote.protocol_version = "16.1".into();
        config.sync.window_size = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lease_must_outlast_one_request() {
        let mut config = valid();
        // 4 attempts × 60s + 3 backoffs × 45s
        assert_eq!(config.sync.request_budget_secs(), 375);
        assert!(config.sync.lease_stale_secs > config.sync.request_budget_secs());

        config.sync.lease_stale_secs = 300;
        config.sync.request_timeout_secs = 120;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        config.sync.max_retries = 0;
        config.sync.request_timeout_secs = 60;
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.heartbeat_interval(), Duration::from_secs(100));
    }

    #[test]
    fn test_env_overrides_applied_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(
            &path,
            r#"
            [device]
            id = "filebridge"

            [remote]
            url = "https://file.example.com/Microsoft-Server-ActiveSync"

            [sync]
            poll_interval_secs = 45
            "#,
        )
        .unwrap();

        let vars = [
            ("EAS_BRIDGE_DEVICE_ID", "envbridge"),
            ("EAS_BRIDGE_REMOTE_URL", "https://env.example.com/Microsoft-Server-ActiveSync"),
            ("EAS_BRIDGE_PROTOCOL_VERSION", "14.0"),
            ("EAS_BRIDGE_DB_PATH", "/tmp/eas-env/bridge.db"),
            ("EAS_BRIDGE_POLL_INTERVAL", "soon"),
            ("EAS_BRIDGE_LEASE_STALE_SECS", "900"),
        ];
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        let loaded = BridgeConfig::load(Some(path));
        for (key, _) in vars {
            std::env::remove_var(key);
        }

        let config = loaded.unwrap();
        assert_eq!(config.device_id(), "envbridge");
        assert_eq!(config.remote.url, "https://env.example.com/Microsoft-Server-ActiveSync");
        assert_eq!(config.remote.protocol_version, "14.0");
        assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/eas-env/bridge.db"));
        assert_eq!(config.sync.lease_stale_secs, 900);
        // Unparseable number is ignored, the file value stays
        assert_eq!(config.sync.poll_interval_secs, 45);
    }

    #[test]
    fn test_duplicate_accounts_rejected() {
        let mut config = valid();
        config.accounts.push(config.accounts[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_not_in_debug_output() {
        let config = valid();
        let debug = format!("{:?}", config.accounts[0]);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("alice@example.com"));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");

        let mut config = valid();
        config.device.id = "bridge01".into();
        config.database.path = Some(dir.path().join("bridge.db"));
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[device]"));
        assert!(contents.contains("[[accounts]]"));

        let loaded: BridgeConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.device.id, "bridge01");
        assert_eq!(loaded.accounts.len(), 1);
        assert_eq!(loaded.database_path().unwrap(), dir.path().join("bridge.db"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [remote]
            url = "https://mail.example.com/Microsoft-Server-ActiveSync"

            [sync]
            window_size = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.window_size, 25);
        assert_eq!(config.sync.poll_interval_secs, 60);
        assert!(config.accounts.is_empty());
        assert!(config.validate().is_ok());
    }
}
