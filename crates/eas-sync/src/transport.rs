//! # HTTP Transport
//!
//! Posts encoded ActiveSync commands to the remote endpoint, retrying
//! transient failures with exponential backoff.
//!
//! ## Request Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ActiveSync HTTP POST                             │
//! │                                                                         │
//! │  POST {url}?Cmd=Sync&User=alice&DeviceId=bridge01&DeviceType=EASBridge │
//! │  Authorization:        Basic base64(user:password)                     │
//! │  Content-Type:         application/vnd.ms-sync.wbxml                   │
//! │  MS-ASProtocolVersion: 14.1                                            │
//! │  X-MS-PolicyKey:       <policy key, once provisioned>                  │
//! │                                                                         │
//! │  <WBXML body>                                                          │
//! │                                                                         │
//! │  RESPONSE MAPPING                                                      │
//! │  ────────────────                                                      │
//! │  200        → body bytes (possibly empty)                              │
//! │  401        → AuthenticationFailed                                     │
//! │  449        → ProvisioningRequired                                     │
//! │  429, 5xx   → HttpStatus (retried with backoff)                        │
//! │  other      → HttpStatus                                               │
//! │                                                                         │
//! │  BACKOFF STRATEGY (Exponential with Jitter)                            │
//! │  ───────────────────────────────────────────                           │
//! │  Attempt 1: 500ms                                                       │
//! │  Attempt 2: 1s                                                          │
//! │  Attempt 3: 2s                                                          │
//! │  Max: 30s, then the pass gives up until the next poll                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::Command;
use eas_core::wbxml;

// =============================================================================
// Transport Seam
// =============================================================================

/// Login for one remote mailbox.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One encoded command ready to post.
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub command: Command,
    pub credentials: Credentials,
    pub body: Vec<u8>,
}

/// Anything that can carry a WBXML request to the remote and bring back
/// the response body.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn post(&self, request: RemoteRequest) -> SyncResult<Vec<u8>>;
}

// =============================================================================
// Transport Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: url::Url,
    pub device_id: String,
    pub device_type: String,
    pub user_agent: String,
    pub protocol_version: String,
    pub policy_key: Option<String>,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Whole-request timeout.
    pub request_timeout: Duration,

    /// Retries after the first attempt (0 = no retry).
    pub max_retries: u32,

    /// Initial backoff duration.
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    pub max_backoff: Duration,
}

impl TransportConfig {
    pub fn from_bridge(config: &BridgeConfig) -> SyncResult<Self> {
        Ok(TransportConfig {
            url: url::Url::parse(&config.remote.url)?,
            device_id: config.device.id.clone(),
            device_type: config.device.device_type.clone(),
            user_agent: config.device.user_agent.clone(),
            protocol_version: config.remote.protocol_version.clone(),
            policy_key: config.remote.policy_key.clone(),
            connect_timeout: Duration::from_secs(config.sync.connect_timeout_secs),
            request_timeout: Duration::from_secs(config.sync.request_timeout_secs),
            max_retries: config.sync.max_retries,
            initial_backoff: Duration::from_millis(config.sync.initial_backoff_ms),
            max_backoff: Duration::from_secs(config.sync.max_backoff_secs),
        })
    }
}

// =============================================================================
// HTTP Transport
// =============================================================================

/// reqwest-backed [`RemoteTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    config: TransportConfig,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(HttpTransport { config, client })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// One attempt, no retries.
    async fn send_once(&self, request: &RemoteRequest) -> SyncResult<Vec<u8>> {
        let command = request.command.as_str();
        let mut builder = self
            .client
            .post(self.config.url.clone())
            .query(&[
                ("Cmd", command),
                ("User", request.credentials.username.as_str()),
                ("DeviceId", self.config.device_id.as_str()),
                ("DeviceType", self.config.device_type.as_str()),
            ])
            .basic_auth(&request.credentials.username, Some(&request.credentials.password))
            .header(CONTENT_TYPE, wbxml::CONTENT_TYPE)
            .header("MS-ASProtocolVersion", self.config.protocol_version.as_str());

        if let Some(policy_key) = &self.config.policy_key {
            builder = builder.header("X-MS-PolicyKey", policy_key.as_str());
        }

        let response = builder
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if let Some(err) = classify_status(status, request) {
            return Err(err);
        }

        let body = response.bytes().await.map_err(|e| self.map_send_error(e))?;
        debug!(command, status = status.as_u16(), bytes = body.len(), "Response received");
        Ok(body.to_vec())
    }

    fn map_send_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.config.request_timeout.as_secs())
        } else {
            SyncError::from(err)
        }
    }

    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None, // bounded by max_retries instead
            ..Default::default()
        }
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn post(&self, request: RemoteRequest) -> SyncResult<Vec<u8>> {
        let mut backoff = self.create_backoff();
        let mut attempt = 0u32;

        loop {
            match self.send_once(&request).await {
                Ok(body) => return Ok(body),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let Some(delay) = backoff.next_backoff() else {
                        return Err(err);
                    };
                    warn!(
                        command = %request.command,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Maps a non-success HTTP status to its error.
fn classify_status(status: StatusCode, request: &RemoteRequest) -> Option<SyncError> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        401 => SyncError::AuthenticationFailed(request.credentials.username.clone()),
        449 => SyncError::ProvisioningRequired,
        code => SyncError::HttpStatus {
            status: code,
            command: request.command.as_str().to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn request() -> RemoteRequest {
        RemoteRequest {
            command: Command::Sync,
            credentials: Credentials::new("alice@example.com", "secret"),
            body: Vec::new(),
        }
    }

    fn config() -> TransportConfig {
        let mut bridge = BridgeConfig::default();
        bridge.remote.url = "https://mail.example.com/Microsoft-Server-ActiveSync".into();
        TransportConfig::from_bridge(&bridge).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let req = request();
        assert!(classify_status(StatusCode::OK, &req).is_none());
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, &req),
            Some(SyncError::AuthenticationFailed(user)) if user == "alice@example.com"
        ));
        assert!(matches!(
            classify_status(StatusCode::from_u16(449).unwrap(), &req),
            Some(SyncError::ProvisioningRequired)
        ));

        let unavailable = classify_status(StatusCode::SERVICE_UNAVAILABLE, &req).unwrap();
        assert!(unavailable.is_retryable());
        let bad_request = classify_status(StatusCode::BAD_REQUEST, &req).unwrap();
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let debug = format!("{:?}", request());
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_transport_config_from_bridge() {
        let config = config();
        assert_eq!(config.protocol_version, "14.1");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_backoff, Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_grows() {
        let transport = HttpTransport::new(config()).unwrap();
        let mut backoff = transport.create_backoff();
        let first = backoff.next_backoff().unwrap();
        assert!(first <= Duration::from_millis(750));
        assert!(backoff.next_backoff().unwrap() <= Duration::from_secs(30));
    }

    // -------------------------------------------------------------------------
    // Retry loop against a local endpoint
    // -------------------------------------------------------------------------

    /// Reads one request head. Test requests carry no body.
    async fn read_head(socket: &mut TcpStream) -> bool {
        let mut head = Vec::new();
        let mut chunk = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return false,
                Ok(n) => head.extend_from_slice(&chunk[..n]),
            }
        }
        true
    }

    /// Answers request n with `statuses[n]`, repeating the last status.
    /// Returns the endpoint URL and the number of requests served.
    async fn scripted_endpoint(statuses: Vec<u16>) -> (url::Url, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                if !read_head(&mut socket).await {
                    continue;
                }
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = statuses[n.min(statuses.len() - 1)];
                let body = if status == 200 { "wbxml" } else { "" };
                let response = format!(
                    "HTTP/1.1 {status} Scripted\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        let url = format!("http://{addr}/Microsoft-Server-ActiveSync");
        (url::Url::parse(&url).unwrap(), served)
    }

    fn transport_for(url: url::Url, max_retries: u32) -> HttpTransport {
        let config = TransportConfig {
            url,
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            request_timeout: Duration::from_secs(5),
            ..config()
        };
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(config.request_timeout)
            .build()
            .unwrap();
        HttpTransport { config, client }
    }

    #[tokio::test]
    async fn test_post_retries_until_success() {
        let (url, served) = scripted_endpoint(vec![503, 503, 200]).await;
        let transport = transport_for(url, 3);

        let body = transport.post(request()).await.unwrap();
        assert_eq!(body, b"wbxml");
        assert_eq!(served.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_post_gives_up_after_max_retries() {
        let (url, served) = scripted_endpoint(vec![503]).await;
        let transport = transport_for(url, 2);

        let err = transport.post(request()).await.unwrap_err();
        assert!(matches!(err, SyncError::HttpStatus { status: 503, .. }));
        assert_eq!(served.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_post_does_not_retry_auth_or_provisioning() {
        let (url, served) = scripted_endpoint(vec![401, 200]).await;
        let err = transport_for(url, 3).post(request()).await.unwrap_err();
        assert!(matches!(err, SyncError::AuthenticationFailed(_)));
        assert_eq!(served.load(Ordering::SeqCst), 1);

        let (url, served) = scripted_endpoint(vec![449, 200]).await;
        let err = transport_for(url, 3).post(request()).await.unwrap_err();
        assert!(matches!(err, SyncError::ProvisioningRequired));
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_post_without_retries_makes_one_attempt() {
        let (url, served) = scripted_endpoint(vec![503, 200]).await;
        let err = transport_for(url, 0).post(request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }
}
