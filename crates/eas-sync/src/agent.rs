//! # Sync Agent
//!
//! Main orchestrator for the bridge. Runs one [`SyncPass`] per configured
//! account on a poll interval until told to stop.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncAgent                                │  │
//! │  │                                                                  │  │
//! │  │  • One lease holder id per process: "{device_id}:{uuid}"         │  │
//! │  │  • Every tick: SyncPass::run for each account, in order          │  │
//! │  │  • A failing account is recorded and skipped, never fatal        │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │   SyncPass     │  │ RemoteTransport│  │   Database             │    │
//! │  │                │  │                │  │                        │    │
//! │  │ hierarchy +    │  │ HTTP POST with │  │ correlations, leases,  │    │
//! │  │ collections    │  │ retry/backoff  │  │ chronicle, store       │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  CONTROL:                                                              │
//! │  ────────                                                              │
//! │  spawn()    → SyncAgentHandle { status(), shutdown() }                 │
//! │  run_once() → one round over all accounts (used by --once)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use eas_db::Database;

use crate::config::BridgeConfig;
use crate::pass::{PassReport, PassSettings, SyncPass};
use crate::transport::RemoteTransport;

// =============================================================================
// Sync Status
// =============================================================================

/// Outcome of the latest pass for one account.
#[derive(Debug, Clone, Default)]
pub struct AccountStatus {
    pub last_sync: Option<DateTime<Utc>>,
    pub last_report: Option<PassReport>,
    pub last_error: Option<String>,
}

/// Current agent status for external queries.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    /// Whether the poll loop is running.
    pub running: bool,

    /// Completed rounds since start.
    pub rounds: u64,

    /// Per account, keyed by user id.
    pub accounts: BTreeMap<String, AccountStatus>,
}

/// Totals for one round over every account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub succeeded: usize,
    pub failed: usize,
}

// =============================================================================
// Sync Agent
// =============================================================================

pub struct SyncAgent {
    config: Arc<BridgeConfig>,
    pass: SyncPass,
    status: Arc<RwLock<SyncStatus>>,
}

impl SyncAgent {
    pub fn new(config: BridgeConfig, db: Database, remote: Arc<dyn RemoteTransport>) -> Self {
        let holder = format!("{}:{}", config.device_id(), uuid::Uuid::new_v4().simple());
        let pass = SyncPass::new(db, remote, PassSettings::from_config(&config.sync), holder);

        SyncAgent {
            config: Arc::new(config),
            pass,
            status: Arc::new(RwLock::new(SyncStatus::default())),
        }
    }

    /// Lease holder id used by this agent.
    pub fn holder(&self) -> &str {
        self.pass.holder()
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Runs one pass for every account. Failures are recorded per account.
    pub async fn run_once(&self) -> RoundSummary {
        let mut summary = RoundSummary::default();

        for account in &self.config.accounts {
            let outcome = self.pass.run(account).await;
            let now = Utc::now();

            let mut status = self.status.write().await;
            let entry = status.accounts.entry(account.user_id.clone()).or_default();
            match outcome {
                Ok(report) => {
                    entry.last_sync = Some(now);
                    entry.last_report = Some(report);
                    entry.last_error = None;
                    summary.succeeded += 1;
                }
                Err(err) => {
                    error!(user_id = %account.user_id, error = %err, "Sync pass failed");
                    entry.last_error = Some(err.to_string());
                    summary.failed += 1;
                }
            }
        }

        self.status.write().await.rounds += 1;
        summary
    }

    /// Starts the poll loop in the background.
    pub fn spawn(self) -> SyncAgentHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let status = self.status.clone();
        let task = tokio::spawn(self.run(shutdown_rx));

        SyncAgentHandle {
            shutdown_tx,
            status,
            task,
        }
    }

    /// Polls every account until `shutdown_rx` fires. The first round starts immediately.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let period = self.config.sync.poll_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.status.write().await.running = true;
        info!(
            holder = %self.holder(),
            accounts = self.config.accounts.len(),
            interval_secs = period.as_secs(),
            "Sync agent started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.run_once().await;
                    info!(succeeded = summary.succeeded, failed = summary.failed, "Sync round finished");
                }

                _ = shutdown_rx.recv() => {
                    info!("Sync agent received shutdown");
                    break;
                }
            }
        }

        self.status.write().await.running = false;
        info!("Sync agent stopped");
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Handle for a running [`SyncAgent`].
pub struct SyncAgentHandle {
    shutdown_tx: mpsc::Sender<()>,
    status: Arc<RwLock<SyncStatus>>,
    task: JoinHandle<()>,
}

impl SyncAgentHandle {
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Stops the loop after the current round and waits for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(err) = self.task.await {
            error!(error = %err, "Sync agent task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;
    use crate::fake::{FakeRemote, CONTACTS};
    use eas_core::{CorrelationType, EntityObject};
    use eas_db::DbConfig;
    use std::time::Duration;

    fn config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.device.id = "bridge01".into();
        config.remote.url = "https://mail.example.com/Microsoft-Server-ActiveSync".into();
        config.accounts = vec![
            AccountConfig {
                user_id: "alice".into(),
                username: "alice@example.com".into(),
                password: "a".into(),
            },
            AccountConfig {
                user_id: "bob".into(),
                username: "bob@example.com".into(),
                password: "b".into(),
            },
        ];
        config
    }

    async fn agent(remote: Arc<FakeRemote>) -> (SyncAgent, Database) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        (SyncAgent::new(config(), db.clone(), remote), db)
    }

    #[tokio::test]
    async fn test_failing_account_does_not_stop_others() {
        let remote = Arc::new(FakeRemote::new());
        remote.reject("alice@example.com");
        let mut contact = eas_core::ContactObject::default();
        contact.name.first = Some("Kim".into());
        remote.remote_add(
            "bob@example.com",
            CONTACTS,
            EntityObject::Contact(contact).to_application_data(),
        );
        let (agent, db) = agent(remote).await;

        let summary = agent.run_once().await;
        assert_eq!(summary, RoundSummary { succeeded: 1, failed: 1 });

        let status = agent.status().await;
        assert_eq!(status.rounds, 1);
        assert!(status.accounts["alice"].last_error.is_some());
        assert!(status.accounts["alice"].last_sync.is_none());
        let bob = &status.accounts["bob"];
        assert!(bob.last_error.is_none());
        assert_eq!(bob.last_report.as_ref().map(|r| r.pulled), Some(1));

        assert!(db
            .correlations()
            .list_by_type("alice", CorrelationType::ContactCollection)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_holder_is_unique_per_agent() {
        let remote = Arc::new(FakeRemote::new());
        let (first, _) = agent(remote.clone()).await;
        let (second, _) = agent(remote).await;
        assert!(first.holder().starts_with("bridge01:"));
        assert_ne!(first.holder(), second.holder());
    }

    #[tokio::test]
    async fn test_spawned_agent_runs_and_stops() {
        let remote = Arc::new(FakeRemote::new());
        let (agent, db) = agent(remote).await;
        let handle = agent.spawn();

        for _ in 0..200 {
            if handle.status().await.rounds >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.status().await.rounds >= 1);

        let status = handle.status.clone();
        handle.shutdown().await;
        assert!(!status.read().await.running);

        let links = db
            .correlations()
            .list_by_type("bob", CorrelationType::TaskCollection)
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].lock_state, 0);
    }
}
