//! # EAS Bridge
//!
//! Runs the sync agent against the configured ActiveSync server.
//!
//! ## Usage
//! ```bash
//! # Poll forever with the default config location
//! eas-bridge
//!
//! # One round over every account, then exit
//! eas-bridge --config ./bridge.toml --once
//!
//! # More logging
//! RUST_LOG=debug eas-bridge
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use eas_db::{Database, DbConfig};
use eas_sync::{BridgeConfig, HttpTransport, SyncAgent, TransportConfig};

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    once: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut iter = env::args().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().ok_or("--config requires a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--once" => args.once = true,
            "--help" | "-h" => {
                println!("Usage: eas-bridge [--config <path>] [--once]");
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,eas_sync=debug,eas_db=info,sqlx=warn")),
        )
        .with_target(true)
        .init();

    let args = parse_args()?;

    let config = BridgeConfig::load(args.config)?;
    config.validate()?;
    let db_path = config.database_path()?;
    info!(
        device_id = %config.device_id(),
        remote = %config.remote.url,
        accounts = config.accounts.len(),
        db = %db_path.display(),
        "Configuration loaded"
    );

    let db = Database::new(DbConfig::new(db_path)).await?;
    let schema = db.schema_version().await?;
    if !schema.is_current() {
        warn!(applied = schema.applied, embedded = schema.embedded, "Database schema is behind");
    }
    let remote = Arc::new(HttpTransport::new(TransportConfig::from_bridge(&config)?)?);
    let agent = SyncAgent::new(config, db, remote);

    if args.once {
        let summary = agent.run_once().await;
        info!(succeeded = summary.succeeded, failed = summary.failed, "Single round complete");
        if summary.failed > 0 {
            std::process::exit(1);
        }
        return Ok(());
    }

    let handle = agent.spawn();
    shutdown_signal().await;
    handle.shutdown().await;

    info!("Bridge shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C (or SIGTERM on unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping agent");
}
