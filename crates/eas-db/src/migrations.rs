//! # Schema Migrations
//!
//! The bridge schema ships inside the binary. `sqlx::migrate!` embeds every
//! `migrations/sqlite/NNN_*.sql` file at compile time, and [`Database::new`]
//! applies whatever is pending before any repository is handed out.
//!
//! ```text
//! 001_initial_schema.sql   collections, entities, chronicle,
//!                          correlations, account_states
//! ```
//!
//! Migration files are append-only. A schema change is a new numbered file.
//!
//! [`Database::new`]: crate::Database::new

use sqlx::migrate::Migrator;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applied versus embedded schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaVersion {
    /// Highest successfully applied migration, 0 on a fresh file.
    pub applied: i64,
    /// Highest migration compiled into this binary.
    pub embedded: i64,
}

impl SchemaVersion {
    pub fn is_current(&self) -> bool {
        self.applied >= self.embedded
    }
}

/// Applies pending migrations in version order, then reports where the
/// schema stands.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<SchemaVersion> {
    MIGRATOR.run(pool).await?;

    let version = schema_version(pool).await?;
    info!(
        applied = version.applied,
        embedded = version.embedded,
        "Schema up to date"
    );
    Ok(version)
}

/// Reads the applied version from `_sqlx_migrations`. Errors if migrations
/// have never run against this database.
pub async fn schema_version(pool: &SqlitePool) -> DbResult<SchemaVersion> {
    let applied: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;

    Ok(SchemaVersion {
        applied: applied.unwrap_or(0),
        embedded: MIGRATOR.iter().map(|m| m.version).max().unwrap_or(0),
    })
}
