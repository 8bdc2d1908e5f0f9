//! # Correlation Repository
//!
//! Local ↔ remote identity links and the lease that serializes workers.
//!
//! ## Lease Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    One row, three lock columns                          │
//! │                                                                         │
//! │  lock_state  lock_holder  lock_heartbeat (epoch µs)                     │
//! │                                                                         │
//! │  acquire:  UPDATE ... SET lock_state=1, lock_holder=?, heartbeat=now    │
//! │            WHERE id=? AND (lock_state=0                                 │
//! │                            OR lock_heartbeat IS NULL                    │
//! │                            OR lock_heartbeat < now - stale_after        │
//! │                            OR lock_holder = ?)                          │
//! │            rows_affected == 1 → held                                    │
//! │                                                                         │
//! │  renew:    UPDATE ... SET heartbeat=now                                 │
//! │            WHERE id=? AND lock_state<>0 AND lock_holder=?               │
//! │            rows_affected == 0 → LeaseLost                               │
//! │                                                                         │
//! │  release:  UPDATE ... SET lock_state=0, holder=NULL, heartbeat=NULL     │
//! │            WHERE id=? AND lock_holder=?          (idempotent)           │
//! │                                                                         │
//! │  Every transition is one statement: SQLite serializes writers, so two  │
//! │  workers can never both see rows_affected == 1 for the same row.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A crashed worker needs no cleanup: its heartbeat ages past the stale
//! window and the next acquire reclaims the row.

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use eas_core::{Correlation, CorrelationType};

const COLUMNS: &str = "id, user_id, type, affiliation_id, \
    local_object_id, local_collection_id, local_object_signature, local_state, \
    remote_object_id, remote_collection_id, remote_object_signature, remote_state, \
    lock_state, lock_holder, lock_heartbeat, altered_at, performed_at";

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, FromRow)]
struct CorrelationRow {
    id: i64,
    user_id: String,
    #[sqlx(rename = "type")]
    correlation_type: String,
    affiliation_id: Option<i64>,
    local_object_id: i64,
    local_collection_id: Option<i64>,
    local_object_signature: Option<String>,
    local_state: Option<String>,
    remote_object_id: String,
    remote_collection_id: Option<String>,
    remote_object_signature: Option<String>,
    remote_state: Option<String>,
    lock_state: i32,
    lock_holder: Option<String>,
    lock_heartbeat: Option<i64>,
    altered_at: Option<DateTime<Utc>>,
    performed_at: Option<DateTime<Utc>>,
}

impl TryFrom<CorrelationRow> for Correlation {
    type Error = DbError;

    fn try_from(row: CorrelationRow) -> Result<Self, Self::Error> {
        Ok(Correlation {
            id: row.id,
            user_id: row.user_id,
            correlation_type: row.correlation_type.parse::<CorrelationType>()?,
            affiliation_id: row.affiliation_id,
            local_object_id: row.local_object_id,
            local_collection_id: row.local_collection_id,
            local_object_signature: row.local_object_signature,
            local_state: row.local_state,
            remote_object_id: row.remote_object_id,
            remote_collection_id: row.remote_collection_id,
            remote_object_signature: row.remote_object_signature,
            remote_state: row.remote_state,
            lock_state: row.lock_state,
            lock_holder: row.lock_holder,
            lock_heartbeat: row
                .lock_heartbeat
                .and_then(|micros| Utc.timestamp_micros(micros).single()),
            altered_at: row.altered_at,
            performed_at: row.performed_at,
        })
    }
}

fn collect(rows: Vec<CorrelationRow>) -> DbResult<Vec<Correlation>> {
    rows.into_iter().map(Correlation::try_from).collect()
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for correlation records.
#[derive(Debug, Clone)]
pub struct CorrelationRepository {
    pool: SqlitePool,
}

impl CorrelationRepository {
    /// Creates a new CorrelationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CorrelationRepository { pool }
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    pub async fn fetch(&self, id: i64) -> DbResult<Option<Correlation>> {
        let sql = format!("SELECT {COLUMNS} FROM correlations WHERE id = ?");
        let row = sqlx::query_as::<_, CorrelationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Correlation::try_from).transpose()
    }

    /// Unique lookup by local identity.
    pub async fn find_by_local_id(
        &self,
        user_id: &str,
        correlation_type: CorrelationType,
        local_object_id: i64,
    ) -> DbResult<Option<Correlation>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM correlations \
             WHERE user_id = ? AND type = ? AND local_object_id = ?"
        );
        let row = sqlx::query_as::<_, CorrelationRow>(&sql)
            .bind(user_id)
            .bind(correlation_type.code())
            .bind(local_object_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Correlation::try_from).transpose()
    }

    /// Unique lookup by remote identity.
    ///
    /// For collection correlations `remote_collection_id` is the folder's parent.
    pub async fn find_by_remote_id(
        &self,
        user_id: &str,
        remote_collection_id: &str,
        remote_object_id: &str,
    ) -> DbResult<Option<Correlation>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM correlations \
             WHERE user_id = ? AND remote_collection_id = ? AND remote_object_id = ?"
        );
        let row = sqlx::query_as::<_, CorrelationRow>(&sql)
            .bind(user_id)
            .bind(remote_collection_id)
            .bind(remote_object_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Correlation::try_from).transpose()
    }

    /// Object correlations belonging to one collection correlation.
    pub async fn list_by_affiliation(&self, affiliation_id: i64) -> DbResult<Vec<Correlation>> {
        let sql = format!("SELECT {COLUMNS} FROM correlations WHERE affiliation_id = ? ORDER BY id");
        let rows = sqlx::query_as::<_, CorrelationRow>(&sql)
            .bind(affiliation_id)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    pub async fn list_by_type(
        &self,
        user_id: &str,
        correlation_type: CorrelationType,
    ) -> DbResult<Vec<Correlation>> {
        let sql = format!("SELECT {COLUMNS} FROM correlations WHERE user_id = ? AND type = ? ORDER BY id");
        let rows = sqlx::query_as::<_, CorrelationRow>(&sql)
            .bind(user_id)
            .bind(correlation_type.code())
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    /// Object correlations in a collection with a pending `altered_at` marker.
    pub async fn list_altered(&self, affiliation_id: i64) -> DbResult<Vec<Correlation>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM correlations \
             WHERE affiliation_id = ? AND altered_at IS NOT NULL ORDER BY altered_at, id"
        );
        let rows = sqlx::query_as::<_, CorrelationRow>(&sql)
            .bind(affiliation_id)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    // -------------------------------------------------------------------------
    // CRUD
    // -------------------------------------------------------------------------

    /// Inserts a correlation and returns its id. Lock fields start cleared.
    pub async fn create(&self, correlation: &Correlation) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO correlations (
                user_id, type, affiliation_id,
                local_object_id, local_collection_id, local_object_signature, local_state,
                remote_object_id, remote_collection_id, remote_object_signature, remote_state,
                lock_state, lock_holder, lock_heartbeat, altered_at, performed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, NULL, ?, ?)
            "#,
        )
        .bind(&correlation.user_id)
        .bind(correlation.correlation_type.code())
        .bind(correlation.affiliation_id)
        .bind(correlation.local_object_id)
        .bind(correlation.local_collection_id)
        .bind(&correlation.local_object_signature)
        .bind(&correlation.local_state)
        .bind(&correlation.remote_object_id)
        .bind(&correlation.remote_collection_id)
        .bind(&correlation.remote_object_signature)
        .bind(&correlation.remote_state)
        .bind(correlation.altered_at)
        .bind(correlation.performed_at)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(
            correlation_id = id,
            user_id = %correlation.user_id,
            correlation_type = %correlation.correlation_type,
            remote_object_id = %correlation.remote_object_id,
            "Correlation created"
        );
        Ok(id)
    }

    /// Writes every non-lock field. Fails with NotFound if the row is gone.
    pub async fn update(&self, correlation: &Correlation) -> DbResult<()> {
        let result = self.update_where(correlation, None).await?;
        if result == 0 {
            return Err(DbError::not_found("Correlation", correlation.id.to_string()));
        }
        Ok(())
    }

    /// Like [`update`](Self::update), but only while `holder` owns the lease.
    ///
    /// Fails with LeaseLost if another worker took the row, NotFound if it was deleted.
    pub async fn update_under_lease(&self, correlation: &Correlation, holder: &str) -> DbResult<()> {
        let result = self.update_where(correlation, Some(holder)).await?;
        if result == 0 {
            return Err(self.lease_failure(correlation.id, holder).await);
        }
        Ok(())
    }

    async fn update_where(&self, c: &Correlation, holder: Option<&str>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE correlations SET
                affiliation_id = ?,
                local_object_id = ?, local_collection_id = ?,
                local_object_signature = ?, local_state = ?,
                remote_object_id = ?, remote_collection_id = ?,
                remote_object_signature = ?, remote_state = ?,
                altered_at = ?, performed_at = ?
            WHERE id = ?
              AND (? IS NULL OR (lock_state <> 0 AND lock_holder = ?))
            "#,
        )
        .bind(c.affiliation_id)
        .bind(c.local_object_id)
        .bind(c.local_collection_id)
        .bind(&c.local_object_signature)
        .bind(&c.local_state)
        .bind(&c.remote_object_id)
        .bind(&c.remote_collection_id)
        .bind(&c.remote_object_signature)
        .bind(&c.remote_state)
        .bind(c.altered_at)
        .bind(c.performed_at)
        .bind(c.id)
        .bind(holder)
        .bind(holder)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Deletes one correlation (and, through the foreign key, its affiliates).
    pub async fn delete(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM correlations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Correlation", id.to_string()));
        }
        debug!(correlation_id = id, "Correlation deleted");
        Ok(())
    }

    /// Removes every object correlation affiliated with a collection correlation.
    /// The collection correlation itself stays.
    pub async fn delete_by_affiliation(&self, affiliation_id: i64) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM correlations WHERE affiliation_id = ?")
            .bind(affiliation_id)
            .execute(&self.pool)
            .await?;
        debug!(
            affiliation_id,
            removed = result.rows_affected(),
            "Affiliated correlations deleted"
        );
        Ok(result.rows_affected())
    }

    /// Full teardown for a user.
    pub async fn delete_by_user(&self, user_id: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM correlations WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        debug!(user_id, removed = result.rows_affected(), "User correlations deleted");
        Ok(result.rows_affected())
    }

    /// Sets the deferred-reconcile marker. Touches nothing else.
    pub async fn mark_altered(&self, id: i64, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query("UPDATE correlations SET altered_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Correlation", id.to_string()));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lease
    // -------------------------------------------------------------------------

    /// Tries to take the lease on a correlation. Returns false if someone else
    /// holds a live lease. Re-acquiring one's own lease succeeds.
    pub async fn acquire_lease(&self, id: i64, holder: &str, stale_after: Duration) -> DbResult<bool> {
        self.acquire_lease_at(id, holder, stale_after, Utc::now()).await
    }

    /// [`acquire_lease`](Self::acquire_lease) with an explicit clock.
    pub async fn acquire_lease_at(
        &self,
        id: i64,
        holder: &str,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let now_micros = now.timestamp_micros();
        let cutoff = now_micros - stale_after.num_microseconds().unwrap_or(i64::MAX);

        let result = sqlx::query(
            r#"
            UPDATE correlations
            SET lock_state = 1, lock_holder = ?, lock_heartbeat = ?
            WHERE id = ?
              AND (lock_state = 0
                   OR lock_heartbeat IS NULL
                   OR lock_heartbeat < ?
                   OR lock_holder = ?)
            "#,
        )
        .bind(holder)
        .bind(now_micros)
        .bind(id)
        .bind(cutoff)
        .bind(holder)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            debug!(correlation_id = id, holder, "Lease acquired");
            return Ok(true);
        }

        if !self.exists(id).await? {
            return Err(DbError::not_found("Correlation", id.to_string()));
        }
        debug!(correlation_id = id, holder, "Lease held by another worker");
        Ok(false)
    }

    /// Refreshes the heartbeat. Fails with LeaseLost if `holder` no longer owns it.
    pub async fn renew_lease(&self, id: i64, holder: &str) -> DbResult<()> {
        self.renew_lease_at(id, holder, Utc::now()).await
    }

    pub async fn renew_lease_at(&self, id: i64, holder: &str, now: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE correlations SET lock_heartbeat = ? \
             WHERE id = ? AND lock_state <> 0 AND lock_holder = ?",
        )
        .bind(now.timestamp_micros())
        .bind(id)
        .bind(holder)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(correlation_id = id, holder, "Lease lost");
            return Err(DbError::lease_lost(id, holder));
        }
        Ok(())
    }

    /// Clears the lock if `holder` owns it. Idempotent; a missing row is fine.
    pub async fn release_lease(&self, id: i64, holder: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE correlations SET lock_state = 0, lock_holder = NULL, lock_heartbeat = NULL \
             WHERE id = ? AND lock_holder = ?",
        )
        .bind(id)
        .bind(holder)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            debug!(correlation_id = id, holder, "Lease released");
        }
        Ok(())
    }

    async fn exists(&self, id: i64) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM correlations WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn lease_failure(&self, id: i64, holder: &str) -> DbError {
        match self.exists(id).await {
            Ok(true) => DbError::lease_lost(id, holder),
            Ok(false) => DbError::not_found("Correlation", id.to_string()),
            Err(e) => e,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
