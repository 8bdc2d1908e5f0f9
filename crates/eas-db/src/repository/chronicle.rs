//! # Chronicle Repository
//!
//! Append-only log of entity mutations, read back as per-collection deltas.
//!
//! ## Watermarks
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       reminisce(user, C, W)                             │
//! │                                                                         │
//! │  chronicle ids:   ... 17  18  19  20  21  22 │ 23 (written later)       │
//! │                        ▲                 ▲   │                          │
//! │                        W               apex  │                          │
//! │                                              │                          │
//! │  1. apex = MAX(id) for (user, tag, C)     ← computed first              │
//! │  2. window = (W, apex], grouped by entity, MAX(operation) wins          │
//! │  3. returned watermark = encode(apex)                                   │
//! │  4. pages 2..n pass that watermark back as `upto` (reminisce_until)     │
//! │                                                                         │
//! │  Entry 23 lands after step 1 → outside this window, inside the next.    │
//! │  Ids come from AUTOINCREMENT under SQLite's single writer, so they      │
//! │  are assigned in commit order and never reused.                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Watermarks leave this module only in their encoded form.

use chrono::{TimeZone, Utc};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use eas_core::{
    ChronicleDelta, ChronicleEntry, ChronicleItem, ChronicleOperation, EntityKind, Watermark,
};

#[derive(Debug, FromRow)]
struct ChronicleRow {
    id: i64,
    user_id: String,
    tag: String,
    collection_id: i64,
    entity_id: i64,
    entity_uuid: String,
    operation: i64,
    stamp: i64,
}

impl TryFrom<ChronicleRow> for ChronicleEntry {
    type Error = DbError;

    fn try_from(row: ChronicleRow) -> Result<Self, Self::Error> {
        Ok(ChronicleEntry {
            id: row.id,
            user_id: row.user_id,
            tag: row.tag.parse::<EntityKind>()?,
            collection_id: row.collection_id,
            entity_id: row.entity_id,
            entity_uuid: row.entity_uuid,
            operation: operation(row.operation)?,
            stamp: Utc
                .timestamp_micros(row.stamp)
                .single()
                .ok_or_else(|| DbError::Serialization(format!("chronicle stamp {}", row.stamp)))?,
        })
    }
}

/// One entity's collapsed view of the window.
#[derive(Debug, FromRow)]
struct CollapsedRow {
    entity_id: i64,
    entity_uuid: String,
    operation: i64,
    last_id: i64,
}

fn operation(code: i64) -> DbResult<ChronicleOperation> {
    ChronicleOperation::from_code(code)
        .ok_or_else(|| DbError::Serialization(format!("chronicle operation {code}")))
}

/// Chronicle access for one entity kind (the chronicle `tag`).
#[derive(Debug, Clone)]
pub struct ChronicleRepository {
    pool: SqlitePool,
    kind: EntityKind,
}

impl ChronicleRepository {
    pub fn new(pool: SqlitePool, kind: EntityKind) -> Self {
        ChronicleRepository { pool, kind }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Appends one entry on any executor, so entity writes can log inside
    /// their own transaction.
    pub(crate) async fn append<'e, E>(
        executor: E,
        kind: EntityKind,
        user_id: &str,
        collection_id: i64,
        entity_id: i64,
        entity_uuid: &str,
        op: ChronicleOperation,
    ) -> DbResult<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            INSERT INTO chronicle (user_id, tag, collection_id, entity_id, entity_uuid, operation, stamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(collection_id)
        .bind(entity_id)
        .bind(entity_uuid)
        .bind(op.code())
        .bind(Utc::now().timestamp_micros())
        .execute(executor)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Records a mutation outside of an entity write.
    pub async fn record(
        &self,
        user_id: &str,
        collection_id: i64,
        entity_id: i64,
        entity_uuid: &str,
        op: ChronicleOperation,
    ) -> DbResult<i64> {
        Self::append(&self.pool, self.kind, user_id, collection_id, entity_id, entity_uuid, op).await
    }

    /// Highest entry id recorded for the collection, or the origin.
    pub async fn apex(&self, user_id: &str, collection_id: i64) -> DbResult<Watermark> {
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(id) FROM chronicle WHERE user_id = ? AND tag = ? AND collection_id = ?",
        )
        .bind(user_id)
        .bind(self.kind.as_str())
        .bind(collection_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(max.map(Watermark::new).unwrap_or(Watermark::ORIGIN))
    }

    /// Encoded watermark for "everything so far"; used to skip history on
    /// a fresh pairing.
    pub async fn current(&self, user_id: &str, collection_id: i64) -> DbResult<String> {
        Ok(self.apex(user_id, collection_id).await?.encode())
    }

    /// What changed in a collection since `watermark`.
    ///
    /// An absent or unreadable watermark reads from the beginning. Entities
    /// are ordered by their latest entry; `limit`/`offset` page through that
    /// order. The returned watermark is the apex observed before reading.
    ///
    /// This reads the first page. Later pages go through
    /// [`reminisce_until`](Self::reminisce_until) with the watermark this
    /// call returned, so writes landing between pages cannot reorder them.
    pub async fn reminisce(
        &self,
        user_id: &str,
        collection_id: i64,
        watermark: Option<&str>,
        limit: Option<u32>,
        offset: u32,
    ) -> DbResult<ChronicleDelta> {
        let apex = self.apex(user_id, collection_id).await?;
        self.read_window(user_id, collection_id, watermark, apex, limit, offset)
            .await
    }

    /// Same as [`reminisce`](Self::reminisce), bounded above by `upto`
    /// (the watermark returned for the first page) instead of the live apex.
    ///
    /// ```text
    /// page 1: reminisce(W, limit, 0)            → delta.watermark = A
    /// page n: reminisce_until(W, A, limit, k)   → same window (W, A]
    /// next:   reminisce(A, ..)                  → everything written after A
    /// ```
    pub async fn reminisce_until(
        &self,
        user_id: &str,
        collection_id: i64,
        watermark: Option<&str>,
        upto: &str,
        limit: Option<u32>,
        offset: u32,
    ) -> DbResult<ChronicleDelta> {
        let upto = Watermark::decode(upto)
            .ok_or_else(|| DbError::Serialization(format!("unreadable page bound {upto}")))?;
        self.read_window(user_id, collection_id, watermark, upto, limit, offset)
            .await
    }

    async fn read_window(
        &self,
        user_id: &str,
        collection_id: i64,
        watermark: Option<&str>,
        apex: Watermark,
        limit: Option<u32>,
        offset: u32,
    ) -> DbResult<ChronicleDelta> {
        if let Some(token) = watermark {
            if Watermark::decode(token).is_none() {
                warn!(user_id, collection_id, token, "Unreadable watermark, reading from start");
            }
        }
        let from = Watermark::decode_or_origin(watermark);

        let mut delta = ChronicleDelta {
            watermark: from.max(apex).encode(),
            ..Default::default()
        };
        if apex <= from {
            return Ok(delta);
        }

        // Rows inside (from, apex] never change once written, so the
        // collapsed order is stable for a fixed apex.
        let rows = sqlx::query_as::<_, CollapsedRow>(
            r#"
            SELECT entity_id,
                   MAX(entity_uuid) AS entity_uuid,
                   MAX(operation)   AS operation,
                   MAX(id)          AS last_id
            FROM chronicle
            WHERE user_id = ? AND tag = ? AND collection_id = ?
              AND id > ? AND id <= ?
            GROUP BY entity_id
            ORDER BY last_id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(self.kind.as_str())
        .bind(collection_id)
        .bind(from.sequence())
        .bind(apex.sequence())
        .bind(limit.map(i64::from).unwrap_or(-1))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            delta.push(ChronicleItem {
                entity_id: row.entity_id,
                entity_uuid: row.entity_uuid,
                operation: operation(row.operation)?,
                sequence: row.last_id,
            });
        }

        debug!(
            user_id,
            kind = %self.kind,
            collection_id,
            additions = delta.additions.len(),
            modifications = delta.modifications.len(),
            deletions = delta.deletions.len(),
            "Chronicle read"
        );
        Ok(delta)
    }

    /// Raw entries after `after`, oldest first.
    pub async fn entries(
        &self,
        user_id: &str,
        collection_id: i64,
        after: Watermark,
    ) -> DbResult<Vec<ChronicleEntry>> {
        let rows = sqlx::query_as::<_, ChronicleRow>(
            r#"
            SELECT id, user_id, tag, collection_id, entity_id, entity_uuid, operation, stamp
            FROM chronicle
            WHERE user_id = ? AND tag = ? AND collection_id = ? AND id > ?
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .bind(self.kind.as_str())
        .bind(collection_id)
        .bind(after.sequence())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ChronicleEntry::try_from).collect()
    }

    /// Drops entries at or below `upto`. Only safe once every consumer's
    /// watermark has passed it.
    pub async fn prune(&self, user_id: &str, collection_id: i64, upto: Watermark) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM chronicle WHERE user_id = ? AND tag = ? AND collection_id = ? AND id <= ?",
        )
        .bind(user_id)
        .bind(self.kind.as_str())
        .bind(collection_id)
        .bind(upto.sequence())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
