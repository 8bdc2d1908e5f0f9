//! # Entity Repository
//!
//! Local contacts, events and tasks, stored as JSON payloads.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 create / modify / delete (one transaction)              │
//! │                                                                         │
//! │   BEGIN                                                                 │
//! │     INSERT/UPDATE/DELETE entities ...                                   │
//! │     INSERT INTO chronicle (..., operation)   ← exactly one entry        │
//! │   COMMIT                                                                │
//! │                                                                         │
//! │   Either both rows land or neither does, so a delta read from the       │
//! │   chronicle never misses a committed entity write.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Filters
//! Lookups take `(field, operator, value)` triples. Fields are a closed
//! enum, so nothing caller-supplied ever reaches the SQL text.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use std::fmt;
use tracing::debug;

use super::chronicle::ChronicleRepository;
use crate::error::{DbError, DbResult};
use eas_core::{ChronicleOperation, EntityKind, LocalEntity};

const COLUMNS: &str =
    "id, user_id, kind, collection_id, uuid, signature, label, data, created_at, modified_at";

// =============================================================================
// Filters
// =============================================================================

/// Entity columns a filter may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Id,
    Uuid,
    UserId,
    Kind,
    CollectionId,
    Label,
    Signature,
    CreatedAt,
    ModifiedAt,
}

impl FilterField {
    fn column(&self) -> &'static str {
        match self {
            FilterField::Id => "id",
            FilterField::Uuid => "uuid",
            FilterField::UserId => "user_id",
            FilterField::Kind => "kind",
            FilterField::CollectionId => "collection_id",
            FilterField::Label => "label",
            FilterField::Signature => "signature",
            FilterField::CreatedAt => "created_at",
            FilterField::ModifiedAt => "modified_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl FilterOperator {
    fn sql(&self) -> &'static str {
        match self {
            FilterOperator::Eq => " = ",
            FilterOperator::Ne => " <> ",
            FilterOperator::Gt => " > ",
            FilterOperator::Ge => " >= ",
            FilterOperator::Lt => " < ",
            FilterOperator::Le => " <= ",
        }
    }
}

impl std::str::FromStr for FilterOperator {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" | "==" => Ok(FilterOperator::Eq),
            "!=" | "<>" => Ok(FilterOperator::Ne),
            ">" => Ok(FilterOperator::Gt),
            ">=" => Ok(FilterOperator::Ge),
            "<" => Ok(FilterOperator::Lt),
            "<=" => Ok(FilterOperator::Le),
            other => Err(DbError::QueryFailed(format!("unsupported filter operator '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    Time(DateTime<Utc>),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Time(value)
    }
}

impl From<EntityKind> for FilterValue {
    fn from(value: EntityKind) -> Self {
        FilterValue::Text(value.as_str().to_string())
    }
}

/// One `field operator value` condition. Conditions are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: FilterField,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(field: FilterField, operator: FilterOperator, value: impl Into<FilterValue>) -> Self {
        Filter {
            field,
            operator,
            value: value.into(),
        }
    }

    pub fn eq(field: FilterField, value: impl Into<FilterValue>) -> Self {
        Filter::new(field, FilterOperator::Eq, value)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.field.column(), self.operator.sql(), self.value)
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filters: &[Filter], mut has_where: bool) {
    for filter in filters {
        builder.push(if has_where { " AND " } else { " WHERE " });
        has_where = true;
        builder.push(filter.field.column()).push(filter.operator.sql());
        match &filter.value {
            FilterValue::Text(text) => builder.push_bind(text.clone()),
            FilterValue::Integer(n) => builder.push_bind(*n),
            FilterValue::Time(t) => builder.push_bind(*t),
        };
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, FromRow)]
struct EntityRow {
    id: i64,
    user_id: String,
    kind: EntityKind,
    collection_id: i64,
    uuid: String,
    signature: String,
    label: Option<String>,
    data: String,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl From<EntityRow> for LocalEntity {
    fn from(row: EntityRow) -> Self {
        LocalEntity {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind,
            collection_id: row.collection_id,
            uuid: row.uuid,
            signature: row.signature,
            label: row.label,
            data: row.data,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for local entities.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    pool: SqlitePool,
}

impl EntityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        EntityRepository { pool }
    }

    /// Entities in one collection, narrowed by `filters`.
    pub async fn list(
        &self,
        user_id: &str,
        collection_id: i64,
        filters: &[Filter],
    ) -> DbResult<Vec<LocalEntity>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {COLUMNS} FROM entities"));
        builder.push(" WHERE user_id = ").push_bind(user_id.to_string());
        builder.push(" AND collection_id = ").push_bind(collection_id);
        push_filters(&mut builder, filters, true);
        builder.push(" ORDER BY id");

        let rows = builder
            .build_query_as::<EntityRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(LocalEntity::from).collect())
    }

    /// Ids of every entity matching all `filters`.
    pub async fn find(&self, filters: &[Filter]) -> DbResult<Vec<i64>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT id FROM entities");
        push_filters(&mut builder, filters, false);
        builder.push(" ORDER BY id");

        let ids = builder
            .build_query_scalar::<i64>()
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn fetch_by_id(&self, id: i64) -> DbResult<Option<LocalEntity>> {
        let sql = format!("SELECT {COLUMNS} FROM entities WHERE id = ?");
        let row = sqlx::query_as::<_, EntityRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(LocalEntity::from))
    }

    pub async fn fetch_by_uuid(&self, uuid: &str) -> DbResult<Option<LocalEntity>> {
        let sql = format!("SELECT {COLUMNS} FROM entities WHERE uuid = ?");
        let row = sqlx::query_as::<_, EntityRow>(&sql)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(LocalEntity::from))
    }

    /// Whether an entity with this id exists.
    pub async fn confirm(&self, id: i64) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Inserts the entity and logs `Created`. Returns the new id.
    pub async fn create(&self, entity: &LocalEntity) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO entities (
                user_id, kind, collection_id, uuid, signature, label, data, created_at, modified_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entity.user_id)
        .bind(entity.kind.as_str())
        .bind(entity.collection_id)
        .bind(&entity.uuid)
        .bind(&entity.signature)
        .bind(&entity.label)
        .bind(&entity.data)
        .bind(entity.created_at)
        .bind(entity.modified_at)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        ChronicleRepository::append(
            &mut *tx,
            entity.kind,
            &entity.user_id,
            entity.collection_id,
            id,
            &entity.uuid,
            ChronicleOperation::Created,
        )
        .await?;
        tx.commit().await?;

        debug!(entity_id = id, user_id = %entity.user_id, kind = %entity.kind, "Entity created");
        Ok(id)
    }

    /// Rewrites label, payload and signature, and logs `Modified`.
    pub async fn modify(&self, entity: &LocalEntity) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE entities SET label = ?, data = ?, signature = ?, modified_at = ? WHERE id = ?",
        )
        .bind(&entity.label)
        .bind(&entity.data)
        .bind(&entity.signature)
        .bind(Utc::now())
        .bind(entity.id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Entity", entity.id.to_string()));
        }

        ChronicleRepository::append(
            &mut *tx,
            entity.kind,
            &entity.user_id,
            entity.collection_id,
            entity.id,
            &entity.uuid,
            ChronicleOperation::Modified,
        )
        .await?;
        tx.commit().await?;

        debug!(entity_id = entity.id, "Entity modified");
        Ok(())
    }

    /// Removes the entity and logs `Deleted`.
    pub async fn delete(&self, id: i64) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {COLUMNS} FROM entities WHERE id = ?");
        let entity: LocalEntity = sqlx::query_as::<_, EntityRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Entity", id.to_string()))?
            .into();

        sqlx::query("DELETE FROM entities WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        ChronicleRepository::append(
            &mut *tx,
            entity.kind,
            &entity.user_id,
            entity.collection_id,
            id,
            &entity.uuid,
            ChronicleOperation::Deleted,
        )
        .await?;
        tx.commit().await?;

        debug!(entity_id = id, "Entity deleted");
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
