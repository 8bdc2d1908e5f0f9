//! # Collection Repository
//!
//! Local address books, calendars and task lists. Deleting a collection
//! removes its entities through the `ON DELETE CASCADE` foreign key.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use eas_core::{EntityKind, LocalCollection};

const COLUMNS: &str = "id, user_id, kind, uuid, label, color, created_at, modified_at";

#[derive(Debug, FromRow)]
struct CollectionRow {
    id: i64,
    user_id: String,
    kind: EntityKind,
    uuid: String,
    label: String,
    color: Option<String>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl From<CollectionRow> for LocalCollection {
    fn from(row: CollectionRow) -> Self {
        LocalCollection {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind,
            uuid: row.uuid,
            label: row.label,
            color: row.color,
            created_at: row.created_at,
            modified_at: row.modified_at,
        }
    }
}

/// Repository for local collections.
#[derive(Debug, Clone)]
pub struct CollectionRepository {
    pool: SqlitePool,
}

impl CollectionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CollectionRepository { pool }
    }

    /// A user's collections of one kind, oldest first.
    pub async fn list_by_user(&self, user_id: &str, kind: EntityKind) -> DbResult<Vec<LocalCollection>> {
        let sql = format!("SELECT {COLUMNS} FROM collections WHERE user_id = ? AND kind = ? ORDER BY id");
        let rows = sqlx::query_as::<_, CollectionRow>(&sql)
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(LocalCollection::from).collect())
    }

    pub async fn fetch_by_id(&self, id: i64) -> DbResult<Option<LocalCollection>> {
        let sql = format!("SELECT {COLUMNS} FROM collections WHERE id = ?");
        let row = sqlx::query_as::<_, CollectionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(LocalCollection::from))
    }

    pub async fn fetch_by_uuid(&self, uuid: &str) -> DbResult<Option<LocalCollection>> {
        let sql = format!("SELECT {COLUMNS} FROM collections WHERE uuid = ?");
        let row = sqlx::query_as::<_, CollectionRow>(&sql)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(LocalCollection::from))
    }

    /// Inserts the collection and returns its id.
    pub async fn create(&self, collection: &LocalCollection) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO collections (user_id, kind, uuid, label, color, created_at, modified_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&collection.user_id)
        .bind(collection.kind.as_str())
        .bind(&collection.uuid)
        .bind(&collection.label)
        .bind(&collection.color)
        .bind(collection.created_at)
        .bind(collection.modified_at)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(
            collection_id = id,
            user_id = %collection.user_id,
            kind = %collection.kind,
            label = %collection.label,
            "Collection created"
        );
        Ok(id)
    }

    /// Updates label and color, stamping `modified_at`.
    pub async fn modify(&self, collection: &LocalCollection) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE collections SET label = ?, color = ?, modified_at = ? WHERE id = ?",
        )
        .bind(&collection.label)
        .bind(&collection.color)
        .bind(Utc::now())
        .bind(collection.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Collection", collection.id.to_string()));
        }
        Ok(())
    }

    /// Deletes a collection and, by cascade, all of its entities.
    pub async fn delete(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Collection", id.to_string()));
        }
        debug!(collection_id = id, "Collection deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use eas_core::LocalEntity;

    #[tokio::test]
    async fn test_create_fetch_list() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.collections();

        let mut book = LocalCollection::new("alice", EntityKind::Contact, "Friends");
        book.id = repo.create(&book).await.unwrap();
        repo.create(&LocalCollection::new("alice", EntityKind::Event, "Work"))
            .await
            .unwrap();

        let contacts = repo.list_by_user("alice", EntityKind::Contact).await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].label, "Friends");

        let by_uuid = repo.fetch_by_uuid(&book.uuid).await.unwrap().unwrap();
        assert_eq!(by_uuid.id, book.id);
        assert_eq!(by_uuid.kind, EntityKind::Contact);
    }

    #[tokio::test]
    async fn test_modify() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.collections();

        let mut list = LocalCollection::new("alice", EntityKind::Task, "Chores");
        list.id = repo.create(&list).await.unwrap();
        list.label = "Errands".into();
        list.color = Some("#ff8800".into());
        repo.modify(&list).await.unwrap();

        let stored = repo.fetch_by_id(list.id).await.unwrap().unwrap();
        assert_eq!(stored.label, "Errands");
        assert_eq!(stored.color.as_deref(), Some("#ff8800"));

        list.id = 9999;
        assert!(repo.modify(&list).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_cascades_entities() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.collections();

        let mut book = LocalCollection::new("alice", EntityKind::Contact, "Friends");
        book.id = repo.create(&book).await.unwrap();
        let entity = LocalEntity::new(&book, Some("Ann".into()), "{}".into());
        let entity_id = db.entities().create(&entity).await.unwrap();

        repo.delete(book.id).await.unwrap();
        assert!(db.entities().fetch_by_id(entity_id).await.unwrap().is_none());
        assert!(repo.delete(book.id).await.unwrap_err().is_not_found());
    }
}
