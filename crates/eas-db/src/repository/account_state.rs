//! Per-user remote state that belongs to no collection: the FolderSync key.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use eas_core::{AccountState, INITIAL_SYNC_KEY};

#[derive(Debug, FromRow)]
struct AccountStateRow {
    user_id: String,
    hierarchy_key: String,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AccountStateRepository {
    pool: SqlitePool,
}

impl AccountStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        AccountStateRepository { pool }
    }

    pub async fn get(&self, user_id: &str) -> DbResult<Option<AccountState>> {
        let row = sqlx::query_as::<_, AccountStateRow>(
            "SELECT user_id, hierarchy_key, updated_at FROM account_states WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| AccountState {
            user_id: r.user_id,
            hierarchy_key: r.hierarchy_key,
            updated_at: r.updated_at,
        }))
    }

    /// Stored FolderSync key, or "0" for a user never synced.
    pub async fn hierarchy_key(&self, user_id: &str) -> DbResult<String> {
        Ok(self
            .get(user_id)
            .await?
            .map(|s| s.hierarchy_key)
            .unwrap_or_else(|| INITIAL_SYNC_KEY.to_string()))
    }

    pub async fn set_hierarchy_key(&self, user_id: &str, key: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO account_states (user_id, hierarchy_key, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                hierarchy_key = excluded.hierarchy_key,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        debug!(user_id, hierarchy_key = key, "Hierarchy key stored");
        Ok(())
    }

    /// Removes the user's state. Returns whether a row existed.
    pub async fn delete(&self, user_id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM account_states WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_hierarchy_key_upsert() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.account_states();

        assert_eq!(repo.hierarchy_key("alice").await.unwrap(), "0");
        assert!(repo.get("alice").await.unwrap().is_none());

        repo.set_hierarchy_key("alice", "1").await.unwrap();
        repo.set_hierarchy_key("alice", "2").await.unwrap();
        assert_eq!(repo.hierarchy_key("alice").await.unwrap(), "2");

        assert!(repo.delete("alice").await.unwrap());
        assert!(!repo.delete("alice").await.unwrap());
    }
}
