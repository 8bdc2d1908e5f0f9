//! # Correlation Hooks
//!
//! Entry points the local store's owner calls when something disappears
//! locally, so the correlation store can follow.
//!
//! ```text
//! local_entity_deleted     → object correlation marked altered
//!                             (next pass sends Delete, then drops it)
//! local_collection_deleted → object correlations dropped, then the
//!                             collection correlation itself
//! user_deleted             → every correlation and account state of the user
//! ```

use chrono::Utc;
use tracing::{debug, info};

use crate::error::SyncResult;
use eas_core::EntityKind;
use eas_db::{Database, DbResult};

#[derive(Debug, Clone)]
pub struct CorrelationHooks {
    db: Database,
}

impl CorrelationHooks {
    pub fn new(db: Database) -> Self {
        CorrelationHooks { db }
    }

    /// Returns true if the entity was paired with a remote object.
    pub async fn local_entity_deleted(
        &self,
        user_id: &str,
        kind: EntityKind,
        entity_id: i64,
    ) -> SyncResult<bool> {
        let correlations = self.db.correlations();
        let Some(link) = correlations
            .find_by_local_id(user_id, kind.object_correlation(), entity_id)
            .await?
        else {
            return Ok(false);
        };

        let marked = present(correlations.mark_altered(link.id, Utc::now()).await)?;
        debug!(user_id, entity_id, correlation_id = link.id, "Local delete queued for remote");
        Ok(marked)
    }

    /// Returns true if the collection was paired with a remote folder.
    pub async fn local_collection_deleted(
        &self,
        user_id: &str,
        kind: EntityKind,
        collection_id: i64,
    ) -> SyncResult<bool> {
        let correlations = self.db.correlations();
        let Some(link) = correlations
            .find_by_local_id(user_id, kind.collection_correlation(), collection_id)
            .await?
        else {
            return Ok(false);
        };

        let removed = correlations.delete_by_affiliation(link.id).await?;
        present(correlations.delete(link.id).await)?;
        info!(user_id, collection_id, objects = removed, "Collection unpaired");
        Ok(true)
    }

    /// Removes everything the bridge knows about a user.
    pub async fn user_deleted(&self, user_id: &str) -> SyncResult<u64> {
        let removed = self.db.correlations().delete_by_user(user_id).await?;
        self.db.account_states().delete(user_id).await?;
        info!(user_id, correlations = removed, "User forgotten");
        Ok(removed)
    }
}

/// `Ok(false)` when the row was already gone.
fn present(result: DbResult<()>) -> SyncResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err.into()),
    }
}
