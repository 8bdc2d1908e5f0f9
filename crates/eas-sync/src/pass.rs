//! # Sync Pass
//!
//! One synchronization pass for one user: hierarchy first, then every paired
//! collection under its correlation lease.
//!
//! ## Pass Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SyncPass::run(account)                         │
//! │                                                                         │
//! │  1. FolderSync(hierarchy key)                                          │
//! │     ├── status 9 → key := "0", retry once                              │
//! │     ├── Add/Update of contact/calendar/task folder                      │
//! │     │      unpaired → LocalCollection + collection correlation         │
//! │     │      paired   → refresh label / parent                           │
//! │     └── Delete → drop the collection correlation (and its objects)     │
//! │                                                                         │
//! │  2. For each collection correlation:                                   │
//! │     acquire_lease ──(held elsewhere)──► skip until next pass           │
//! │        │                                                                │
//! │        ▼                                                                │
//! │     PULL  Sync(GetChanges) until no MoreAvailable                      │
//! │           Add/Change → create/modify entity, link correlation          │
//! │           Delete/SoftDelete → delete entity + correlation              │
//! │           status 3 → key := "0", initial Sync, pull again (once)       │
//! │        │                                                                │
//! │        ▼                                                                │
//! │     PUSH  reminisce(local_state) + altered correlations                │
//! │           skip entries whose signature matches the correlation         │
//! │           Add(ClientId=uuid) / Change / Delete, window_size per batch  │
//! │        │                                                                │
//! │        ▼                                                                │
//! │     persist remote_state, local_state, performed_at                    │
//! │     release_lease (always)                                             │
//! │                                                                         │
//! │  Heartbeat renewed every `heartbeat` while a Sync request is in       │
//! │  flight and after it returns; LeaseLost drops only the collection,    │
//! │  anything else aborts the user's pass.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{AccountConfig, SyncSettings};
use crate::error::{SyncError, SyncResult};
use crate::protocol::folder::STATUS_INVALID_KEY as FOLDER_INVALID_KEY;
use crate::protocol::sync::{STATUS_INVALID_KEY, STATUS_OBJECT_NOT_FOUND};
use crate::protocol::{
    exchange, ClientCommand, Command, FolderSyncRequest, FolderSyncResponse, RemoteFolder,
    ServerCommand, SyncRequest, SyncResponse, STATUS_SUCCESS,
};
use crate::transport::{Credentials, RemoteTransport};
use eas_core::{
    content_signature, Correlation, EntityKind, EntityObject, LocalCollection, LocalEntity,
    TaggedNode, INITIAL_SYNC_KEY,
};
use eas_db::Database;

// =============================================================================
// Settings & Report
// =============================================================================

#[derive(Debug, Clone)]
pub struct PassSettings {
    pub window_size: u32,
    pub lease_stale: chrono::Duration,
    /// Lease renewal period while a Sync request is in flight.
    pub heartbeat: Duration,
}

impl PassSettings {
    pub fn from_config(sync: &SyncSettings) -> Self {
        PassSettings {
            window_size: sync.window_size.max(1),
            lease_stale: sync.lease_stale_after(),
            heartbeat: sync.heartbeat_interval(),
        }
    }
}

impl Default for PassSettings {
    fn default() -> Self {
        PassSettings::from_config(&SyncSettings::default())
    }
}

/// What one pass did for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub folders_paired: usize,
    pub folders_dropped: usize,
    pub collections_synced: usize,
    /// Leased elsewhere, or the lease was lost mid-way.
    pub collections_skipped: usize,
    pub pulled: usize,
    pub pushed: usize,
}

// =============================================================================
// Outgoing changes
// =============================================================================

/// A local change queued for the remote, with what is needed to settle it.
#[derive(Debug)]
enum Outgoing {
    Add {
        entity: LocalEntity,
        data: TaggedNode,
    },
    Change {
        link: Correlation,
        signature: String,
        data: TaggedNode,
    },
    Delete {
        link: Correlation,
    },
}

impl Outgoing {
    fn command(&self) -> ClientCommand {
        match self {
            Outgoing::Add { entity, data } => ClientCommand::Add {
                client_id: entity.uuid.clone(),
                data: data.clone(),
            },
            Outgoing::Change { link, data, .. } => ClientCommand::Change {
                server_id: link.remote_object_id.clone(),
                data: data.clone(),
            },
            Outgoing::Delete { link } => ClientCommand::Delete {
                server_id: link.remote_object_id.clone(),
            },
        }
    }
}

// =============================================================================
// Sync Pass
// =============================================================================

#[derive(Clone)]
pub struct SyncPass {
    db: Database,
    remote: Arc<dyn RemoteTransport>,
    settings: PassSettings,
    holder: String,
}

impl SyncPass {
    /// `holder` identifies this worker in correlation leases.
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteTransport>,
        settings: PassSettings,
        holder: impl Into<String>,
    ) -> Self {
        SyncPass {
            db,
            remote,
            settings,
            holder: holder.into(),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Runs hierarchy and collection sync for one account.
    pub async fn run(&self, account: &AccountConfig) -> SyncResult<PassReport> {
        let user_id = account.user_id.as_str();
        let credentials = Credentials::new(&account.username, &account.password);
        let mut report = PassReport::default();

        info!(user_id, holder = %self.holder, "Sync pass started");
        self.sync_hierarchy(user_id, &credentials, &mut report).await?;

        for kind in EntityKind::ALL {
            let folders = self
                .db
                .correlations()
                .list_by_type(user_id, kind.collection_correlation())
                .await?;

            for folder in folders {
                let correlation_id = folder.id;
                match self.sync_collection(&credentials, folder, &mut report).await {
                    Ok(true) => report.collections_synced += 1,
                    Ok(false) => report.collections_skipped += 1,
                    Err(err) if err.is_lease_error() => {
                        warn!(user_id, correlation_id, error = %err, "Collection abandoned");
                        report.collections_skipped += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        info!(
            user_id,
            synced = report.collections_synced,
            skipped = report.collections_skipped,
            pulled = report.pulled,
            pushed = report.pushed,
            "Sync pass finished"
        );
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Hierarchy
    // -------------------------------------------------------------------------

    async fn sync_hierarchy(
        &self,
        user_id: &str,
        credentials: &Credentials,
        report: &mut PassReport,
    ) -> SyncResult<()> {
        let accounts = self.db.account_states();
        let mut key = accounts.hierarchy_key(user_id).await?;
        let mut reset = false;

        let response = loop {
            let request = FolderSyncRequest::new(key.clone());
            let document = exchange(
                self.remote.as_ref(),
                Command::FolderSync,
                credentials,
                &request.to_document(),
            )
            .await?
            .ok_or_else(|| SyncError::UnexpectedResponse("empty FolderSync response".into()))?;
            let response = FolderSyncResponse::parse(&document)?;

            match response.status {
                STATUS_SUCCESS => break response,
                FOLDER_INVALID_KEY if !reset => {
                    warn!(user_id, key = %key, "Hierarchy key rejected, resynchronizing folders");
                    reset = true;
                    key = INITIAL_SYNC_KEY.to_string();
                    accounts.set_hierarchy_key(user_id, &key).await?;
                }
                status => {
                    return Err(SyncError::RemoteStatus {
                        command: Command::FolderSync.to_string(),
                        status,
                    })
                }
            }
        };

        for folder in response.added.iter().chain(response.updated.iter()) {
            self.pair_folder(user_id, folder, report).await?;
        }
        for server_id in &response.deleted {
            if let Some(link) = self.find_folder(user_id, server_id).await? {
                self.db.correlations().delete(link.id).await?;
                report.folders_dropped += 1;
                info!(user_id, server_id = %server_id, "Remote folder deleted, correlation dropped");
            }
        }

        if let Some(new_key) = &response.sync_key {
            accounts.set_hierarchy_key(user_id, new_key).await?;
        }
        Ok(())
    }

    async fn find_folder(&self, user_id: &str, server_id: &str) -> SyncResult<Option<Correlation>> {
        for kind in EntityKind::ALL {
            let found = self
                .db
                .correlations()
                .list_by_type(user_id, kind.collection_correlation())
                .await?
                .into_iter()
                .find(|c| c.remote_object_id == server_id);
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    async fn pair_folder(
        &self,
        user_id: &str,
        folder: &RemoteFolder,
        report: &mut PassReport,
    ) -> SyncResult<()> {
        let Some(kind) = folder.kind() else {
            debug!(user_id, server_id = %folder.server_id, folder_type = folder.folder_type, "Folder type not bridged");
            return Ok(());
        };

        let collections = self.db.collections();
        let correlations = self.db.correlations();

        if let Some(mut link) = self.find_folder(user_id, &folder.server_id).await? {
            if let Some(mut collection) = collections.fetch_by_id(link.local_object_id).await? {
                if collection.label != folder.display_name {
                    collection.label = folder.display_name.clone();
                    collections.modify(&collection).await?;
                }
            }
            if link.remote_collection_id.as_deref() != Some(folder.parent_id.as_str()) {
                link.remote_collection_id = Some(folder.parent_id.clone());
                correlations.update(&link).await?;
            }
            return Ok(());
        }

        let mut collection = LocalCollection::new(user_id, kind, &folder.display_name);
        collection.id = collections.create(&collection).await?;
        let link = Correlation::collection(
            user_id,
            kind,
            collection.id,
            &folder.server_id,
            &folder.parent_id,
        );
        correlations.create(&link).await?;
        report.folders_paired += 1;

        info!(
            user_id,
            server_id = %folder.server_id,
            collection_id = collection.id,
            kind = %kind,
            "Remote folder paired with new local collection"
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Collections
    // -------------------------------------------------------------------------

    /// Returns false if another worker holds the collection.
    async fn sync_collection(
        &self,
        credentials: &Credentials,
        folder: Correlation,
        report: &mut PassReport,
    ) -> SyncResult<bool> {
        let correlations = self.db.correlations();
        if !correlations
            .acquire_lease(folder.id, &self.holder, self.settings.lease_stale)
            .await?
        {
            warn!(
                user_id = %folder.user_id,
                correlation_id = folder.id,
                "Collection leased by another worker, skipping"
            );
            return Ok(false);
        }

        let outcome = self.sync_leased(credentials, folder.id, report).await;

        if let Err(err) = correlations.release_lease(folder.id, &self.holder).await {
            warn!(correlation_id = folder.id, error = %err, "Failed to release lease");
        }
        outcome.map(|()| true)
    }

    async fn sync_leased(
        &self,
        credentials: &Credentials,
        correlation_id: i64,
        report: &mut PassReport,
    ) -> SyncResult<()> {
        let correlations = self.db.correlations();
        let Some(mut folder) = correlations.fetch(correlation_id).await? else {
            return Ok(());
        };

        let Some(collection) = self.db.collections().fetch_by_id(folder.local_object_id).await? else {
            warn!(
                user_id = %folder.user_id,
                correlation_id,
                "Local collection vanished, unpairing remote folder"
            );
            correlations.delete(correlation_id).await?;
            return Ok(());
        };

        debug!(
            user_id = %folder.user_id,
            correlation_id,
            collection = %collection.label,
            "Collection sync started"
        );

        self.pull(credentials, &mut folder, &collection, report).await?;
        if !self.push(credentials, &mut folder, &collection, report).await? {
            return Ok(());
        }

        folder.performed_at = Some(Utc::now());
        correlations.update_under_lease(&folder, &self.holder).await?;
        Ok(())
    }

    /// One Sync round trip. The folder's heartbeat is renewed every
    /// `heartbeat` while the request (retries included) is in flight, and
    /// once more when it returns.
    async fn sync_request(
        &self,
        credentials: &Credentials,
        folder: &Correlation,
        request: SyncRequest,
    ) -> SyncResult<SyncResponse> {
        let correlations = self.db.correlations();
        let body = request.to_document();
        let call = exchange(self.remote.as_ref(), Command::Sync, credentials, &body);
        tokio::pin!(call);

        let every = self.settings.heartbeat.max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + every, every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let document = loop {
            tokio::select! {
                result = &mut call => break result?,
                _ = heartbeat.tick() => {
                    correlations.renew_lease(folder.id, &self.holder).await?;
                    debug!(correlation_id = folder.id, "Lease renewed mid-request");
                }
            }
        };

        correlations.renew_lease(folder.id, &self.holder).await?;
        SyncResponse::parse(document.as_ref())
    }

    /// Stores the folder's sync key under the lease.
    async fn save_key(&self, folder: &mut Correlation, key: &str) -> SyncResult<()> {
        folder.remote_state = Some(key.to_string());
        self.db
            .correlations()
            .update_under_lease(folder, &self.holder)
            .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Pull
    // -------------------------------------------------------------------------

    /// Applies remote changes until the server has nothing more. A rejected
    /// key is reset once and the collection resynchronized from "0".
    async fn pull(
        &self,
        credentials: &Credentials,
        folder: &mut Correlation,
        collection: &LocalCollection,
        report: &mut PassReport,
    ) -> SyncResult<()> {
        let mut key = folder
            .remote_state
            .clone()
            .unwrap_or_else(|| INITIAL_SYNC_KEY.to_string());
        let mut reset = false;

        'restart: loop {
            if key == INITIAL_SYNC_KEY {
                let request = SyncRequest::initial(folder.remote_object_id.as_str());
                let response = self.sync_request(credentials, folder, request).await?;
                if !response.is_success() {
                    return Err(remote_status(response.status));
                }
                key = response.sync_key.ok_or_else(|| {
                    SyncError::UnexpectedResponse("initial Sync without SyncKey".into())
                })?;
                self.save_key(folder, &key).await?;
            }

            loop {
                let request = SyncRequest::pull(
                    key.as_str(),
                    folder.remote_object_id.as_str(),
                    self.settings.window_size,
                );
                let response = self.sync_request(credentials, folder, request).await?;

                match response.status {
                    STATUS_SUCCESS => {}
                    STATUS_INVALID_KEY if !reset => {
                        warn!(
                            user_id = %folder.user_id,
                            correlation_id = folder.id,
                            key = %key,
                            "Sync key rejected, resynchronizing collection"
                        );
                        reset = true;
                        key = INITIAL_SYNC_KEY.to_string();
                        self.save_key(folder, &key).await?;
                        continue 'restart;
                    }
                    status => return Err(remote_status(status)),
                }

                report.pulled += self
                    .apply_remote(folder, collection, &response.commands)
                    .await?;

                if let Some(new_key) = &response.sync_key {
                    key = new_key.clone();
                    self.save_key(folder, &key).await?;
                }
                if !response.more_available {
                    return Ok(());
                }
            }
        }
    }

    /// Applies server commands to the local store. Returns how many were applied.
    async fn apply_remote(
        &self,
        folder: &Correlation,
        collection: &LocalCollection,
        commands: &[ServerCommand],
    ) -> SyncResult<usize> {
        let mut applied = 0;
        for command in commands {
            let done = match command {
                ServerCommand::Add { server_id, data } | ServerCommand::Change { server_id, data } => {
                    self.apply_upsert(folder, collection, server_id, data).await?
                }
                ServerCommand::Delete { server_id } | ServerCommand::SoftDelete { server_id } => {
                    self.apply_delete(folder, server_id).await?
                }
            };
            if done {
                applied += 1;
            }
        }
        Ok(applied)
    }

    async fn apply_upsert(
        &self,
        folder: &Correlation,
        collection: &LocalCollection,
        server_id: &str,
        data: &TaggedNode,
    ) -> SyncResult<bool> {
        let object = match EntityObject::from_application_data(collection.kind, data) {
            Ok(object) => object,
            Err(err) => {
                warn!(
                    user_id = %folder.user_id,
                    server_id,
                    error = %err,
                    "Skipping unreadable remote object"
                );
                return Ok(false);
            }
        };
        let payload = object.to_json()?;
        let signature = content_signature(payload.as_bytes());

        let correlations = self.db.correlations();
        let entities = self.db.entities();
        let existing = correlations
            .find_by_remote_id(&folder.user_id, &folder.remote_object_id, server_id)
            .await?;

        let Some(mut link) = existing else {
            let mut entity = LocalEntity::new(collection, object.label(), payload);
            entity.id = entities.create(&entity).await?;

            let mut link = Correlation::object(folder, entity.id, server_id);
            link.local_object_signature = Some(entity.signature.clone());
            link.remote_object_signature = Some(entity.signature);
            link.performed_at = Some(Utc::now());
            correlations.create(&link).await?;
            debug!(user_id = %folder.user_id, server_id, entity_id = entity.id, "Remote object added");
            return Ok(true);
        };

        match entities.fetch_by_id(link.local_object_id).await? {
            Some(mut entity) => {
                if entity.signature != signature {
                    entity.set_data(payload);
                    entity.label = object.label();
                    entities.modify(&entity).await?;
                }
            }
            None => {
                // Deleted locally but changed remotely: the remote copy wins.
                let mut entity = LocalEntity::new(collection, object.label(), payload);
                entity.id = entities.create(&entity).await?;
                link.local_object_id = entity.id;
            }
        }

        link.local_object_signature = Some(signature.clone());
        link.remote_object_signature = Some(signature);
        link.altered_at = None;
        link.performed_at = Some(Utc::now());
        correlations.update(&link).await?;
        debug!(user_id = %folder.user_id, server_id, entity_id = link.local_object_id, "Remote object changed");
        Ok(true)
    }

    async fn apply_delete(&self, folder: &Correlation, server_id: &str) -> SyncResult<bool> {
        let correlations = self.db.correlations();
        let Some(link) = correlations
            .find_by_remote_id(&folder.user_id, &folder.remote_object_id, server_id)
            .await?
        else {
            debug!(user_id = %folder.user_id, server_id, "Remote delete for unknown object");
            return Ok(false);
        };

        tolerate_missing(self.db.entities().delete(link.local_object_id).await)?;
        tolerate_missing(correlations.delete(link.id).await)?;
        debug!(user_id = %folder.user_id, server_id, entity_id = link.local_object_id, "Remote object deleted");
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Push
    // -------------------------------------------------------------------------

    /// Sends local changes. Returns false if the collection had to be abandoned.
    async fn push(
        &self,
        credentials: &Credentials,
        folder: &mut Correlation,
        collection: &LocalCollection,
        report: &mut PassReport,
    ) -> SyncResult<bool> {
        let delta = self
            .db
            .chronicle(collection.kind)
            .reminisce(
                &folder.user_id,
                collection.id,
                folder.local_state.as_deref(),
                None,
                0,
            )
            .await?;

        let outgoing = self.collect_outgoing(folder, collection.kind, &delta).await?;
        let mut key = folder
            .remote_state
            .clone()
            .unwrap_or_else(|| INITIAL_SYNC_KEY.to_string());

        for batch in outgoing.chunks(self.settings.window_size.max(1) as usize) {
            let commands = batch.iter().map(Outgoing::command).collect();
            let request = SyncRequest::push(key.as_str(), folder.remote_object_id.as_str(), commands);
            let response = self.sync_request(credentials, folder, request).await?;

            match response.status {
                STATUS_SUCCESS => {}
                STATUS_INVALID_KEY => {
                    // Local changes stay unread; the next pass resyncs and pushes them.
                    warn!(
                        user_id = %folder.user_id,
                        correlation_id = folder.id,
                        "Sync key rejected during push, collection resyncs next pass"
                    );
                    self.save_key(folder, INITIAL_SYNC_KEY).await?;
                    return Ok(false);
                }
                status => return Err(remote_status(status)),
            }

            if let Some(new_key) = &response.sync_key {
                key = new_key.clone();
                self.save_key(folder, &key).await?;
            }
            report.pulled += self
                .apply_remote(folder, collection, &response.commands)
                .await?;
            self.settle(folder, batch, &response).await?;
            report.pushed += batch.len();
        }

        folder.local_state = Some(delta.watermark);
        Ok(true)
    }

    async fn collect_outgoing(
        &self,
        folder: &Correlation,
        kind: EntityKind,
        delta: &eas_core::ChronicleDelta,
    ) -> SyncResult<Vec<Outgoing>> {
        let correlations = self.db.correlations();
        let entities = self.db.entities();
        let user_id = folder.user_id.as_str();

        let mut outgoing = Vec::new();
        let mut claimed: HashSet<String> = HashSet::new();

        for item in delta.additions.iter().chain(delta.modifications.iter()) {
            let Some(entity) = entities.fetch_by_id(item.entity_id).await? else {
                continue;
            };
            let link = correlations
                .find_by_local_id(user_id, kind.object_correlation(), entity.id)
                .await?;

            if let Some(link) = &link {
                if link.local_object_signature.as_deref() == Some(entity.signature.as_str()) {
                    debug!(user_id, entity_id = entity.id, "Skipping echo of own write");
                    continue;
                }
            }

            let Some(data) = application_data(kind, &entity) else {
                continue;
            };
            match link {
                None => outgoing.push(Outgoing::Add { entity, data }),
                Some(link) => {
                    claimed.insert(link.remote_object_id.clone());
                    outgoing.push(Outgoing::Change {
                        link,
                        signature: entity.signature,
                        data,
                    });
                }
            }
        }

        for item in &delta.deletions {
            let link = correlations
                .find_by_local_id(user_id, kind.object_correlation(), item.entity_id)
                .await?;
            if let Some(link) = link {
                if claimed.insert(link.remote_object_id.clone()) {
                    outgoing.push(Outgoing::Delete { link });
                }
            }
        }

        for link in correlations.list_altered(folder.id).await? {
            if !claimed.insert(link.remote_object_id.clone()) {
                continue;
            }
            match entities.fetch_by_id(link.local_object_id).await? {
                None => outgoing.push(Outgoing::Delete { link }),
                Some(entity) => {
                    let Some(data) = application_data(kind, &entity) else {
                        continue;
                    };
                    outgoing.push(Outgoing::Change {
                        link,
                        signature: entity.signature,
                        data,
                    });
                }
            }
        }

        Ok(outgoing)
    }

    /// Records the outcome of one pushed batch in the correlation store.
    async fn settle(
        &self,
        folder: &Correlation,
        batch: &[Outgoing],
        response: &SyncResponse,
    ) -> SyncResult<()> {
        let correlations = self.db.correlations();
        let user_id = folder.user_id.as_str();

        for sent in batch {
            match sent {
                Outgoing::Add { entity, .. } => {
                    let reply = response
                        .add_responses
                        .iter()
                        .find(|r| r.client_id == entity.uuid);
                    match reply {
                        Some(reply) if reply.status == STATUS_SUCCESS => {
                            let Some(server_id) = &reply.server_id else {
                                warn!(user_id, entity_id = entity.id, "Add accepted without ServerId");
                                continue;
                            };
                            let mut link = Correlation::object(folder, entity.id, server_id);
                            link.local_object_signature = Some(entity.signature.clone());
                            link.remote_object_signature = Some(entity.signature.clone());
                            link.performed_at = Some(Utc::now());
                            correlations.create(&link).await?;
                        }
                        Some(reply) => {
                            warn!(user_id, entity_id = entity.id, status = reply.status, "Remote rejected Add");
                        }
                        None => {
                            warn!(user_id, entity_id = entity.id, "No response for Add");
                        }
                    }
                }
                Outgoing::Change { link, signature, .. } => {
                    let failure = response
                        .change_responses
                        .iter()
                        .find(|r| r.server_id == link.remote_object_id && r.status != STATUS_SUCCESS);
                    if let Some(failure) = failure {
                        warn!(
                            user_id,
                            server_id = %link.remote_object_id,
                            status = failure.status,
                            "Remote rejected Change"
                        );
                        if failure.status == STATUS_OBJECT_NOT_FOUND {
                            tolerate_missing(correlations.delete(link.id).await)?;
                        }
                        continue;
                    }

                    let mut link = link.clone();
                    link.local_object_signature = Some(signature.clone());
                    link.remote_object_signature = Some(signature.clone());
                    link.altered_at = None;
                    link.performed_at = Some(Utc::now());
                    tolerate_missing(correlations.update(&link).await)?;
                }
                Outgoing::Delete { link } => {
                    tolerate_missing(correlations.delete(link.id).await)?;
                }
            }
        }
        Ok(())
    }
}

fn application_data(kind: EntityKind, entity: &LocalEntity) -> Option<TaggedNode> {
    match EntityObject::from_json(kind, &entity.data) {
        Ok(object) => Some(object.to_application_data()),
        Err(err) => {
            warn!(entity_id = entity.id, error = %err, "Stored payload unreadable, not pushed");
            None
        }
    }
}

fn remote_status(status: u32) -> SyncError {
    SyncError::RemoteStatus {
        command: Command::Sync.to_string(),
        status,
    }
}

fn tolerate_missing(result: eas_db::DbResult<()>) -> SyncResult<()> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other.map_err(SyncError::from),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeRemote, CALENDAR, CONTACTS, TASKS};
    use crate::hooks::CorrelationHooks;
    use eas_core::codepage::ns;
    use eas_core::{ContactObject, CorrelationType};
    use eas_db::DbConfig;

    const USER: &str = "alice";
    const LOGIN: &str = "alice@example.com";

    fn account() -> AccountConfig {
        AccountConfig {
            user_id: USER.into(),
            username: LOGIN.into(),
            password: "secret".into(),
        }
    }

    fn contact(first: &str) -> ContactObject {
        let mut contact = ContactObject::default();
        contact.name.first = Some(first.into());
        contact
    }

    fn contact_data(first: &str) -> TaggedNode {
        EntityObject::Contact(contact(first)).to_application_data()
    }

    async fn setup() -> (Database, Arc<FakeRemote>, SyncPass) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(FakeRemote::new());
        let pass = SyncPass::new(db.clone(), remote.clone(), PassSettings::default(), "worker-a");
        (db, remote, pass)
    }

    async fn contact_book(db: &Database) -> (LocalCollection, Correlation) {
        let links = db
            .correlations()
            .list_by_type(USER, CorrelationType::ContactCollection)
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        let book = db
            .collections()
            .fetch_by_id(links[0].local_object_id)
            .await
            .unwrap()
            .unwrap();
        (book, links[0].clone())
    }

    async fn create_local(db: &Database, book: &LocalCollection, first: &str) -> LocalEntity {
        let payload = EntityObject::Contact(contact(first)).to_json().unwrap();
        let mut entity = LocalEntity::new(book, Some(first.into()), payload);
        entity.id = db.entities().create(&entity).await.unwrap();
        entity
    }

    #[tokio::test]
    async fn test_first_pass_pairs_supported_folders() {
        let (db, remote, pass) = setup().await;

        let report = pass.run(&account()).await.unwrap();
        assert_eq!(report.folders_paired, 3);
        assert_eq!(report.collections_synced, 3);

        for kind in EntityKind::ALL {
            let collections = db.collections().list_by_user(USER, kind).await.unwrap();
            assert_eq!(collections.len(), 1);
        }
        let (book, link) = contact_book(&db).await;
        assert_eq!(book.label, "Contacts");
        assert_eq!(link.remote_object_id, CONTACTS);
        assert!(link.remote_state.is_some());
        assert!(link.performed_at.is_some());
        assert_eq!(link.lock_state, 0);

        assert_eq!(db.account_states().hierarchy_key(USER).await.unwrap(), "1");
        assert_eq!(remote.request_count(LOGIN, Command::FolderSync), 1);

        // Second pass pairs nothing new.
        let report = pass.run(&account()).await.unwrap();
        assert_eq!(report.folders_paired, 0);
    }

    #[tokio::test]
    async fn test_pull_creates_entities_without_echo() {
        let (db, remote, pass) = setup().await;
        remote.remote_add(LOGIN, CONTACTS, contact_data("Ann"));
        remote.remote_add(LOGIN, CONTACTS, contact_data("Bob"));

        let report = pass.run(&account()).await.unwrap();
        assert_eq!(report.pulled, 2);
        assert_eq!(report.pushed, 0);

        let (book, link) = contact_book(&db).await;
        let entities = db.entities().list(USER, book.id, &[]).await.unwrap();
        let labels: Vec<_> = entities.iter().filter_map(|e| e.label.clone()).collect();
        assert_eq!(labels, vec!["Ann".to_string(), "Bob".to_string()]);

        let objects = db.correlations().list_by_affiliation(link.id).await.unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(
            objects[0].local_object_signature.as_deref(),
            Some(entities[0].signature.as_str())
        );

        pass.run(&account()).await.unwrap();
        assert!(remote.received(LOGIN).is_empty());
    }

    #[tokio::test]
    async fn test_local_add_is_pushed_once() {
        let (db, remote, pass) = setup().await;
        pass.run(&account()).await.unwrap();
        let (book, link) = contact_book(&db).await;

        let entity = create_local(&db, &book, "Cleo").await;
        let report = pass.run(&account()).await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(remote.item_count(LOGIN, CONTACTS), 1);

        let object = db
            .correlations()
            .find_by_local_id(USER, CorrelationType::ContactObject, entity.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(object.affiliation_id, Some(link.id));
        let pushed = remote.item(LOGIN, CONTACTS, &object.remote_object_id).unwrap();
        let parsed = EntityObject::from_application_data(EntityKind::Contact, &pushed).unwrap();
        assert_eq!(parsed.label().as_deref(), Some("Cleo"));

        let report = pass.run(&account()).await.unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(remote.received(LOGIN).len(), 1);
    }

    #[tokio::test]
    async fn test_local_modify_and_delete_are_pushed() {
        let (db, remote, pass) = setup().await;
        pass.run(&account()).await.unwrap();
        let (book, _) = contact_book(&db).await;

        let mut entity = create_local(&db, &book, "Dana").await;
        pass.run(&account()).await.unwrap();
        let object = db
            .correlations()
            .find_by_local_id(USER, CorrelationType::ContactObject, entity.id)
            .await
            .unwrap()
            .unwrap();

        entity.set_data(EntityObject::Contact(contact("Dara")).to_json().unwrap());
        db.entities().modify(&entity).await.unwrap();
        pass.run(&account()).await.unwrap();
        let stored = remote.item(LOGIN, CONTACTS, &object.remote_object_id).unwrap();
        let parsed = EntityObject::from_application_data(EntityKind::Contact, &stored).unwrap();
        assert_eq!(parsed.label().as_deref(), Some("Dara"));

        db.entities().delete(entity.id).await.unwrap();
        CorrelationHooks::new(db.clone())
            .local_entity_deleted(USER, EntityKind::Contact, entity.id)
            .await
            .unwrap();
        pass.run(&account()).await.unwrap();

        assert_eq!(remote.item_count(LOGIN, CONTACTS), 0);
        assert!(db.correlations().fetch(object.id).await.unwrap().is_none());
        let deletes = remote
            .received(LOGIN)
            .into_iter()
            .filter(|c| matches!(c, ClientCommand::Delete { .. }))
            .count();
        assert_eq!(deletes, 1);
    }

    #[tokio::test]
    async fn test_remote_change_and_delete_applied() {
        let (db, remote, pass) = setup().await;
        let server_id = remote.remote_add(LOGIN, CONTACTS, contact_data("Eve"));
        pass.run(&account()).await.unwrap();
        let (book, _) = contact_book(&db).await;

        remote.remote_change(LOGIN, CONTACTS, &server_id, contact_data("Evelyn"));
        pass.run(&account()).await.unwrap();
        let entities = db.entities().list(USER, book.id, &[]).await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].label.as_deref(), Some("Evelyn"));

        remote.remote_delete(LOGIN, CONTACTS, &server_id);
        pass.run(&account()).await.unwrap();
        assert!(db.entities().list(USER, book.id, &[]).await.unwrap().is_empty());
        assert!(db
            .correlations()
            .find_by_remote_id(USER, CONTACTS, &server_id)
            .await
            .unwrap()
            .is_none());
        assert!(remote.received(LOGIN).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_edit_remote_wins() {
        let (db, remote, pass) = setup().await;
        let server_id = remote.remote_add(LOGIN, CONTACTS, contact_data("Finn"));
        pass.run(&account()).await.unwrap();
        let (book, _) = contact_book(&db).await;

        let mut entity = db.entities().list(USER, book.id, &[]).await.unwrap().remove(0);
        entity.set_data(EntityObject::Contact(contact("Local Finn")).to_json().unwrap());
        db.entities().modify(&entity).await.unwrap();
        remote.remote_change(LOGIN, CONTACTS, &server_id, contact_data("Remote Finn"));

        pass.run(&account()).await.unwrap();

        let stored = db.entities().fetch_by_id(entity.id).await.unwrap().unwrap();
        assert_eq!(stored.label.as_deref(), Some("Remote Finn"));
        assert!(remote.received(LOGIN).is_empty());
    }

    #[tokio::test]
    async fn test_windowed_pull_follows_more_available() {
        let (db, remote, _) = setup().await;
        for name in ["A", "B", "C", "D", "E"] {
            remote.remote_add(LOGIN, CONTACTS, contact_data(name));
        }
        let settings = PassSettings {
            window_size: 2,
            ..PassSettings::default()
        };
        let pass = SyncPass::new(db.clone(), remote.clone(), settings, "worker-a");

        let report = pass.run(&account()).await.unwrap();
        assert_eq!(report.pulled, 5);
        let (book, _) = contact_book(&db).await;
        assert_eq!(db.entities().list(USER, book.id, &[]).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_multi_window_pull_then_push_in_one_pass() {
        let (db, remote, pass) = setup().await;
        pass.run(&account()).await.unwrap();
        let (book, _) = contact_book(&db).await;
        create_local(&db, &book, "Lou").await;
        for name in ["M", "N", "O"] {
            remote.remote_add(LOGIN, CONTACTS, contact_data(name));
        }

        let settings = PassSettings {
            window_size: 2,
            ..PassSettings::default()
        };
        let windowed = SyncPass::new(db.clone(), remote.clone(), settings, "worker-a");
        let report = windowed.run(&account()).await.unwrap();

        assert_eq!(report.pulled, 3);
        assert_eq!(report.pushed, 1);
        assert_eq!(remote.item_count(LOGIN, CONTACTS), 4);
        let (_, link) = contact_book(&db).await;
        assert!(link.local_state.is_some());
    }

    #[tokio::test]
    async fn test_invalid_sync_key_resyncs_without_duplicates() {
        let (db, remote, pass) = setup().await;
        remote.remote_add(LOGIN, CONTACTS, contact_data("Gus"));
        pass.run(&account()).await.unwrap();

        remote.invalidate_key(LOGIN, CONTACTS);
        pass.run(&account()).await.unwrap();

        let (book, link) = contact_book(&db).await;
        assert_eq!(db.entities().list(USER, book.id, &[]).await.unwrap().len(), 1);
        assert_eq!(db.correlations().list_by_affiliation(link.id).await.unwrap().len(), 1);
        assert_ne!(link.remote_state.as_deref(), Some(INITIAL_SYNC_KEY));
    }

    #[tokio::test]
    async fn test_invalid_hierarchy_key_resyncs_folders() {
        let (db, remote, pass) = setup().await;
        pass.run(&account()).await.unwrap();

        remote.invalidate_hierarchy(LOGIN);
        let report = pass.run(&account()).await.unwrap();
        assert_eq!(report.folders_paired, 0);
        assert_eq!(
            db.collections().list_by_user(USER, EntityKind::Contact).await.unwrap().len(),
            1
        );
        assert_eq!(remote.request_count(LOGIN, Command::FolderSync), 3);
    }

    #[tokio::test]
    async fn test_leased_collection_is_skipped() {
        let (db, remote, pass) = setup().await;
        pass.run(&account()).await.unwrap();
        let (book, link) = contact_book(&db).await;

        remote.remote_add(LOGIN, CONTACTS, contact_data("Hal"));
        assert!(db
            .correlations()
            .acquire_lease(link.id, "worker-b", chrono::Duration::seconds(300))
            .await
            .unwrap());

        let report = pass.run(&account()).await.unwrap();
        assert_eq!(report.collections_skipped, 1);
        assert_eq!(report.collections_synced, 2);
        assert!(db.entities().list(USER, book.id, &[]).await.unwrap().is_empty());

        let held = db.correlations().fetch(link.id).await.unwrap().unwrap();
        assert_eq!(held.lock_holder.as_deref(), Some("worker-b"));

        db.correlations().release_lease(link.id, "worker-b").await.unwrap();
        let report = pass.run(&account()).await.unwrap();
        assert_eq!(report.pulled, 1);
    }

    #[tokio::test]
    async fn test_remote_folder_delete_drops_correlation() {
        let (db, remote, pass) = setup().await;
        pass.run(&account()).await.unwrap();

        remote.delete_folder(LOGIN, TASKS);
        let report = pass.run(&account()).await.unwrap();
        assert_eq!(report.folders_dropped, 1);
        assert!(db
            .correlations()
            .list_by_type(USER, CorrelationType::TaskCollection)
            .await
            .unwrap()
            .is_empty());
        // The local task list itself is kept.
        assert_eq!(db.collections().list_by_user(USER, EntityKind::Task).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_new_remote_folder_paired_later() {
        let (db, remote, pass) = setup().await;
        pass.run(&account()).await.unwrap();

        remote.add_folder(LOGIN, "20", "Family", 14);
        let report = pass.run(&account()).await.unwrap();
        assert_eq!(report.folders_paired, 1);
        let books = db.collections().list_by_user(USER, EntityKind::Contact).await.unwrap();
        assert_eq!(books.len(), 2);
        assert_eq!(books[1].label, "Family");
    }

    #[tokio::test]
    async fn test_unreadable_remote_object_skipped() {
        let (db, remote, pass) = setup().await;
        let mut broken = TaggedNode::new(ns::AIR_SYNC);
        broken.push_text_ns(ns::CONTACTS, "FirstName", "Ivy");
        broken.push_text_ns(ns::CONTACTS, "Birthday", "not-a-date");
        remote.remote_add(LOGIN, CONTACTS, broken);
        remote.remote_add(LOGIN, CONTACTS, contact_data("Jon"));

        let report = pass.run(&account()).await.unwrap();
        assert_eq!(report.pulled, 1);
        let (book, _) = contact_book(&db).await;
        let entities = db.entities().list(USER, book.id, &[]).await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].label.as_deref(), Some("Jon"));
    }

    #[tokio::test]
    async fn test_calendar_folder_synced_independently() {
        let (db, remote, pass) = setup().await;
        pass.run(&account()).await.unwrap();

        let calendars = db.collections().list_by_user(USER, EntityKind::Event).await.unwrap();
        let link = db
            .correlations()
            .find_by_local_id(USER, CorrelationType::EventCollection, calendars[0].id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.remote_object_id, CALENDAR);
        assert_eq!(remote.item_count(LOGIN, CALENDAR), 0);
    }

    #[tokio::test]
    async fn test_authentication_failure_aborts_pass() {
        let (_, remote, pass) = setup().await;
        remote.reject(LOGIN);
        let err = pass.run(&account()).await.unwrap_err();
        assert!(matches!(err, SyncError::AuthenticationFailed(_)));
    }

    /// The collection currently leased by the pass, if any.
    async fn held_collection(db: &Database) -> Option<Correlation> {
        for kind in [EntityKind::Contact, EntityKind::Event, EntityKind::Task] {
            let links = db
                .correlations()
                .list_by_type(USER, kind.collection_correlation())
                .await
                .unwrap();
            if let Some(link) = links.into_iter().find(|l| l.lock_state != 0) {
                return Some(link);
            }
        }
        None
    }

    #[tokio::test]
    async fn test_heartbeat_renewed_during_slow_request() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(FakeRemote::new());
        remote.slow_sync(Duration::from_millis(300));
        let settings = PassSettings {
            heartbeat: Duration::from_millis(20),
            ..PassSettings::default()
        };
        let pass = SyncPass::new(db.clone(), remote.clone(), settings, "worker-a");

        // Both samples land inside the first collection's initial Sync
        let observe = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let early = held_collection(&db).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            let late = held_collection(&db).await.unwrap();
            let reclaimed = db
                .correlations()
                .acquire_lease(late.id, "worker-b", chrono::Duration::milliseconds(150))
                .await
                .unwrap();
            (early, late, reclaimed)
        };

        let account = account();
        let (report, (early, late, reclaimed)) = tokio::join!(pass.run(&account), observe);
        report.unwrap();

        assert_eq!(early.id, late.id);
        assert_eq!(late.lock_holder.as_deref(), Some("worker-a"));
        assert!(late.lock_heartbeat > early.lock_heartbeat);
        assert!(!reclaimed);
    }
}
