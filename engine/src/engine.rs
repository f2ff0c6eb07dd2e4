//! The sync state machine.
//!
//! ```text
//! idle ──sync()──> pulling ──> pushing ──> idle
//!                     │           │
//!                     └───────────┴──> error ──(delay)──> idle
//! ```
//!
//! At most one sync runs at a time. A `sync()` issued while the engine is not
//! idle is rejected immediately; it is never queued. `sync()` never returns
//! an error: every failure is folded into [`SyncResult`].

use crate::{
    audit::SyncEventRepository,
    checkpoint::CheckpointStore,
    clock::Clock,
    error::Result,
    protocol::{PullRequest, PushRequest, SyncChanges},
    reconcile,
    record::RecordStatus,
    store::{RecordStore, WriteBatch},
    transport::SyncTransport,
    CollectionName, Error, RecordId, SchemaVersion, Timestamp,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reported in [`SyncResult::error`] when a sync is already running.
pub const SYNC_IN_PROGRESS: &str = "Sync already in progress";

/// Default delay before an errored engine returns to idle.
pub const DEFAULT_ERROR_RESET_DELAY: Duration = Duration::from_millis(1000);

/// How often a pull is re-staged when local writes race its commit.
pub const PULL_APPLY_ATTEMPTS: usize = 3;

/// Where the engine is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Pulling,
    Pushing,
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Pulling => "pulling",
            SyncStatus::Pushing => "pushing",
            SyncStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Outcome of one [`SyncEngine::sync`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    /// Remote changes written locally
    pub pulled: usize,
    /// Local changes acknowledged by the remote
    pub pushed: usize,
    /// Conflicts resolved during the pull
    pub conflicts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    fn rejected(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::default()
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Sent with every pull so the remote can refuse outdated clients
    pub schema_version: SchemaVersion,
    /// How long the engine stays in `error` before returning to `idle`
    pub error_reset_delay: Duration,
}

impl SyncConfig {
    pub fn new(schema_version: SchemaVersion) -> Self {
        Self {
            schema_version,
            error_reset_delay: DEFAULT_ERROR_RESET_DELAY,
        }
    }

    pub fn with_error_reset_delay(mut self, delay: Duration) -> Self {
        self.error_reset_delay = delay;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Handle returned by [`SyncEngine::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(SyncStatus) + Send + Sync>;

/// Status plus observers, shared with the error-reset task.
struct StatusCell {
    status: Mutex<StatusState>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: Mutex<u64>,
}

struct StatusState {
    current: SyncStatus,
    /// Bumped on every entry into `error`, so a stale reset is ignored
    error_epoch: u64,
}

impl StatusCell {
    fn new() -> Self {
        Self {
            status: Mutex::new(StatusState {
                current: SyncStatus::Idle,
                error_epoch: 0,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: Mutex::new(0),
        }
    }

    fn get(&self) -> SyncStatus {
        self.status.lock().current
    }

    /// Move `Idle → Pulling` atomically. False if not idle.
    fn try_begin(&self) -> bool {
        {
            let mut state = self.status.lock();
            if state.current != SyncStatus::Idle {
                return false;
            }
            state.current = SyncStatus::Pulling;
        }
        self.notify(SyncStatus::Pulling);
        true
    }

    fn set(&self, status: SyncStatus) {
        let changed = {
            let mut state = self.status.lock();
            std::mem::replace(&mut state.current, status) != status
        };
        if changed {
            self.notify(status);
        }
    }

    /// Enter `error` and return the epoch the reset must match.
    fn fail(&self) -> u64 {
        let epoch = {
            let mut state = self.status.lock();
            state.current = SyncStatus::Error;
            state.error_epoch += 1;
            state.error_epoch
        };
        self.notify(SyncStatus::Error);
        epoch
    }

    fn reset_if_epoch(&self, epoch: u64) {
        let reset = {
            let mut state = self.status.lock();
            let stale = state.current != SyncStatus::Error || state.error_epoch != epoch;
            if !stale {
                state.current = SyncStatus::Idle;
            }
            !stale
        };
        if reset {
            tracing::debug!("sync status reset after error");
            self.notify(SyncStatus::Idle);
        }
    }

    fn subscribe(&self, listener: Listener) -> ListenerId {
        let id = {
            let mut next = self.next_listener.lock();
            *next += 1;
            ListenerId(*next)
        };
        self.listeners.lock().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn notify(&self, status: SyncStatus) {
        // Listeners run outside the lock so they may subscribe or unsubscribe.
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(status);
        }
    }
}

/// Enter `error` now and schedule the return to `idle`.
fn enter_error(cell: &Arc<StatusCell>, delay: Duration) {
    let epoch = cell.fail();
    let cell = Arc::clone(cell);

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                cell.reset_if_epoch(epoch);
            });
        }
        Err(_) => cell.reset_if_epoch(epoch),
    }
}

/// Held while a sync runs. Dropped without [`SyncGuard::disarm`] (the
/// `sync()` future was cancelled) it sends the engine through `error`.
struct SyncGuard {
    cell: Arc<StatusCell>,
    error_reset_delay: Duration,
    armed: bool,
}

impl SyncGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("sync cancelled before completion");
            enter_error(&self.cell, self.error_reset_delay);
        }
    }
}

/// A record sent in a push, remembered so it can be marked afterwards.
struct PushedRecord {
    collection: CollectionName,
    id: RecordId,
    status: RecordStatus,
    updated_at: Timestamp,
}

/// Two-phase pull/push synchronizer.
pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    transport: RwLock<Arc<dyn SyncTransport>>,
    checkpoints: Arc<dyn CheckpointStore>,
    audit: Arc<SyncEventRepository>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    status: Arc<StatusCell>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("status", &self.status())
            .field("config", &self.config)
            .finish()
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transport: Arc<dyn SyncTransport>,
        checkpoints: Arc<dyn CheckpointStore>,
        audit: Arc<SyncEventRepository>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            transport: RwLock::new(transport),
            checkpoints,
            audit,
            clock,
            config,
            status: Arc::new(StatusCell::new()),
        }
    }

    /// Swap the transport. A sync already running keeps the old one.
    pub fn set_transport(&self, transport: Arc<dyn SyncTransport>) {
        *self.transport.write() = transport;
    }

    pub fn status(&self) -> SyncStatus {
        self.status.get()
    }

    /// Register a listener called synchronously on every status change.
    pub fn subscribe(&self, listener: impl Fn(SyncStatus) + Send + Sync + 'static) -> ListenerId {
        self.status.subscribe(Arc::new(listener))
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.status.unsubscribe(id)
    }

    pub fn audit(&self) -> &SyncEventRepository {
        &self.audit
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The checkpoint, or `None` if never synced or unreadable.
    pub fn last_pulled_at(&self) -> Option<Timestamp> {
        self.checkpoints.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to read checkpoint, treating as never synced");
            None
        })
    }

    /// Forget the checkpoint so the next sync pulls everything.
    pub fn clear_last_pulled_at(&self) -> Result<()> {
        self.checkpoints.clear()?;
        tracing::info!("checkpoint cleared");
        Ok(())
    }

    /// Run one pull/push cycle.
    pub async fn sync(&self) -> SyncResult {
        if !self.status.try_begin() {
            tracing::warn!(status = %self.status(), "{SYNC_IN_PROGRESS}");
            return SyncResult::rejected(SYNC_IN_PROGRESS);
        }

        let guard = SyncGuard {
            cell: Arc::clone(&self.status),
            error_reset_delay: self.config.error_reset_delay,
            armed: true,
        };

        let start = Instant::now();
        let mut result = SyncResult::default();
        let outcome = self.run(&mut result).await;
        guard.disarm();
        match outcome {
            Ok(()) => {
                result.success = true;
                self.status.set(SyncStatus::Idle);
                tracing::info!(
                    pulled = result.pulled,
                    pushed = result.pushed,
                    conflicts = result.conflicts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "sync completed"
                );
            }
            Err(e) => {
                result.pushed = 0;
                result.error = Some(e.to_string());
                tracing::error!(
                    error = %e,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "sync failed"
                );
                enter_error(&self.status, self.config.error_reset_delay);
            }
        }
        result
    }

    async fn run(&self, result: &mut SyncResult) -> Result<()> {
        let transport = self.transport.read().clone();
        let checkpoint = self.pull(transport.as_ref(), result).await?;
        self.status.set(SyncStatus::Pushing);
        self.push(transport.as_ref(), checkpoint, result).await
    }

    /// Pull and apply remote changes. Returns the new checkpoint.
    async fn pull(&self, transport: &dyn SyncTransport, result: &mut SyncResult) -> Result<Timestamp> {
        let last_pulled_at = self.last_pulled_at();
        tracing::info!(last_pulled_at = ?last_pulled_at, "pulling changes");

        let response = transport
            .pull_changes(PullRequest {
                last_pulled_at,
                schema_version: self.config.schema_version,
            })
            .await?;
        tracing::debug!(changes = %response.changes.summary(), "pull response");

        let (applied, conflicts) = self.apply_pulled(&response.changes)?;
        result.pulled = applied;
        result.conflicts = conflicts;

        if let Err(e) = self.checkpoints.save(response.timestamp) {
            tracing::error!(error = %e, timestamp = response.timestamp, "failed to save checkpoint");
        }
        Ok(response.timestamp)
    }

    /// Stage the pulled changes and commit them together with their audit
    /// entries. A local write that races the commit makes the whole pull
    /// re-stage from fresh reads.
    fn apply_pulled(&self, changes: &SyncChanges) -> Result<(usize, usize)> {
        let mut attempt = 1;
        loop {
            let reconcile::ReconcileResult {
                batch,
                applied,
                skipped,
                conflicts,
            } = reconcile::reconcile(self.store.as_ref(), changes, self.clock.now_ms());
            let mut log_conflicts = || -> Result<()> {
                self.audit
                    .record_all(conflicts.iter().map(|c| (&c.conflict, &c.resolution)))
                    .map(|_| ())
            };

            match self.store.commit_with(batch, &mut log_conflicts) {
                Ok(()) => {
                    tracing::info!(
                        applied,
                        skipped,
                        conflicts = conflicts.len(),
                        "pull applied"
                    );
                    return Ok((applied, conflicts.len()));
                }
                Err(Error::StaleRecord {
                    collection,
                    record_id,
                }) if attempt < PULL_APPLY_ATTEMPTS => {
                    tracing::warn!(
                        collection = %collection,
                        record_id = %record_id,
                        attempt,
                        "local write raced the pull, re-staging"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn push(
        &self,
        transport: &dyn SyncTransport,
        last_pulled_at: Timestamp,
        result: &mut SyncResult,
    ) -> Result<()> {
        let (changes, pushed) = self.collect_local_changes()?;
        if changes.is_empty() {
            tracing::debug!("nothing to push");
            return Ok(());
        }
        tracing::info!(changes = %changes.summary(), "pushing changes");

        let response = transport
            .push_changes(PushRequest {
                changes,
                last_pulled_at,
            })
            .await?;
        if !response.ok {
            return Err(Error::PushRejected(response.error_message()));
        }

        let mut batch = WriteBatch::new();
        for record in &pushed {
            if record.status == RecordStatus::Deleted {
                batch.purge_tombstone(&record.collection, &record.id);
            } else {
                batch.mark_synced(&record.collection, &record.id, Some(record.updated_at));
            }
        }
        self.store.commit(batch)?;

        result.pushed = pushed.len();
        Ok(())
    }

    fn collect_local_changes(&self) -> Result<(SyncChanges, Vec<PushedRecord>)> {
        let mut changes = SyncChanges::new();
        let mut pushed = Vec::new();

        for collection in self.store.schema().collection_names() {
            let dirty = self.store.dirty_records(collection)?;
            if dirty.is_empty() {
                continue;
            }
            let table = changes.table_mut(collection.clone());
            for local in dirty {
                pushed.push(PushedRecord {
                    collection: collection.clone(),
                    id: local.id().clone(),
                    status: local.status,
                    updated_at: local.updated_at(),
                });
                match local.status {
                    RecordStatus::Created => table.created.push(local.record),
                    RecordStatus::Updated => table.updated.push(local.record),
                    RecordStatus::Deleted => table.deleted.push(local.record.id),
                    RecordStatus::Synced => {}
                }
            }
        }
        Ok((changes, pushed))
    }
}
