//! Conflict-aware application of pulled changes.
//!
//! [`Reconciler`] turns a pull response into one [`WriteBatch`] that the
//! engine commits atomically. Nothing is written here: every decision is
//! staged, and conflicts are returned so the caller can audit them as part
//! of the commit. Each record read is pinned in the batch, so a local write
//! that lands before the commit makes it fail with
//! [`Error::StaleRecord`](crate::Error::StaleRecord) instead of being
//! overwritten.
//!
//! # Algorithm
//!
//! Per collection, `created` then `updated` then `deleted`:
//!
//! | remote says | local missing | local clean          | local dirty       |
//! |-------------|---------------|----------------------|-------------------|
//! | created     | insert synced | conflict (or no-op)  | conflict          |
//! | updated     | no-op         | apply payload        | conflict          |
//! | deleted     | no-op         | destroy              | conflict          |
//!
//! A conflict is resolved by [`resolver::resolve`]. When the remote wins the
//! remote side is applied; when the local side wins nothing is staged and the
//! record stays dirty for the next push.

use crate::{
    error::Result,
    protocol::{SyncChanges, TableChanges},
    record::{LocalRecord, RecordChange, RecordStatus},
    resolver::{self, ConflictInfo, ConflictResolution, Winner},
    schema::CollectionSchema,
    store::{RecordStore, WriteBatch},
    Error, Timestamp,
};

/// A conflict together with how it was resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConflict {
    pub conflict: ConflictInfo,
    pub resolution: ConflictResolution,
}

/// Everything a pull would do to the local store.
#[derive(Debug, Default)]
pub struct ReconcileResult {
    /// Mutations to commit in one transaction
    pub batch: WriteBatch,
    /// Remote changes that will be written
    pub applied: usize,
    /// Remote changes skipped because they failed to apply
    pub skipped: usize,
    /// Every conflict met, in application order
    pub conflicts: Vec<ResolvedConflict>,
}

enum Kind {
    Created,
    Updated,
    Deleted,
}

impl Kind {
    fn as_str(&self) -> &'static str {
        match self {
            Kind::Created => "created",
            Kind::Updated => "updated",
            Kind::Deleted => "deleted",
        }
    }
}

/// Stages remote changes against a [`RecordStore`].
pub struct Reconciler<'a> {
    store: &'a dyn RecordStore,
    /// Deletion time assumed when the remote reports none
    now: Timestamp,
    result: ReconcileResult,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn RecordStore, now: Timestamp) -> Self {
        Self {
            store,
            now,
            result: ReconcileResult::default(),
        }
    }

    /// Stage every change in `changes`. Per-record failures are logged and
    /// skipped; they never abort the pull.
    pub fn reconcile(mut self, changes: &SyncChanges) -> ReconcileResult {
        let store = self.store;
        for (collection, table) in changes.iter() {
            match store.schema().get_collection(collection) {
                Some(schema) => self.reconcile_table(schema, table),
                None => {
                    tracing::warn!(
                        collection = %collection,
                        changes = table.len(),
                        "skipping changes for unknown collection"
                    );
                }
            }
        }
        self.result
    }

    fn reconcile_table(&mut self, schema: &CollectionSchema, table: &TableChanges) {
        for remote in &table.created {
            self.guarded(schema, &remote.id, Kind::Created, |this| {
                this.apply_created(schema, remote)
            });
        }
        for remote in &table.updated {
            self.guarded(schema, &remote.id, Kind::Updated, |this| {
                this.apply_updated(schema, remote)
            });
        }
        for id in &table.deleted {
            let deleted_at = table.deleted_at.get(id).copied().unwrap_or(self.now);
            self.guarded(schema, id, Kind::Deleted, |this| {
                this.apply_deleted(schema, id, deleted_at)
            });
        }
    }

    fn guarded(
        &mut self,
        schema: &CollectionSchema,
        id: &str,
        kind: Kind,
        apply: impl FnOnce(&mut Self) -> Result<bool>,
    ) {
        match apply(self) {
            Ok(true) => self.result.applied += 1,
            Ok(false) => {}
            Err(e) => {
                self.result.skipped += 1;
                tracing::error!(
                    collection = %schema.name,
                    record_id = %id,
                    kind = kind.as_str(),
                    error = %e,
                    "failed to apply remote change"
                );
            }
        }
    }

    /// Current local state, including mutations already staged by this pull.
    /// The stored state is pinned as an expectation of the batch.
    fn lookup(&mut self, collection: &str, id: &str) -> Result<Option<LocalRecord>> {
        let base = self.store.find(collection, id)?;
        self.result.batch.expect(collection, id, base.as_ref());
        Ok(self.result.batch.staged_state(collection, id, base))
    }

    fn apply_created(&mut self, schema: &CollectionSchema, remote: &RecordChange) -> Result<bool> {
        if remote.id.is_empty() {
            return Err(Error::InvalidPayload("record id is empty".into()));
        }
        let Some(local) = self.lookup(&schema.name, &remote.id)? else {
            schema.validate_fields(&remote.fields)?;
            self.result.batch.insert_synced(&schema.name, remote.clone());
            return Ok(true);
        };

        if local.status == RecordStatus::Synced && local.record.contains_payload(remote) {
            tracing::debug!(collection = %schema.name, record_id = %remote.id, "create already applied");
            return Ok(false);
        }

        let conflict = ConflictInfo::new(&schema.name, local.record.clone(), remote.clone());
        match self.resolve(conflict) {
            Winner::Remote => self.overwrite(schema, local, remote),
            Winner::Local => Ok(false),
        }
    }

    fn apply_updated(&mut self, schema: &CollectionSchema, remote: &RecordChange) -> Result<bool> {
        let Some(local) = self.lookup(&schema.name, &remote.id)? else {
            tracing::debug!(collection = %schema.name, record_id = %remote.id, "update for unknown record ignored");
            return Ok(false);
        };

        if !local.is_dirty() {
            let mut merged = local.record.clone();
            merged.apply_payload(remote);
            schema.validate_fields(&merged.fields)?;
            self.result
                .batch
                .apply_remote_payload(&schema.name, remote.clone());
            return Ok(true);
        }

        let conflict = ConflictInfo::new(&schema.name, local.record.clone(), remote.clone());
        match self.resolve(conflict) {
            Winner::Remote => self.overwrite(schema, local, remote),
            Winner::Local => Ok(false),
        }
    }

    fn apply_deleted(
        &mut self,
        schema: &CollectionSchema,
        id: &str,
        deleted_at: Timestamp,
    ) -> Result<bool> {
        let Some(local) = self.lookup(&schema.name, id)? else {
            return Ok(false);
        };

        if local.is_dirty() {
            let conflict = ConflictInfo::with_remote_timestamp(
                &schema.name,
                local.record,
                RecordChange::new(id),
                deleted_at,
            );
            if self.resolve(conflict) == Winner::Local {
                return Ok(false);
            }
        }

        self.result.batch.destroy_permanently(&schema.name, id);
        Ok(true)
    }

    fn overwrite(
        &mut self,
        schema: &CollectionSchema,
        local: LocalRecord,
        remote: &RecordChange,
    ) -> Result<bool> {
        let mut merged = local.record;
        merged.apply_payload(remote);
        schema.validate_fields(&merged.fields)?;
        self.result
            .batch
            .overwrite_from_remote(&schema.name, remote.clone());
        Ok(true)
    }

    fn resolve(&mut self, conflict: ConflictInfo) -> Winner {
        let resolution = resolver::resolve(&conflict);
        tracing::info!(
            collection = %conflict.collection,
            record_id = %conflict.record_id,
            local_updated_at = conflict.local_updated_at,
            remote_updated_at = conflict.remote_updated_at,
            winner = %resolution.winner,
            "resolved conflict"
        );
        let winner = resolution.winner;
        self.result.conflicts.push(ResolvedConflict {
            conflict,
            resolution,
        });
        winner
    }
}

/// Stage `changes` against `store`, see [`Reconciler`].
pub fn reconcile(store: &dyn RecordStore, changes: &SyncChanges, now: Timestamp) -> ReconcileResult {
    Reconciler::new(store, now).reconcile(changes)
}
