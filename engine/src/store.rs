//! Local record store.
//!
//! [`RecordStore`] is the contract the sync engine needs from local
//! persistence: lookups, the dirty set, and atomic batched writes. All status
//! changes the engine makes go through [`WriteBatch`]; it never pokes status
//! fields directly.
//!
//! [`MemoryStore`] is the reference implementation. It also carries the
//! application-facing CRUD layer that stamps timestamps and moves records
//! through `synced → updated → synced` / `→ deleted`.

use crate::{
    clock::Clock,
    error::Result,
    record::{LocalRecord, RecordChange, RecordStatus, CREATED_AT},
    snapshot::{SnapshotMetadata, StoreSnapshot},
    CollectionName, Error, RecordId, Schema, Timestamp,
};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Local persistence as seen by the sync engine.
pub trait RecordStore: Send + Sync {
    /// Schema naming the synchronized collections.
    fn schema(&self) -> &Schema;

    /// Look up a record, including tombstones.
    fn find(&self, collection: &str, id: &str) -> Result<Option<LocalRecord>>;

    /// All records in `collection` whose status is not `synced`.
    fn dirty_records(&self, collection: &str) -> Result<Vec<LocalRecord>>;

    /// Apply every staged mutation, or none of them.
    fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.commit_with(batch, &mut || -> Result<()> { Ok(()) })
    }

    /// Check the batch's expectations, run `before_apply`, then apply the
    /// mutations, all without letting another write in between.
    ///
    /// A record that no longer matches what the batch was staged from fails
    /// with [`Error::StaleRecord`]. If that check or `before_apply` fails,
    /// nothing is written.
    fn commit_with(
        &self,
        batch: WriteBatch,
        before_apply: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()>;
}

/// The state of a record a batch was staged from.
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub collection: CollectionName,
    pub id: RecordId,
    /// `None` when the record was absent
    pub seen: Option<LocalRecord>,
}

impl Expectation {
    pub fn holds(&self, current: Option<&LocalRecord>) -> bool {
        self.seen.as_ref() == current
    }
}

/// One staged change to the local store.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert or replace a record wholesale.
    Put {
        collection: CollectionName,
        record: RecordChange,
        status: RecordStatus,
    },
    /// Copy a remote payload over an existing record.
    ApplyPayload {
        collection: CollectionName,
        payload: RecordChange,
        /// New status, or `None` to keep the current one
        status: Option<RecordStatus>,
    },
    /// Clear the dirty marker.
    MarkSynced {
        collection: CollectionName,
        id: RecordId,
        /// Only mark if `updated_at` still equals this value
        expected_updated_at: Option<Timestamp>,
    },
    /// Remove a record physically.
    Destroy {
        collection: CollectionName,
        id: RecordId,
        /// Only remove if the record is still a tombstone
        only_tombstone: bool,
    },
}

impl Mutation {
    pub fn collection(&self) -> &CollectionName {
        match self {
            Mutation::Put { collection, .. }
            | Mutation::ApplyPayload { collection, .. }
            | Mutation::MarkSynced { collection, .. }
            | Mutation::Destroy { collection, .. } => collection,
        }
    }

    pub fn record_id(&self) -> &RecordId {
        match self {
            Mutation::Put { record, .. } => &record.id,
            Mutation::ApplyPayload { payload, .. } => &payload.id,
            Mutation::MarkSynced { id, .. } | Mutation::Destroy { id, .. } => id,
        }
    }

    /// The record's state after this mutation, given its state before.
    ///
    /// Mutations on missing records, and guarded mutations whose guard does
    /// not hold, leave the state unchanged.
    pub fn apply_to(&self, current: Option<LocalRecord>) -> Option<LocalRecord> {
        match self {
            Mutation::Put {
                collection,
                record,
                status,
            } => Some(LocalRecord::new(collection.clone(), record.clone(), *status)),
            Mutation::ApplyPayload {
                payload, status, ..
            } => current.map(|mut local| {
                local.record.apply_payload(payload);
                if let Some(status) = status {
                    local.status = *status;
                }
                local
            }),
            Mutation::MarkSynced {
                expected_updated_at,
                ..
            } => current.map(|mut local| {
                let unchanged = expected_updated_at.map_or(true, |ts| local.updated_at() == ts);
                if unchanged && local.status != RecordStatus::Deleted {
                    local.status = RecordStatus::Synced;
                }
                local
            }),
            Mutation::Destroy { only_tombstone, .. } => match current {
                Some(local) if *only_tombstone && local.status != RecordStatus::Deleted => {
                    Some(local)
                }
                _ => None,
            },
        }
    }
}

/// Mutations staged for one atomic commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    mutations: Vec<Mutation>,
    expectations: Vec<Expectation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn expectations(&self) -> &[Expectation] {
        &self.expectations
    }

    /// Require `id` to still be in the state `seen` at commit time. Only the
    /// first expectation per record is kept.
    pub fn expect(
        &mut self,
        collection: impl Into<CollectionName>,
        id: impl Into<RecordId>,
        seen: Option<&LocalRecord>,
    ) {
        let (collection, id) = (collection.into(), id.into());
        if self
            .expectations
            .iter()
            .any(|e| e.collection == collection && e.id == id)
        {
            return;
        }
        self.expectations.push(Expectation {
            collection,
            id,
            seen: seen.cloned(),
        });
    }

    /// Insert a record received from the remote, already in sync.
    pub fn insert_synced(&mut self, collection: impl Into<CollectionName>, record: RecordChange) {
        self.push(Mutation::Put {
            collection: collection.into(),
            record,
            status: RecordStatus::Synced,
        });
    }

    /// Take the remote version of a record and mark it synced.
    pub fn overwrite_from_remote(
        &mut self,
        collection: impl Into<CollectionName>,
        remote: RecordChange,
    ) {
        self.push(Mutation::ApplyPayload {
            collection: collection.into(),
            payload: remote,
            status: Some(RecordStatus::Synced),
        });
    }

    /// Take the remote content of a record without touching its status.
    pub fn apply_remote_payload(
        &mut self,
        collection: impl Into<CollectionName>,
        remote: RecordChange,
    ) {
        self.push(Mutation::ApplyPayload {
            collection: collection.into(),
            payload: remote,
            status: None,
        });
    }

    /// Mark a pushed record synced, unless it changed after `pushed_updated_at`.
    pub fn mark_synced(
        &mut self,
        collection: impl Into<CollectionName>,
        id: impl Into<RecordId>,
        pushed_updated_at: Option<Timestamp>,
    ) {
        self.push(Mutation::MarkSynced {
            collection: collection.into(),
            id: id.into(),
            expected_updated_at: pushed_updated_at,
        });
    }

    /// Remove a record regardless of its status.
    pub fn destroy_permanently(
        &mut self,
        collection: impl Into<CollectionName>,
        id: impl Into<RecordId>,
    ) {
        self.push(Mutation::Destroy {
            collection: collection.into(),
            id: id.into(),
            only_tombstone: false,
        });
    }

    /// Remove a tombstone whose deletion the remote acknowledged.
    pub fn purge_tombstone(&mut self, collection: impl Into<CollectionName>, id: impl Into<RecordId>) {
        self.push(Mutation::Destroy {
            collection: collection.into(),
            id: id.into(),
            only_tombstone: true,
        });
    }

    /// State of a record as this batch would leave it, starting from `base`.
    pub fn staged_state(
        &self,
        collection: &str,
        id: &str,
        base: Option<LocalRecord>,
    ) -> Option<LocalRecord> {
        self.mutations
            .iter()
            .filter(|m| m.collection() == collection && m.record_id() == id)
            .fold(base, |state, m| m.apply_to(state))
    }

    /// True if any staged mutation targets this record.
    pub fn touches(&self, collection: &str, id: &str) -> bool {
        self.mutations
            .iter()
            .any(|m| m.collection() == collection && m.record_id() == id)
    }
}

type Collections = BTreeMap<CollectionName, BTreeMap<RecordId, LocalRecord>>;

/// In-memory [`RecordStore`] with an application CRUD layer.
pub struct MemoryStore {
    schema: Schema,
    clock: Arc<dyn Clock>,
    collections: RwLock<Collections>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("schema_version", &self.schema.version)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store with one collection per schema entry.
    pub fn new(schema: Schema, clock: Arc<dyn Clock>) -> Self {
        let collections = schema
            .collection_names()
            .map(|name| (name.clone(), BTreeMap::new()))
            .collect();
        Self {
            schema,
            clock,
            collections: RwLock::new(collections),
        }
    }

    /// Create a record with a fresh id. Status becomes `created`.
    pub fn create(&self, collection: &str, fields: Map<String, Value>) -> Result<RecordChange> {
        self.create_with_id(collection, uuid::Uuid::new_v4().to_string(), fields)
    }

    /// Create a record with a caller-chosen id.
    pub fn create_with_id(
        &self,
        collection: &str,
        id: impl Into<RecordId>,
        fields: Map<String, Value>,
    ) -> Result<RecordChange> {
        let collection_schema = self.schema.collection(collection)?;
        let now = self.clock.now_ms();
        let mut record = RecordChange::with_fields(id, fields);
        record.set(CREATED_AT, Value::from(now));
        record.set_updated_at(now);
        collection_schema.validate_fields(&record.fields)?;

        let mut collections = self.collections.write();
        let table = collections
            .get_mut(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        if table.contains_key(&record.id) {
            return Err(Error::RecordAlreadyExists(record.id));
        }
        table.insert(
            record.id.clone(),
            LocalRecord::new(collection, record.clone(), RecordStatus::Created),
        );
        Ok(record)
    }

    /// Change fields of a live record and mark it dirty.
    pub fn update(
        &self,
        collection: &str,
        id: &str,
        changes: Map<String, Value>,
    ) -> Result<RecordChange> {
        let collection_schema = self.schema.collection(collection)?;
        let mut collections = self.collections.write();
        let local = Self::live_mut(&mut collections, collection, id)?;

        let mut record = local.record.clone();
        for (key, value) in changes {
            record.set(key, value);
        }
        record.set_updated_at(self.next_timestamp(&local.record));
        collection_schema.validate_fields(&record.fields)?;

        local.record = record.clone();
        local.status = local.status.after_local_mutation();
        Ok(record)
    }

    /// Tombstone a live record. It is purged once the remote acknowledges.
    pub fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.schema.collection(collection)?;
        let mut collections = self.collections.write();
        let local = Self::live_mut(&mut collections, collection, id)?;
        let ts = self.next_timestamp(&local.record);
        local.record.set_updated_at(ts);
        local.status = RecordStatus::Deleted;
        Ok(())
    }

    /// Get a live (not tombstoned) record.
    pub fn get(&self, collection: &str, id: &str) -> Option<RecordChange> {
        self.collections
            .read()
            .get(collection)?
            .get(id)
            .filter(|local| local.status != RecordStatus::Deleted)
            .map(|local| local.record.clone())
    }

    /// All live records of a collection, ordered by id.
    pub fn all(&self, collection: &str) -> Vec<RecordChange> {
        self.collections
            .read()
            .get(collection)
            .map(|table| {
                table
                    .values()
                    .filter(|local| local.status != RecordStatus::Deleted)
                    .map(|local| local.record.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Change-tracking status of a record, including tombstones.
    pub fn status_of(&self, collection: &str, id: &str) -> Option<RecordStatus> {
        self.collections
            .read()
            .get(collection)?
            .get(id)
            .map(|local| local.status)
    }

    /// Number of records waiting to be pushed.
    pub fn pending_count(&self) -> usize {
        self.collections
            .read()
            .values()
            .flat_map(BTreeMap::values)
            .filter(|local| local.is_dirty())
            .count()
    }

    /// Export every record, tombstones included.
    pub fn export_state(&self) -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::new(self.schema.version);
        for table in self.collections.read().values() {
            for local in table.values() {
                snapshot.add_record(local.clone());
            }
        }
        snapshot
    }

    /// Replace the store contents with a snapshot.
    pub fn import_state(&self, snapshot: StoreSnapshot) -> Result<()> {
        snapshot.validate(&self.schema)?;
        let mut collections = self.collections.write();
        for table in collections.values_mut() {
            table.clear();
        }
        for (name, records) in snapshot.collections {
            collections.entry(name).or_default().extend(records);
        }
        Ok(())
    }

    pub fn snapshot_metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata::from(&self.export_state())
    }

    fn live_mut<'a>(
        collections: &'a mut Collections,
        collection: &str,
        id: &str,
    ) -> Result<&'a mut LocalRecord> {
        let local = collections
            .get_mut(collection)
            .and_then(|table| table.get_mut(id))
            .ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
        if local.status == RecordStatus::Deleted {
            return Err(Error::OperationOnDeleted(id.to_string()));
        }
        Ok(local)
    }

    // `updated_at` never moves backwards, even if a remote payload carried a
    // timestamp ahead of the local clock.
    fn next_timestamp(&self, record: &RecordChange) -> Timestamp {
        self.clock.now_ms().max(record.updated_at())
    }
}

impl RecordStore for MemoryStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn find(&self, collection: &str, id: &str) -> Result<Option<LocalRecord>> {
        let collections = self.collections.read();
        let table = collections
            .get(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        Ok(table.get(id).cloned())
    }

    fn dirty_records(&self, collection: &str) -> Result<Vec<LocalRecord>> {
        let collections = self.collections.read();
        let table = collections
            .get(collection)
            .ok_or_else(|| Error::CollectionNotFound(collection.to_string()))?;
        Ok(table.values().filter(|l| l.is_dirty()).cloned().collect())
    }

    fn commit_with(
        &self,
        batch: WriteBatch,
        before_apply: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        let mut collections = self.collections.write();

        // Reject the whole batch before touching anything.
        if let Some(missing) = batch
            .mutations()
            .iter()
            .map(Mutation::collection)
            .find(|name| !collections.contains_key(*name))
        {
            return Err(Error::CollectionNotFound(missing.clone()));
        }

        if let Some(stale) = batch.expectations().iter().find(|e| {
            let current = collections.get(&e.collection).and_then(|t| t.get(&e.id));
            !e.holds(current)
        }) {
            return Err(Error::StaleRecord {
                collection: stale.collection.clone(),
                record_id: stale.id.clone(),
            });
        }

        before_apply()?;

        for mutation in batch.mutations {
            let Some(table) = collections.get_mut(mutation.collection()) else {
                continue;
            };
            let id = mutation.record_id().clone();
            match mutation.apply_to(table.remove(&id)) {
                Some(local) => {
                    table.insert(id, local);
                }
                None => {
                    tracing::debug!(collection = %mutation.collection(), record_id = %id, "record removed");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::record::UPDATED_AT;
    use crate::schema::{CollectionSchema, FieldDef, FieldType};
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn test_store() -> (MemoryStore, Arc<ManualClock>) {
        let schema = Schema::new(1).with_collection(CollectionSchema::new(
            "todos",
            vec![
                FieldDef::required("title", FieldType::String),
                FieldDef::optional("is_completed", FieldType::Bool),
            ],
        ));
        let clock = Arc::new(ManualClock::new(1000));
        (MemoryStore::new(schema, clock.clone()), clock)
    }

    #[test]
    fn create_stamps_and_marks_created() {
        let (store, _) = test_store();
        let record = store.create("todos", fields(json!({"title": "Milk"}))).unwrap();

        assert_eq!(record.updated_at(), 1000);
        assert_eq!(record.get(CREATED_AT), Some(&json!(1000)));
        assert_eq!(store.status_of("todos", &record.id), Some(RecordStatus::Created));
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn create_validates_against_schema() {
        let (store, _) = test_store();
        let result = store.create("todos", fields(json!({"is_completed": true})));
        assert!(matches!(result, Err(Error::MissingRequiredField(f)) if f == "title"));

        let result = store.create("notes", Map::new());
        assert!(matches!(result, Err(Error::CollectionNotFound(_))));
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn create_duplicate_id() {
        let (store, _) = test_store();
        store
            .create_with_id("todos", "1", fields(json!({"title": "a"})))
            .unwrap();
        let result = store.create_with_id("todos", "1", fields(json!({"title": "b"})));
        assert!(matches!(result, Err(Error::RecordAlreadyExists(id)) if id == "1"));
    }

    #[test]
    fn update_marks_synced_record_dirty() {
        let (store, clock) = test_store();
        let mut batch = WriteBatch::new();
        batch.insert_synced(
            "todos",
            RecordChange::new("1").field("title", "a").field(UPDATED_AT, 500),
        );
        store.commit(batch).unwrap();
        assert_eq!(store.status_of("todos", "1"), Some(RecordStatus::Synced));

        clock.set(2000);
        let record = store
            .update("todos", "1", fields(json!({"title": "b"})))
            .unwrap();
        assert_eq!(record.updated_at(), 2000);
        assert_eq!(store.status_of("todos", "1"), Some(RecordStatus::Updated));
    }

    #[test]
    fn update_keeps_created_status() {
        let (store, clock) = test_store();
        store
            .create_with_id("todos", "1", fields(json!({"title": "a"})))
            .unwrap();
        clock.advance(10);
        store
            .update("todos", "1", fields(json!({"is_completed": true})))
            .unwrap();
        assert_eq!(store.status_of("todos", "1"), Some(RecordStatus::Created));
    }

    #[test]
    fn updated_at_never_moves_backwards() {
        let (store, _) = test_store();
        let mut batch = WriteBatch::new();
        batch.insert_synced(
            "todos",
            RecordChange::new("1").field("title", "a").field(UPDATED_AT, 9000),
        );
        store.commit(batch).unwrap();

        let record = store
            .update("todos", "1", fields(json!({"title": "b"})))
            .unwrap();
        assert_eq!(record.updated_at(), 9000);
    }

    #[test]
    fn delete_tombstones() {
        let (store, clock) = test_store();
        store
            .create_with_id("todos", "1", fields(json!({"title": "a"})))
            .unwrap();
        clock.advance(5);
        store.delete("todos", "1").unwrap();

        assert_eq!(store.status_of("todos", "1"), Some(RecordStatus::Deleted));
        assert!(store.get("todos", "1").is_none());
        assert!(store.all("todos").is_empty());
        assert_eq!(store.find("todos", "1").unwrap().unwrap().updated_at(), 1005);

        assert!(matches!(
            store.update("todos", "1", Map::new()),
            Err(Error::OperationOnDeleted(_))
        ));
        assert!(matches!(
            store.delete("todos", "1"),
            Err(Error::OperationOnDeleted(_))
        ));
    }

    #[test]
    fn dirty_records_excludes_synced() {
        let (store, _) = test_store();
        store
            .create_with_id("todos", "dirty", fields(json!({"title": "a"})))
            .unwrap();
        let mut batch = WriteBatch::new();
        batch.insert_synced("todos", RecordChange::new("clean").field("title", "b"));
        store.commit(batch).unwrap();

        let dirty = store.dirty_records("todos").unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].id(), "dirty");
    }

    #[test]
    fn commit_rejects_unknown_collection_atomically() {
        let (store, _) = test_store();
        let mut batch = WriteBatch::new();
        batch.insert_synced("todos", RecordChange::new("1").field("title", "a"));
        batch.insert_synced("notes", RecordChange::new("2"));

        assert!(matches!(
            store.commit(batch),
            Err(Error::CollectionNotFound(c)) if c == "notes"
        ));
        assert!(store.find("todos", "1").unwrap().is_none());
    }

    #[test]
    fn mark_synced_guard() {
        let (store, clock) = test_store();
        store
            .create_with_id("todos", "1", fields(json!({"title": "a"})))
            .unwrap();

        // Edited after the push captured updated_at = 1000.
        clock.set(3000);
        store
            .update("todos", "1", fields(json!({"title": "b"})))
            .unwrap();

        let mut batch = WriteBatch::new();
        batch.mark_synced("todos", "1", Some(1000));
        store.commit(batch).unwrap();
        assert_eq!(store.status_of("todos", "1"), Some(RecordStatus::Created));

        let mut batch = WriteBatch::new();
        batch.mark_synced("todos", "1", Some(3000));
        store.commit(batch).unwrap();
        assert_eq!(store.status_of("todos", "1"), Some(RecordStatus::Synced));
    }

    #[test]
    fn mark_synced_is_idempotent_and_tolerates_missing() {
        let (store, _) = test_store();
        let mut batch = WriteBatch::new();
        batch.insert_synced("todos", RecordChange::new("1").field("title", "a"));
        batch.mark_synced("todos", "1", None);
        batch.mark_synced("todos", "1", None);
        batch.mark_synced("todos", "ghost", None);
        store.commit(batch).unwrap();

        assert_eq!(store.status_of("todos", "1"), Some(RecordStatus::Synced));
        assert!(store.find("todos", "ghost").unwrap().is_none());
    }

    #[test]
    fn purge_tombstone_spares_revived_records() {
        let (store, _) = test_store();
        let mut batch = WriteBatch::new();
        batch.insert_synced("todos", RecordChange::new("1").field("title", "a"));
        store.commit(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.purge_tombstone("todos", "1");
        store.commit(batch).unwrap();
        assert!(store.get("todos", "1").is_some());

        store.delete("todos", "1").unwrap();
        let mut batch = WriteBatch::new();
        batch.purge_tombstone("todos", "1");
        store.commit(batch).unwrap();
        assert!(store.find("todos", "1").unwrap().is_none());
    }

    #[test]
    fn staged_state_replays_mutations() {
        let mut batch = WriteBatch::new();
        batch.insert_synced("todos", RecordChange::new("1").field("title", "a"));
        batch.apply_remote_payload("todos", RecordChange::new("1").field("title", "b"));

        let state = batch.staged_state("todos", "1", None).unwrap();
        assert_eq!(state.record.get("title"), Some(&json!("b")));
        assert_eq!(state.status, RecordStatus::Synced);
        assert!(batch.touches("todos", "1"));
        assert!(!batch.touches("todos", "2"));

        batch.destroy_permanently("todos", "1");
        assert!(batch.staged_state("todos", "1", None).is_none());
    }

    #[test]
    fn export_import_roundtrip() {
        let (store, _) = test_store();
        store
            .create_with_id("todos", "1", fields(json!({"title": "a"})))
            .unwrap();
        store
            .create_with_id("todos", "2", fields(json!({"title": "b"})))
            .unwrap();
        store.delete("todos", "2").unwrap();

        let snapshot = store.export_state();
        assert_eq!(snapshot.record_count(), 2);

        let (restored, _) = test_store();
        restored.import_state(snapshot).unwrap();
        assert_eq!(restored.all("todos").len(), 1);
        assert_eq!(restored.status_of("todos", "2"), Some(RecordStatus::Deleted));
        assert_eq!(restored.pending_count(), 2);

        let metadata = restored.snapshot_metadata();
        assert_eq!(metadata.record_count, 2);
        assert_eq!(metadata.pending_count, 2);
    }

    #[test]
    fn commit_with_checks_expectations_before_hook() {
        let (store, clock) = test_store();
        let mut batch = WriteBatch::new();
        batch.insert_synced("todos", RecordChange::new("1").field("title", "a"));
        store.commit(batch).unwrap();

        let seen = store.find("todos", "1").unwrap();
        let mut batch = WriteBatch::new();
        batch.expect("todos", "1", seen.as_ref());
        batch.expect("todos", "1", None);
        assert_eq!(batch.expectations().len(), 1);
        batch.destroy_permanently("todos", "1");

        clock.set(2000);
        store.update("todos", "1", fields(json!({"title": "b"}))).unwrap();

        let mut hook_ran = false;
        let result = store.commit_with(batch, &mut || -> Result<()> {
            hook_ran = true;
            Ok(())
        });
        assert!(matches!(result, Err(Error::StaleRecord { .. })));
        assert!(!hook_ran);
        assert_eq!(store.get("todos", "1").unwrap().get("title"), Some(&json!("b")));
    }

    #[test]
    fn failing_hook_aborts_commit() {
        let (store, _) = test_store();
        let mut batch = WriteBatch::new();
        batch.expect("todos", "1", None);
        batch.insert_synced("todos", RecordChange::new("1").field("title", "a"));

        let result = store.commit_with(batch, &mut || -> Result<()> {
            Err(Error::Storage("audit down".into()))
        });
        assert!(matches!(result, Err(Error::Storage(_))));
        assert_eq!(store.status_of("todos", "1"), None);
    }
}
