//! Record types for storing and exchanging data.

use crate::{resolver, CollectionName, RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the last-mutation timestamp.
pub const UPDATED_AT: &str = "updated_at";
/// Alias some backends use for [`UPDATED_AT`].
pub const UPDATED_AT_ALIAS: &str = "updatedAt";
/// Field holding the creation timestamp.
pub const CREATED_AT: &str = "created_at";

/// A record as exchanged on the wire: an id plus a flat bag of fields.
///
/// Serializes as `{ "id": "...", ...fields }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordChange {
    /// Globally unique identifier
    pub id: RecordId,
    /// All other fields, including `created_at` / `updated_at`
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RecordChange {
    /// Create a record with no fields.
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Create a record from an existing field map.
    pub fn with_fields(id: impl Into<RecordId>, fields: Map<String, Value>) -> Self {
        let mut record = Self::new(id);
        for (key, value) in fields {
            record.set(key, value);
        }
        record
    }

    /// Builder-style field setter.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value.into());
        self
    }

    /// Get a field value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a field value. The `id` key is never stored as a field.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if name != "id" {
            self.fields.insert(name, value);
        }
    }

    /// Last-mutation timestamp, `0` when absent or not numeric.
    pub fn updated_at(&self) -> Timestamp {
        resolver::record_timestamp(self)
    }

    /// Stamp the record as mutated at `ts`.
    pub fn set_updated_at(&mut self, ts: Timestamp) {
        self.fields.insert(UPDATED_AT.to_string(), Value::from(ts));
    }

    /// Copy every field of `remote` over this record, keeping fields that
    /// `remote` does not carry.
    pub fn apply_payload(&mut self, remote: &RecordChange) {
        for (key, value) in &remote.fields {
            self.set(key.clone(), value.clone());
        }
    }

    /// True if every field of `other` is present here with the same value.
    pub fn contains_payload(&self, other: &RecordChange) -> bool {
        self.id == other.id
            && other
                .fields
                .iter()
                .all(|(key, value)| self.fields.get(key) == Some(value))
    }
}

/// Change-tracking status of a record in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// No pending local mutation
    Synced,
    /// Created locally, never pushed
    Created,
    /// Pushed before, mutated again
    Updated,
    /// Tombstoned locally, not yet purged remotely
    Deleted,
}

impl RecordStatus {
    /// True if the record has changes waiting to be pushed.
    pub fn is_dirty(self) -> bool {
        self != RecordStatus::Synced
    }

    /// Status after a local field mutation.
    ///
    /// A record that was never pushed stays `Created`, so the remote
    /// still receives it as a create.
    pub fn after_local_mutation(self) -> Self {
        match self {
            RecordStatus::Synced | RecordStatus::Updated => RecordStatus::Updated,
            RecordStatus::Created => RecordStatus::Created,
            RecordStatus::Deleted => RecordStatus::Deleted,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordStatus::Synced => "synced",
            RecordStatus::Created => "created",
            RecordStatus::Updated => "updated",
            RecordStatus::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// A record held by the local store, with its change-tracking status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    /// Collection this record belongs to
    pub collection: CollectionName,
    /// Current content
    pub record: RecordChange,
    /// Change-tracking status
    pub status: RecordStatus,
}

impl LocalRecord {
    pub fn new(
        collection: impl Into<CollectionName>,
        record: RecordChange,
        status: RecordStatus,
    ) -> Self {
        Self {
            collection: collection.into(),
            record,
            status,
        }
    }

    pub fn id(&self) -> &RecordId {
        &self.record.id
    }

    pub fn is_dirty(&self) -> bool {
        self.status.is_dirty()
    }

    pub fn updated_at(&self) -> Timestamp {
        self.record.updated_at()
    }
}
