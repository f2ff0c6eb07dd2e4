//! Snapshot types for persisting and restoring local store state.
//!
//! Snapshots carry every record with its change-tracking status, so a
//! restored store still knows what it has to push. `BTreeMap` keeps the JSON
//! output byte-stable for identical contents.

use crate::{
    error::Result, record::LocalRecord, CollectionName, Error, RecordId, Schema, SchemaVersion,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub format_version: u32,
    pub schema_version: SchemaVersion,
    /// Records by collection, then by id
    pub collections: BTreeMap<CollectionName, BTreeMap<RecordId, LocalRecord>>,
}

impl StoreSnapshot {
    pub fn new(schema_version: SchemaVersion) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            schema_version,
            collections: BTreeMap::new(),
        }
    }

    pub fn add_record(&mut self, local: LocalRecord) {
        self.collections
            .entry(local.collection.clone())
            .or_default()
            .insert(local.id().clone(), local);
    }

    pub fn get_record(&self, collection: &str, id: &str) -> Option<&LocalRecord> {
        self.collections.get(collection)?.get(id)
    }

    /// Count of records, tombstones included.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    /// Count of records with unpushed changes.
    pub fn pending_count(&self) -> usize {
        self.collections
            .values()
            .flat_map(BTreeMap::values)
            .filter(|local| local.is_dirty())
            .count()
    }

    /// Check the snapshot can be loaded into a store using `schema`.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if self.schema_version != schema.version {
            return Err(Error::SchemaVersionMismatch {
                expected: schema.version,
                actual: self.schema_version,
            });
        }
        for (name, records) in &self.collections {
            schema.collection(name)?;
            if let Some(misfiled) = records.values().find(|local| &local.collection != name) {
                return Err(Error::InvalidSnapshot(format!(
                    "record {} filed under '{}' but belongs to '{}'",
                    misfiled.id(),
                    name,
                    misfiled.collection
                )));
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Parse a snapshot, refusing formats newer than this build understands.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Summary of a snapshot without its records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub schema_version: SchemaVersion,
    pub record_count: usize,
    pub pending_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            schema_version: snapshot.schema_version,
            record_count: snapshot.record_count(),
            pending_count: snapshot.pending_count(),
        }
    }
}
