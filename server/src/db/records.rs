//! Record table: last-write-wins upserts and change feeds.

use super::ServerClock;
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use tether_engine::{CollectionName, RecordChange, RecordId, SyncChanges, Timestamp};

type RecordKey = (CollectionName, RecordId);

/// A record row with server-side bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record: RecordChange,
    /// Server time the row was (re)created
    pub created_at: Timestamp,
    /// Server time of the last write of any kind
    pub changed_at: Timestamp,
    /// Server time of deletion, for tombstones
    pub deleted_at: Option<Timestamp>,
}

impl StoredRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Incoming record was older; the server copy was re-stamped instead
    Kept,
    /// Incoming record was newer than the tombstone
    Resurrected,
}

/// Every record the authority holds, tombstones included.
#[derive(Debug, Default)]
pub struct Database {
    records: DashMap<RecordKey, StoredRecord>,
    clock: ServerClock,
    /// Writers hold this shared from stamping to insert; a pull takes it
    /// exclusively to read its timestamp, so no write stamped before that
    /// timestamp is still in flight when the scan starts.
    write_gate: RwLock<()>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp for a pull response. Every write stamped earlier is visible.
    pub fn snapshot_time(&self) -> Timestamp {
        let _gate = self.write_gate.write();
        self.clock.tick()
    }

    /// Insert or update a record, last write wins on `updated_at`.
    ///
    /// The incoming record wins only when strictly newer. A losing push still
    /// re-stamps the row, so the pushing client pulls the server copy back.
    pub fn upsert(&self, collection: &str, incoming: RecordChange) -> UpsertOutcome {
        let _gate = self.write_gate.read();
        let now = self.clock.tick();
        let key = (collection.to_string(), incoming.id.clone());

        match self.records.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(StoredRecord {
                    record: incoming,
                    created_at: now,
                    changed_at: now,
                    deleted_at: None,
                });
                UpsertOutcome::Inserted
            }
            Entry::Occupied(mut entry) => {
                let stored = entry.get_mut();
                let incoming_ts = incoming.updated_at();
                stored.changed_at = now;
                match stored.deleted_at {
                    Some(deleted_at) if incoming_ts > deleted_at => {
                        stored.record = incoming;
                        stored.created_at = now;
                        stored.deleted_at = None;
                        UpsertOutcome::Resurrected
                    }
                    Some(_) => UpsertOutcome::Kept,
                    None if incoming_ts > stored.record.updated_at() => {
                        stored.record.apply_payload(&incoming);
                        UpsertOutcome::Updated
                    }
                    None => UpsertOutcome::Kept,
                }
            }
        }
    }

    /// Tombstone a record. Returns false if it was missing or already deleted.
    pub fn delete(&self, collection: &str, id: &str) -> bool {
        let _gate = self.write_gate.read();
        let Some(mut stored) = self.records.get_mut(&(collection.to_string(), id.to_string()))
        else {
            return false;
        };
        if stored.is_deleted() {
            return false;
        }
        let now = self.clock.tick();
        stored.deleted_at = Some(now);
        stored.changed_at = now;
        true
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<StoredRecord> {
        self.records
            .get(&(collection.to_string(), id.to_string()))
            .map(|row| row.value().clone())
    }

    /// Number of rows, tombstones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every change after `since`, classified for the pull protocol.
    ///
    /// With no checkpoint every live record is reported as created.
    /// Otherwise rows written after `since` are `created` when the row
    /// itself is newer than `since`, `updated` when it is older, and
    /// `deleted` when tombstoned; rows born and deleted after `since` are
    /// omitted.
    pub fn changes_since(&self, since: Option<Timestamp>) -> SyncChanges {
        let mut rows: Vec<(RecordKey, StoredRecord)> = self
            .records
            .iter()
            .filter(|row| match since {
                None => !row.is_deleted(),
                Some(since) => row.changed_at > since,
            })
            .map(|row| (row.key().clone(), row.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let mut changes = SyncChanges::new();
        for ((collection, id), stored) in rows {
            let since = since.unwrap_or(0);
            let born_before = stored.created_at <= since;
            match stored.deleted_at {
                Some(deleted_at) if born_before => {
                    let table = changes.table_mut(collection);
                    table.deleted_at.insert(id.clone(), deleted_at);
                    table.deleted.push(id);
                }
                Some(_) => {}
                None if born_before => changes.table_mut(collection).updated.push(stored.record),
                None => changes.table_mut(collection).created.push(stored.record),
            }
        }
        changes
    }
}
