//! Last-write-wins conflict resolution.
//!
//! Pure functions only: nothing here logs or touches storage. Callers record
//! the outcome in the audit log and apply the winning content themselves.
//!
//! # Policy
//!
//! 1. The side with the greater `updated_at` wins.
//! 2. Exact ties go to the remote. Every replica breaks ties the same way,
//!    so independent resolutions of the same conflict agree.
//! 3. A record without a usable timestamp counts as `0` and loses to any
//!    timestamped counterpart.

use crate::{
    record::{RecordChange, UPDATED_AT, UPDATED_AT_ALIAS},
    CollectionName, RecordId, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Which side of a conflict was kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Local,
    Remote,
}

impl std::fmt::Display for Winner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Winner::Local => f.write_str("local"),
            Winner::Remote => f.write_str("remote"),
        }
    }
}

/// Both versions of a record that diverged between replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub collection: CollectionName,
    pub record_id: RecordId,
    pub local_record: RecordChange,
    pub remote_record: RecordChange,
    pub local_updated_at: Timestamp,
    pub remote_updated_at: Timestamp,
}

impl ConflictInfo {
    /// Build a conflict, taking both timestamps from the records themselves.
    pub fn new(
        collection: impl Into<CollectionName>,
        local_record: RecordChange,
        remote_record: RecordChange,
    ) -> Self {
        Self {
            collection: collection.into(),
            record_id: local_record.id.clone(),
            local_updated_at: record_timestamp(&local_record),
            remote_updated_at: record_timestamp(&remote_record),
            local_record,
            remote_record,
        }
    }

    /// Build a conflict with an explicit remote timestamp, for remote
    /// changes (deletions) that carry no record of their own.
    pub fn with_remote_timestamp(
        collection: impl Into<CollectionName>,
        local_record: RecordChange,
        remote_record: RecordChange,
        remote_updated_at: Timestamp,
    ) -> Self {
        Self {
            remote_updated_at,
            ..Self::new(collection, local_record, remote_record)
        }
    }
}

/// Outcome of resolving a [`ConflictInfo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub winner: Winner,
    /// Human-readable explanation citing both timestamps
    pub reason: String,
    /// Content of the winning side
    pub resolved_record: RecordChange,
}

/// Resolve a conflict by last-write-wins, remote taking exact ties.
pub fn resolve(conflict: &ConflictInfo) -> ConflictResolution {
    let local = conflict.local_updated_at;
    let remote = conflict.remote_updated_at;

    if local > remote {
        ConflictResolution {
            winner: Winner::Local,
            reason: format!("Local timestamp ({local}) is newer than remote ({remote})"),
            resolved_record: conflict.local_record.clone(),
        }
    } else if remote > local {
        ConflictResolution {
            winner: Winner::Remote,
            reason: format!("Remote timestamp ({remote}) is newer than local ({local})"),
            resolved_record: conflict.remote_record.clone(),
        }
    } else {
        ConflictResolution {
            winner: Winner::Remote,
            reason: format!("Timestamps equal ({local}). Remote wins by server authority."),
            resolved_record: conflict.remote_record.clone(),
        }
    }
}

/// Resolve a batch of conflicts, keyed by record id.
pub fn resolve_all(conflicts: &[ConflictInfo]) -> HashMap<RecordId, ConflictResolution> {
    conflicts
        .iter()
        .map(|conflict| (conflict.record_id.clone(), resolve(conflict)))
        .collect()
}

/// Extract a record's `updated_at`, falling back to `updatedAt`.
///
/// Missing, negative or non-numeric values read as `0`.
pub fn record_timestamp(record: &RecordChange) -> Timestamp {
    fields_timestamp(&record.fields)
}

/// [`record_timestamp`] over a raw field map.
pub fn fields_timestamp(fields: &Map<String, Value>) -> Timestamp {
    fields
        .get(UPDATED_AT)
        .filter(|v| !v.is_null())
        .or_else(|| fields.get(UPDATED_AT_ALIAS))
        .map_or(0, numeric_timestamp)
}

fn numeric_timestamp(value: &Value) -> Timestamp {
    if let Some(ts) = value.as_u64() {
        return ts;
    }
    match value.as_f64() {
        // Float timestamps are truncated to whole milliseconds.
        Some(ts) if ts.is_finite() && ts >= 0.0 => ts as Timestamp,
        _ => 0,
    }
}

/// True when both sides changed after `base`.
///
/// Distinguishes "both changed since last sync" from "only one side changed".
/// The engine does not gate resolution on this: id collisions are resolved
/// even when only one side moved.
pub fn has_conflict(
    local: Option<&RecordChange>,
    remote: Option<&RecordChange>,
    base: Timestamp,
) -> bool {
    match (local, remote) {
        (Some(local), Some(remote)) => {
            record_timestamp(local) > base && record_timestamp(remote) > base
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, updated_at: u64) -> RecordChange {
        RecordChange::new(id)
            .field("title", format!("v{updated_at}"))
            .field(UPDATED_AT, updated_at)
    }

    fn conflict(local: u64, remote: u64) -> ConflictInfo {
        ConflictInfo::new("todos", record("1", local), record("1", remote))
    }

    #[test]
    fn newer_local_wins() {
        let resolution = resolve(&conflict(2000, 1000));
        assert_eq!(resolution.winner, Winner::Local);
        assert_eq!(resolution.resolved_record, record("1", 2000));
        assert!(resolution.reason.contains("2000"));
        assert!(resolution.reason.contains("1000"));
    }

    #[test]
    fn newer_remote_wins() {
        let resolution = resolve(&conflict(1000, 2000));
        assert_eq!(resolution.winner, Winner::Remote);
        assert_eq!(resolution.resolved_record, record("1", 2000));
    }

    #[test]
    fn tie_goes_to_remote() {
        let resolution = resolve(&conflict(1500, 1500));
        assert_eq!(resolution.winner, Winner::Remote);
        assert!(resolution.reason.contains("server authority"));
    }

    #[test]
    fn untimestamped_record_loses() {
        let info = ConflictInfo::new("todos", RecordChange::new("1"), record("1", 1));
        assert_eq!(info.local_updated_at, 0);
        assert_eq!(resolve(&info).winner, Winner::Remote);

        let info = ConflictInfo::new("todos", record("1", 1), RecordChange::new("1"));
        assert_eq!(resolve(&info).winner, Winner::Local);
    }

    #[test]
    fn timestamp_extraction() {
        let primary = RecordChange::new("1").field("updated_at", 12345);
        assert_eq!(record_timestamp(&primary), 12345);

        let alias = RecordChange::new("1").field("updatedAt", 67890);
        assert_eq!(record_timestamp(&alias), 67890);

        let both = RecordChange::new("1")
            .field("updated_at", 12345)
            .field("updatedAt", 67890);
        assert_eq!(record_timestamp(&both), 12345);

        assert_eq!(record_timestamp(&RecordChange::new("1")), 0);

        let text = RecordChange::new("1").field("updated_at", "yesterday");
        assert_eq!(record_timestamp(&text), 0);

        let negative = RecordChange::new("1").field("updated_at", -5);
        assert_eq!(record_timestamp(&negative), 0);

        let float = RecordChange::new("1").field("updated_at", 1500.9);
        assert_eq!(record_timestamp(&float), 1500);

        let null_primary = RecordChange::new("1")
            .field("updated_at", json!(null))
            .field("updatedAt", 42);
        assert_eq!(record_timestamp(&null_primary), 42);
    }

    #[test]
    fn has_conflict_requires_both_sides_past_base() {
        let local = record("1", 2000);
        let remote = record("1", 3000);

        assert!(has_conflict(Some(&local), Some(&remote), 1000));
        assert!(!has_conflict(Some(&local), Some(&remote), 2000));
        assert!(!has_conflict(Some(&record("1", 500)), Some(&remote), 1000));
        assert!(!has_conflict(None, Some(&remote), 0));
        assert!(!has_conflict(Some(&local), None, 0));
    }

    #[test]
    fn explicit_remote_timestamp() {
        let info = ConflictInfo::with_remote_timestamp(
            "todos",
            record("1", 2000),
            RecordChange::new("1"),
            5000,
        );
        assert_eq!(info.local_updated_at, 2000);
        assert_eq!(info.remote_updated_at, 5000);
        assert_eq!(resolve(&info).winner, Winner::Remote);
    }

    #[test]
    fn resolve_all_keys_by_record() {
        let conflicts = vec![
            ConflictInfo::new("todos", record("a", 2), record("a", 1)),
            ConflictInfo::new("todos", record("b", 1), record("b", 2)),
        ];
        let results = resolve_all(&conflicts);
        assert_eq!(results["a"].winner, Winner::Local);
        assert_eq!(results["b"].winner, Winner::Remote);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_greater_timestamp_wins(a in 0u64..1_000_000, b in 0u64..1_000_000) {
                let resolution = resolve(&conflict(a, b));
                let expected = if a > b { Winner::Local } else { Winner::Remote };
                prop_assert_eq!(resolution.winner, expected);
            }

            #[test]
            fn prop_resolution_is_deterministic(a in 0u64..1_000_000, b in 0u64..1_000_000) {
                let info = conflict(a, b);
                prop_assert_eq!(resolve(&info), resolve(&info));
            }

            #[test]
            fn prop_replicas_agree_on_content(a in 0u64..1_000_000, b in 0u64..1_000_000) {
                // Replica A sees (a local, b remote). The authority later
                // holds whichever won; resolving again from the other side
                // must keep the same content.
                let first = resolve(&conflict(a, b)).resolved_record;
                let second = resolve(&ConflictInfo::new(
                    "todos",
                    record("1", a.max(b)),
                    first.clone(),
                ))
                .resolved_record;
                prop_assert_eq!(first.updated_at(), second.updated_at());
            }

            #[test]
            fn prop_tie_always_remote(a in 0u64..1_000_000) {
                let resolution = resolve(&conflict(a, a));
                prop_assert_eq!(resolution.winner, Winner::Remote);
                prop_assert!(resolution.reason.contains("server authority"));
            }
        }
    }
}
