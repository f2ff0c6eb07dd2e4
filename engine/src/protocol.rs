//! Wire types exchanged with the remote authority.
//!
//! ```text
//! pull:  { lastPulledAt, schemaVersion }  ->  { changes, timestamp }
//! push:  { changes, lastPulledAt }        ->  { ok, errors? }
//! ```
//!
//! `changes` maps a collection name to its created records, updated records
//! and deleted ids.

use crate::{record::RecordChange, CollectionName, RecordId, SchemaVersion, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Changes for one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableChanges {
    #[serde(default)]
    pub created: Vec<RecordChange>,
    #[serde(default)]
    pub updated: Vec<RecordChange>,
    #[serde(default)]
    pub deleted: Vec<RecordId>,
    /// Server deletion time per deleted id, when the remote reports it
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deleted_at: BTreeMap<RecordId, Timestamp>,
}

impl TableChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of changed records.
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    fn summary(&self) -> Option<String> {
        let parts: Vec<String> = [
            (self.created.len(), "created"),
            (self.updated.len(), "updated"),
            (self.deleted.len(), "deleted"),
        ]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, kind)| format!("{n} {kind}"))
        .collect();

        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

/// Changes for every collection, keyed by collection name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncChanges(BTreeMap<CollectionName, TableChanges>);

impl SyncChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes for `collection`, created empty if missing.
    pub fn table_mut(&mut self, collection: impl Into<CollectionName>) -> &mut TableChanges {
        self.0.entry(collection.into()).or_default()
    }

    pub fn table(&self, collection: &str) -> Option<&TableChanges> {
        self.0.get(collection)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CollectionName, &TableChanges)> {
        self.0.iter()
    }

    /// True when no collection carries any change.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(TableChanges::is_empty)
    }

    /// Total number of changed records across all collections.
    pub fn count(&self) -> usize {
        self.0.values().map(TableChanges::len).sum()
    }

    /// One-line human summary, e.g. `todos: 1 created, 2 deleted`.
    pub fn summary(&self) -> String {
        let tables: Vec<String> = self
            .0
            .iter()
            .filter_map(|(name, table)| table.summary().map(|s| format!("{name}: {s}")))
            .collect();
        if tables.is_empty() {
            "no changes".to_string()
        } else {
            tables.join(" | ")
        }
    }
}

impl FromIterator<(CollectionName, TableChanges)> for SyncChanges {
    fn from_iter<I: IntoIterator<Item = (CollectionName, TableChanges)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Pull request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// `None` means "never synced": the remote sends everything
    pub last_pulled_at: Option<Timestamp>,
    pub schema_version: SchemaVersion,
}

/// Pull response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(default)]
    pub changes: SyncChanges,
    /// Server time the changes are current as of
    pub timestamp: Timestamp,
}

/// Push request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub changes: SyncChanges,
    /// Checkpoint the client pulled up to, for remote staleness checks
    pub last_pulled_at: Timestamp,
}

/// Push response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl PushResponse {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            errors: None,
        }
    }

    pub fn rejected(errors: Vec<String>) -> Self {
        Self {
            ok: false,
            errors: Some(errors),
        }
    }

    /// Joined server errors, or a generic message when none were given.
    pub fn error_message(&self) -> String {
        match &self.errors {
            Some(errors) if !errors.is_empty() => errors.join(", "),
            _ => "Push failed".to_string(),
        }
    }
}
