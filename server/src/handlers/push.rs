//! Push handler - applies client changes with last-write-wins.

use crate::db::{Database, UpsertOutcome};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tether_engine::{CollectionName, PushResponse, RecordChange, RecordId, Timestamp};

/// Push request body.
///
/// Records are read as raw objects so a bad record is reported in the
/// response instead of failing the whole body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingPush {
    #[serde(default)]
    pub changes: BTreeMap<CollectionName, IncomingTable>,
    #[serde(default)]
    pub last_pulled_at: Option<Timestamp>,
}

/// Changes for one collection as sent by a client.
#[derive(Debug, Default, Deserialize)]
pub struct IncomingTable {
    #[serde(default)]
    pub created: Vec<Map<String, Value>>,
    #[serde(default)]
    pub updated: Vec<Map<String, Value>>,
    #[serde(default)]
    pub deleted: Vec<RecordId>,
}

/// Validated push, ready to apply.
struct PushBatch {
    upserts: Vec<(CollectionName, RecordChange)>,
    deletes: Vec<(CollectionName, RecordId)>,
}

/// Process a push request from a client.
///
/// Nothing is applied unless every record validates.
pub fn handle_push(db: &Database, request: IncomingPush) -> PushResponse {
    let since = request.last_pulled_at;
    let batch = match validate(request) {
        Ok(batch) => batch,
        Err(errors) => {
            tracing::warn!(errors = errors.len(), "Rejected push");
            return PushResponse::rejected(errors);
        }
    };

    let (mut written, mut kept) = (0usize, 0usize);
    for (collection, record) in batch.upserts {
        match db.upsert(&collection, record) {
            UpsertOutcome::Kept => kept += 1,
            UpsertOutcome::Inserted | UpsertOutcome::Updated | UpsertOutcome::Resurrected => {
                written += 1
            }
        }
    }

    let mut deleted = 0usize;
    for (collection, id) in batch.deletes {
        if db.delete(&collection, &id) {
            deleted += 1;
        }
    }

    tracing::info!(?since, written, kept, deleted, "Applied push");
    PushResponse::accepted()
}

fn validate(request: IncomingPush) -> std::result::Result<PushBatch, Vec<String>> {
    let mut batch = PushBatch {
        upserts: Vec::new(),
        deletes: Vec::new(),
    };
    let mut errors = Vec::new();

    for (collection, table) in request.changes {
        let sections = [("created", table.created), ("updated", table.updated)];
        for (section, records) in sections {
            for (index, fields) in records.into_iter().enumerate() {
                match record_from_fields(fields) {
                    Some(record) => batch.upserts.push((collection.clone(), record)),
                    None => errors.push(format!(
                        "{collection}.{section}[{index}]: missing or empty id"
                    )),
                }
            }
        }

        for (index, id) in table.deleted.into_iter().enumerate() {
            if id.is_empty() {
                errors.push(format!("{collection}.deleted[{index}]: empty id"));
            } else {
                batch.deletes.push((collection.clone(), id));
            }
        }
    }

    if errors.is_empty() {
        Ok(batch)
    } else {
        Err(errors)
    }
}

fn record_from_fields(mut fields: Map<String, Value>) -> Option<RecordChange> {
    let id = match fields.remove("id") {
        Some(Value::String(id)) if !id.is_empty() => id,
        _ => return None,
    };
    Some(RecordChange::with_fields(id, fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn push(body: Value) -> IncomingPush {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn applies_created_updated_and_deleted() {
        let db = Database::new();
        db.upsert("todos", RecordChange::new("old").field("updated_at", 1));

        let response = handle_push(
            &db,
            push(json!({
                "changes": {
                    "todos": {
                        "created": [{"id": "new", "title": "n", "updated_at": 5}],
                        "updated": [],
                        "deleted": ["old"]
                    }
                },
                "lastPulledAt": 0
            })),
        );

        assert!(response.ok);
        assert_eq!(db.get("todos", "new").unwrap().record.get("title").unwrap(), "n");
        assert!(db.get("todos", "old").unwrap().is_deleted());
    }

    #[test]
    fn missing_id_rejects_whole_push() {
        let db = Database::new();
        let response = handle_push(
            &db,
            push(json!({
                "changes": {
                    "todos": {
                        "created": [{"id": "ok", "title": "a"}, {"title": "no id"}],
                        "deleted": [""]
                    }
                }
            })),
        );

        assert!(!response.ok);
        assert_eq!(
            response.errors.unwrap(),
            vec![
                "todos.created[1]: missing or empty id".to_string(),
                "todos.deleted[0]: empty id".to_string()
            ]
        );
        assert!(db.is_empty());
    }

    #[test]
    fn non_string_id_is_invalid() {
        assert!(record_from_fields(json!({"id": 7}).as_object().cloned().unwrap()).is_none());
    }

    #[test]
    fn stale_update_keeps_server_copy() {
        let db = Database::new();
        db.upsert(
            "todos",
            RecordChange::new("1").field("title", "server").field("updated_at", 2000),
        );

        let response = handle_push(
            &db,
            push(json!({
                "changes": {"todos": {"updated": [{"id": "1", "title": "client", "updated_at": 1000}]}}
            })),
        );

        assert!(response.ok);
        assert_eq!(db.get("todos", "1").unwrap().record.get("title").unwrap(), "server");
    }

    #[test]
    fn deleting_unknown_id_is_ignored() {
        let db = Database::new();
        let response = handle_push(
            &db,
            push(json!({"changes": {"todos": {"deleted": ["ghost"]}}})),
        );
        assert!(response.ok);
        assert!(db.is_empty());
    }
}
