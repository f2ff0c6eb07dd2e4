//! Error types for the Tether engine.

use crate::{CollectionName, RecordId, SchemaVersion};
use thiserror::Error;

/// All possible errors from the Tether engine.
#[derive(Debug, Error)]
pub enum Error {
    // Validation errors
    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("unknown field '{field}' in collection '{collection}'")]
    UnknownField { collection: String, field: String },

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Local store errors
    #[error("record already exists: {0}")]
    RecordAlreadyExists(RecordId),

    #[error("operation on deleted record: {0}")]
    OperationOnDeleted(RecordId),

    #[error("record changed during sync: {collection}/{record_id}")]
    StaleRecord {
        collection: CollectionName,
        record_id: RecordId,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Transport errors
    #[error("Not authenticated. Please login first.")]
    NotAuthenticated,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("push rejected: {0}")]
    PushRejected(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
