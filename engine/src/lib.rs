//! # Tether Engine
//!
//! An offline-first sync engine for local-first applications.
//!
//! Applications write to a local [`RecordStore`] while offline. Each call to
//! [`SyncEngine::sync`] reconciles the store with a remote authority in two
//! phases: pull remote changes since the last checkpoint and merge them,
//! then push every locally dirty record.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`RecordChange`] is an id plus a flat field bag validated against a
//! typed [`Schema`]. In the local store every record carries a
//! [`RecordStatus`]: `synced`, or dirty as `created`, `updated` or `deleted`
//! (a tombstone kept until the remote acknowledges the delete).
//!
//! ### Conflict Resolution
//!
//! When a pulled change meets a dirty local record, [`resolve`] picks a
//! winner by last-write-wins on `updated_at`. Exact ties go to the remote.
//! Every resolved conflict is appended to the [`SyncEventRepository`].
//!
//! ### Transport
//!
//! [`SyncTransport`] is the only way the engine reaches the remote.
//! [`HttpTransport`] speaks JSON over HTTP; [`ConsoleTransport`] prints the
//! protocol and answers locally.
//!
//! ### State Machine
//!
//! The engine moves `idle → pulling → pushing → idle`, or into `error` and
//! back to `idle` after a short delay. A sync requested while another is
//! running is rejected, never queued.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tether_engine::{
//!     CollectionSchema, ConsoleTransport, ConsoleTransportConfig, FieldDef, FieldType,
//!     MemoryCheckpoint, MemoryStore, Schema, SyncConfig, SyncEngine, SyncEventRepository,
//!     SystemClock,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // 1. Define a schema
//! let schema = Schema::new(1).with_collection(CollectionSchema::new(
//!     "todos",
//!     vec![FieldDef::required("title", FieldType::String)],
//! ));
//!
//! // 2. Wire the engine
//! let clock = Arc::new(SystemClock::new());
//! let store = Arc::new(MemoryStore::new(schema, clock.clone()));
//! let transport = ConsoleTransport::new(
//!     ConsoleTransportConfig { simulate_delay: false, ..Default::default() },
//!     clock.clone(),
//! );
//! let engine = SyncEngine::new(
//!     store.clone(),
//!     Arc::new(transport),
//!     Arc::new(MemoryCheckpoint::new()),
//!     Arc::new(SyncEventRepository::in_memory(clock.clone())),
//!     clock,
//!     SyncConfig::new(1),
//! );
//!
//! // 3. Write offline
//! let todo = store
//!     .create("todos", json!({"title": "Buy milk"}).as_object().cloned().unwrap())
//!     .unwrap();
//! assert_eq!(store.pending_count(), 1);
//!
//! // 4. Sync
//! let result = engine.sync().await;
//! assert!(result.success);
//! assert_eq!(result.pushed, 1);
//! assert_eq!(store.pending_count(), 0);
//! assert!(store.get("todos", &todo.id).is_some());
//! # }
//! ```
//!
//! ## Persistence
//!
//! Use [`MemoryStore::export_state`] and [`MemoryStore::import_state`] with
//! [`StoreSnapshot`] to persist the store, [`FileCheckpoint`] for the pull
//! checkpoint and [`SyncEventRepository::open`] for the audit log.

pub mod audit;
pub mod checkpoint;
pub mod clock;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod reconcile;
pub mod record;
pub mod resolver;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod transport;

// Re-export main types at crate root
pub use audit::{SyncEvent, SyncEventRepository};
pub use checkpoint::{CheckpointStore, FileCheckpoint, MemoryCheckpoint};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{
    ListenerId, SyncConfig, SyncEngine, SyncResult, SyncStatus, PULL_APPLY_ATTEMPTS,
};
pub use error::Error;
pub use protocol::{
    PullRequest, PullResponse, PushRequest, PushResponse, SyncChanges, TableChanges,
};
pub use reconcile::{ReconcileResult, Reconciler, ResolvedConflict};
pub use record::{LocalRecord, RecordChange, RecordStatus};
pub use resolver::{resolve, ConflictInfo, ConflictResolution, Winner};
pub use schema::{CollectionSchema, FieldDef, FieldType, Schema};
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{Expectation, MemoryStore, Mutation, RecordStore, WriteBatch};
pub use transport::{
    ConsoleTransport, ConsoleTransportConfig, HttpTransport, HttpTransportConfig, SyncTransport,
};

/// Type aliases for clarity
pub type RecordId = String;
pub type CollectionName = String;
pub type Timestamp = u64;
pub type SchemaVersion = u32;
