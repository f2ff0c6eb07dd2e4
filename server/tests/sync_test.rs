//! End-to-end tests: engine clients syncing through a live server.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tether_engine::{
    CollectionSchema, FieldDef, FieldType, HttpTransport, HttpTransportConfig, ManualClock,
    MemoryCheckpoint, MemoryStore, RecordStatus, Schema, SyncConfig, SyncEngine,
    SyncEventRepository, SyncStatus, Winner,
};
use tether_server::{app, AppState, Config};

const TOKEN: &str = "device-token";

async fn spawn_server(config: Config) -> (String, AppState) {
    let state = AppState::new(config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn schema() -> Schema {
    Schema::new(1).with_collection(CollectionSchema::new(
        "todos",
        vec![
            FieldDef::required("title", FieldType::String),
            FieldDef::optional("is_completed", FieldType::Bool),
        ],
    ))
}

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

/// One replica: a local store plus an engine talking HTTP.
struct Client {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    transport: Arc<HttpTransport>,
    engine: SyncEngine,
}

impl Client {
    fn connect(base_url: &str, start: u64, config: SyncConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(MemoryStore::new(schema(), clock.clone()));
        let transport = Arc::new(HttpTransport::new(HttpTransportConfig::new(base_url)).unwrap());
        transport.set_auth_token(Some(TOKEN.to_string()));
        let engine = SyncEngine::new(
            store.clone(),
            transport.clone(),
            Arc::new(MemoryCheckpoint::new()),
            Arc::new(SyncEventRepository::in_memory(clock.clone())),
            clock.clone(),
            config,
        );
        Self {
            clock,
            store,
            transport,
            engine,
        }
    }

    fn title(&self, id: &str) -> Option<String> {
        self.store
            .get("todos", id)
            .and_then(|r| r.get("title").and_then(Value::as_str).map(str::to_string))
    }
}

async fn pair() -> (Client, Client, AppState) {
    let (url, state) = spawn_server(Config::default()).await;
    let a = Client::connect(&url, 1000, SyncConfig::new(1));
    let b = Client::connect(&url, 1000, SyncConfig::new(1));
    (a, b, state)
}

#[tokio::test]
async fn created_record_reaches_second_client() {
    let (a, b, state) = pair().await;
    a.store
        .create_with_id("todos", "t1", fields(json!({"title": "Buy milk"})))
        .unwrap();

    let result = a.engine.sync().await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.pushed, 1);
    assert_eq!(a.store.status_of("todos", "t1"), Some(RecordStatus::Synced));
    assert!(state.db.get("todos", "t1").is_some());

    let result = b.engine.sync().await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.pulled, 1);
    assert_eq!(result.pushed, 0);
    assert_eq!(b.title("t1").as_deref(), Some("Buy milk"));
    assert_eq!(b.store.status_of("todos", "t1"), Some(RecordStatus::Synced));
}

#[tokio::test]
async fn own_push_echoed_back_is_not_a_conflict() {
    let (a, _b, _state) = pair().await;
    a.store
        .create_with_id("todos", "t1", fields(json!({"title": "mine"})))
        .unwrap();
    assert!(a.engine.sync().await.success);

    let result = a.engine.sync().await;
    assert!(result.success);
    assert_eq!(result.conflicts, 0);
    assert!(a.engine.audit().is_empty());
    assert_eq!(a.store.pending_count(), 0);
}

#[tokio::test]
async fn newer_edit_wins_on_both_replicas() {
    let (a, b, _state) = pair().await;
    a.store
        .create_with_id("todos", "t1", fields(json!({"title": "original"})))
        .unwrap();
    assert!(a.engine.sync().await.success);
    assert!(b.engine.sync().await.success);

    a.clock.set(5000);
    a.store
        .update("todos", "t1", fields(json!({"title": "from a"})))
        .unwrap();
    b.clock.set(6000);
    b.store
        .update("todos", "t1", fields(json!({"title": "from b"})))
        .unwrap();

    assert!(a.engine.sync().await.success);

    let result = b.engine.sync().await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.conflicts, 1);
    assert_eq!(result.pushed, 1);
    let events = b.engine.audit().events_for_record("todos", "t1");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].winner, Winner::Local);

    let result = a.engine.sync().await;
    assert!(result.success);
    assert_eq!(a.title("t1").as_deref(), Some("from b"));
    assert_eq!(b.title("t1").as_deref(), Some("from b"));
}

#[tokio::test]
async fn older_local_edit_yields_to_server() {
    let (a, b, state) = pair().await;
    a.store
        .create_with_id("todos", "t1", fields(json!({"title": "original"})))
        .unwrap();
    assert!(a.engine.sync().await.success);
    assert!(b.engine.sync().await.success);

    b.clock.set(6000);
    b.store
        .update("todos", "t1", fields(json!({"title": "newer"})))
        .unwrap();
    assert!(b.engine.sync().await.success);

    a.clock.set(5000);
    a.store
        .update("todos", "t1", fields(json!({"title": "older"})))
        .unwrap();
    let result = a.engine.sync().await;
    assert!(result.success);
    assert_eq!(result.conflicts, 1);
    assert_eq!(result.pushed, 0);
    assert_eq!(a.title("t1").as_deref(), Some("newer"));
    assert_eq!(a.store.status_of("todos", "t1"), Some(RecordStatus::Synced));
    assert_eq!(
        state.db.get("todos", "t1").unwrap().record.get("title"),
        Some(&json!("newer"))
    );
}

#[tokio::test]
async fn delete_propagates() {
    let (a, b, state) = pair().await;
    a.store
        .create_with_id("todos", "t1", fields(json!({"title": "doomed"})))
        .unwrap();
    assert!(a.engine.sync().await.success);
    assert!(b.engine.sync().await.success);
    assert!(b.store.get("todos", "t1").is_some());

    a.clock.set(2000);
    a.store.delete("todos", "t1").unwrap();
    let result = a.engine.sync().await;
    assert!(result.success);
    assert_eq!(result.pushed, 1);
    assert_eq!(a.store.status_of("todos", "t1"), None);
    assert!(state.db.get("todos", "t1").unwrap().is_deleted());

    let result = b.engine.sync().await;
    assert!(result.success);
    assert_eq!(result.pulled, 1);
    assert!(b.store.get("todos", "t1").is_none());
    assert_eq!(b.store.status_of("todos", "t1"), None);
}

#[tokio::test]
async fn unknown_token_is_rejected() {
    let (url, _state) = spawn_server(Config::default().with_auth_tokens(["secret"])).await;
    let config = SyncConfig::new(1).with_error_reset_delay(Duration::from_millis(10));
    let client = Client::connect(&url, 1000, config);
    client.transport.set_auth_token(Some("wrong".to_string()));

    let result = client.engine.sync().await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Invalid token"));
    assert_eq!(client.engine.status(), SyncStatus::Error);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.engine.status(), SyncStatus::Idle);
    client.transport.set_auth_token(Some("secret".to_string()));
    let result = client.engine.sync().await;
    assert!(result.success, "{:?}", result.error);
}

#[tokio::test]
async fn missing_token_fails_before_reaching_server() {
    let (a, _b, _state) = pair().await;
    a.transport.set_auth_token(None);

    let result = a.engine.sync().await;
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Not authenticated. Please login first.")
    );
    assert_eq!(a.engine.last_pulled_at(), None);
}

#[tokio::test]
async fn newer_client_schema_is_refused() {
    let (url, _state) = spawn_server(Config::default()).await;
    let client = Client::connect(&url, 1000, SyncConfig::new(2));
    client
        .store
        .create_with_id("todos", "t1", fields(json!({"title": "kept"})))
        .unwrap();

    let result = client.engine.sync().await;
    assert!(!result.success);
    assert!(result
        .error
        .unwrap()
        .starts_with("Unsupported schema version 2"));
    assert_eq!(client.store.status_of("todos", "t1"), Some(RecordStatus::Created));
}
