//! Liveness and sync metadata.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tether_engine::SchemaVersion;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Newest schema version pulls are accepted for
    pub schema_version: SchemaVersion,
    /// Rows held, tombstones included
    pub records: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        schema_version: state.config.schema_version,
        records: state.db.len(),
    })
}

async fn root() -> &'static str {
    "Tether Sync Server"
}
