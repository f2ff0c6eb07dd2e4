//! Tether Server - reference sync authority.
//!
//! Serves the pull/push protocol spoken by `tether-engine` clients over
//! HTTP, holding every record in memory with last-write-wins on
//! `updated_at`.

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod routes;

pub use crate::auth::AuthUser;
pub use crate::config::{Config, ConfigError};
pub use crate::db::{Database, ServerClock, StoredRecord, UpsertOutcome};
pub use crate::error::AppError;

use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            db: Arc::new(Database::new()),
            config: Arc::new(config),
        }
    }
}

/// Build the router with CORS and request tracing.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
