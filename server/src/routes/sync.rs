//! Sync endpoint routes.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_pull, handle_push, IncomingPush};
use crate::AppState;
use tether_engine::{PullRequest, PullResponse, PushResponse};

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/sync/pull", post(pull_handler))
        .route("/api/sync/push", post(push_handler))
}

/// POST /api/sync/pull - Changes since the client's checkpoint.
async fn pull_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    body: std::result::Result<Json<PullRequest>, JsonRejection>,
) -> Result<Json<PullResponse>> {
    let Json(request) = body?;
    let response = handle_pull(&state.db, state.config.schema_version, request)?;
    Ok(Json(response))
}

/// POST /api/sync/push - Apply the client's dirty records.
async fn push_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    body: std::result::Result<Json<IncomingPush>, JsonRejection>,
) -> Result<Json<PushResponse>> {
    let Json(request) = body?;
    Ok(Json(handle_push(&state.db, request)))
}
