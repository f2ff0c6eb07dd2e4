//! Pull handler - serves changes since a client checkpoint.

use crate::db::Database;
use crate::error::{AppError, Result};
use tether_engine::{PullRequest, PullResponse, SchemaVersion};

/// Process a pull request from a client.
pub fn handle_pull(
    db: &Database,
    schema_version: SchemaVersion,
    request: PullRequest,
) -> Result<PullResponse> {
    if request.schema_version > schema_version {
        return Err(AppError::BadRequest(format!(
            "Unsupported schema version {} (server supports up to {})",
            request.schema_version, schema_version
        )));
    }

    let timestamp = db.snapshot_time();
    let changes = db.changes_since(request.last_pulled_at);

    tracing::debug!(
        since = ?request.last_pulled_at,
        timestamp,
        count = changes.count(),
        "Serving pull"
    );

    Ok(PullResponse { changes, timestamp })
}
