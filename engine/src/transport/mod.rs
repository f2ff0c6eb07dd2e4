//! Boundary between the engine and the remote authority.
//!
//! The engine only knows [`SyncTransport`]. Two implementations ship with the
//! crate:
//!
//! - [`HttpTransport`] talks JSON over HTTP to a real backend.
//! - [`ConsoleTransport`] prints every exchange and answers with an empty
//!   pull and a successful push, for exercising the protocol offline.
//!
//! Transports never retry. Timeouts are their own concern.

mod console;
mod http;

pub use console::{ConsoleTransport, ConsoleTransportConfig};
pub use http::{HttpTransport, HttpTransportConfig};

use crate::{
    error::Result,
    protocol::{PullRequest, PullResponse, PushRequest, PushResponse},
};
use async_trait::async_trait;

/// Exchange of changes with the remote authority.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Fetch every remote change after `request.last_pulled_at`.
    async fn pull_changes(&self, request: PullRequest) -> Result<PullResponse>;

    /// Send local changes. A response with `ok: false` is not an `Err`; the
    /// caller decides what a rejection means.
    async fn push_changes(&self, request: PushRequest) -> Result<PushResponse>;
}
