//! JSON-over-HTTP transport.

use super::SyncTransport;
use crate::{
    error::Result,
    protocol::{PullRequest, PullResponse, PushRequest, PushResponse},
    Error,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::{Duration, Instant};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const PULL_PATH: &str = "/api/sync/pull";
const PUSH_PATH: &str = "/api/sync/push";

/// Connection settings for [`HttpTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransportConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl HttpTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read `TETHER_SYNC_URL` and `TETHER_SYNC_TIMEOUT_MS`, keeping defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base_url = std::env::var("TETHER_SYNC_URL").unwrap_or(defaults.base_url);
        let timeout = std::env::var("TETHER_SYNC_TIMEOUT_MS")
            .ok()
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.timeout);
        Self { base_url, timeout }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// [`SyncTransport`] posting JSON to `{base_url}/api/sync/{pull,push}`.
///
/// Every request needs a bearer token; without one the call fails with
/// [`Error::NotAuthenticated`] before touching the network.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    auth_token: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Set or clear the bearer token sent with every request.
    pub fn set_auth_token(&self, token: Option<String>) {
        let is_set = token.is_some();
        *self.auth_token.write() = token;
        tracing::info!("auth token {}", if is_set { "set" } else { "cleared" });
    }

    pub fn auth_token(&self) -> Option<String> {
        self.auth_token.read().clone()
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let token = self.auth_token().ok_or(Error::NotAuthenticated)?;
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

/// Turn a non-success response into [`Error::Api`], preferring the server's
/// `error` message over the bare status.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.error)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn pull_changes(&self, request: PullRequest) -> Result<PullResponse> {
        let start = Instant::now();
        tracing::info!(
            last_pulled_at = ?request.last_pulled_at,
            schema_version = request.schema_version,
            "POST {PULL_PATH}"
        );

        let response: PullResponse = self.post(PULL_PATH, &request).await.inspect_err(|e| {
            tracing::error!(error = %e, "pull failed");
        })?;

        for (collection, table) in response.changes.iter() {
            tracing::debug!(
                collection = %collection,
                created = table.created.len(),
                updated = table.updated.len(),
                deleted = table.deleted.len(),
                "pulled"
            );
        }
        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            timestamp = response.timestamp,
            "pull completed"
        );
        Ok(response)
    }

    async fn push_changes(&self, request: PushRequest) -> Result<PushResponse> {
        let start = Instant::now();
        tracing::info!(
            last_pulled_at = request.last_pulled_at,
            changes = %request.changes.summary(),
            "POST {PUSH_PATH}"
        );

        let response: PushResponse = self.post(PUSH_PATH, &request).await.inspect_err(|e| {
            tracing::error!(error = %e, "push failed");
        })?;

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = response.ok,
            "push completed"
        );
        Ok(response)
    }
}
