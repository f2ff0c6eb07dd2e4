//! Diagnostic transport that prints the protocol instead of sending it.

use super::SyncTransport;
use crate::{
    clock::Clock,
    error::Result,
    protocol::{PullRequest, PullResponse, PushRequest, PushResponse, SyncChanges},
};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

const WIDTH: usize = 58;
const PREVIEW_CHARS: usize = 50;

/// Options for [`ConsoleTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleTransportConfig {
    /// Sleep before answering, as a network round trip would
    pub simulate_delay: bool,
    pub delay: Duration,
}

impl Default for ConsoleTransportConfig {
    fn default() -> Self {
        Self {
            simulate_delay: true,
            delay: Duration::from_millis(500),
        }
    }
}

/// [`SyncTransport`] that prints each exchange to stdout.
///
/// Pulls always return no changes stamped with the current time; pushes
/// always succeed.
pub struct ConsoleTransport {
    config: ConsoleTransportConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ConsoleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleTransport")
            .field("config", &self.config)
            .finish()
    }
}

impl ConsoleTransport {
    pub fn new(config: ConsoleTransportConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    async fn delay(&self) {
        if self.config.simulate_delay && !self.config.delay.is_zero() {
            tokio::time::sleep(self.config.delay).await;
        }
    }
}

#[async_trait]
impl SyncTransport for ConsoleTransport {
    async fn pull_changes(&self, request: PullRequest) -> Result<PullResponse> {
        let start = Instant::now();
        print!("{}", render_pull_request(&request));
        tracing::info!(
            last_pulled_at = ?request.last_pulled_at,
            schema_version = request.schema_version,
            "GET /sync/pull"
        );

        self.delay().await;

        let response = PullResponse {
            changes: SyncChanges::new(),
            timestamp: self.clock.now_ms(),
        };
        let elapsed = start.elapsed();
        print!("{}", render_pull_response(&response, elapsed));
        tracing::debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            timestamp = response.timestamp,
            "pull response received"
        );
        Ok(response)
    }

    async fn push_changes(&self, request: PushRequest) -> Result<PushResponse> {
        let start = Instant::now();
        print!("{}", render_push_request(&request));
        tracing::info!(
            last_pulled_at = request.last_pulled_at,
            changes = %request.changes.summary(),
            "POST /sync/push"
        );

        self.delay().await;

        let response = PushResponse::accepted();
        let elapsed = start.elapsed();
        print!("{}", render_push_response(&response, elapsed));
        tracing::debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            ok = response.ok,
            "push response received"
        );
        Ok(response)
    }
}

struct Frame(String);

impl Frame {
    fn new(title: &str) -> Self {
        let mut frame = Frame(String::new());
        let _ = writeln!(frame.0, "\n┌{}┐", "─".repeat(WIDTH));
        frame.line_padded(&format!("{title:^WIDTH$}"));
        frame.rule();
        frame
    }

    fn rule(&mut self) {
        let _ = writeln!(self.0, "├{}┤", "─".repeat(WIDTH));
    }

    fn line(&mut self, text: &str) {
        let _ = writeln!(self.0, "│ {text}");
    }

    fn line_padded(&mut self, text: &str) {
        let _ = writeln!(self.0, "│{text:<WIDTH$}│");
    }

    fn finish(mut self) -> String {
        let _ = writeln!(self.0, "└{}┘\n", "─".repeat(WIDTH));
        self.0
    }
}

fn render_pull_request(request: &PullRequest) -> String {
    let mut frame = Frame::new("GET /sync/pull");
    frame.line("Request:");
    match request.last_pulled_at {
        Some(ts) => frame.line(&format!("  lastPulledAt: {ts}")),
        None => frame.line("  lastPulledAt: null (first sync)"),
    }
    frame.line(&format!("  schemaVersion: {}", request.schema_version));
    frame.finish()
}

fn render_pull_response(response: &PullResponse, elapsed: Duration) -> String {
    let mut frame = Frame::new("RESPONSE 200 OK");
    frame.line(&format!("Server timestamp: {}", response.timestamp));
    frame.line(&format!("Changes: {}", response.changes.summary()));
    frame.line(&format!("Duration: {}ms", elapsed.as_millis()));
    frame.finish()
}

fn render_push_request(request: &PushRequest) -> String {
    let mut frame = Frame::new("POST /sync/push");
    frame.line("Request:");
    frame.line(&format!("  lastPulledAt: {}", request.last_pulled_at));
    frame.line(&format!("  Changes: {}", request.changes.summary()));
    frame.rule();
    frame.line("Change Details:");

    for (collection, table) in request.changes.iter() {
        let sections = [
            ("[POST]", "(create)", &table.created),
            ("[PUT]", "(update)", &table.updated),
        ];
        for (verb, label, records) in sections {
            if records.is_empty() {
                continue;
            }
            frame.line("");
            frame.line(&format!("{verb} {collection} {label}:"));
            for record in records {
                let json = serde_json::to_string(record).unwrap_or_default();
                frame.line(&format!("  - {}...", preview(&json)));
            }
        }
        if !table.deleted.is_empty() {
            frame.line("");
            frame.line(&format!("[DELETE] {collection}:"));
            for id in &table.deleted {
                frame.line(&format!("  - id: {id}"));
            }
        }
    }
    frame.finish()
}

fn render_push_response(response: &PushResponse, elapsed: Duration) -> String {
    let mut frame = Frame::new("RESPONSE 200 OK");
    frame.line(&format!("Success: {}", response.ok));
    frame.line(&format!("Duration: {}ms", elapsed.as_millis()));
    frame.finish()
}

fn preview(json: &str) -> &str {
    match json.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => &json[..idx],
        None => json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::record::RecordChange;

    fn transport(clock: Arc<ManualClock>) -> ConsoleTransport {
        ConsoleTransport::new(
            ConsoleTransportConfig {
                simulate_delay: false,
                ..Default::default()
            },
            clock,
        )
    }

    #[test]
    fn default_config() {
        let config = ConsoleTransportConfig::default();
        assert!(config.simulate_delay);
        assert_eq!(config.delay, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn pull_returns_empty_changes_at_now() {
        let clock = Arc::new(ManualClock::new(42_000));
        let response = transport(clock)
            .pull_changes(PullRequest {
                last_pulled_at: None,
                schema_version: 1,
            })
            .await
            .unwrap();

        assert!(response.changes.is_empty());
        assert_eq!(response.timestamp, 42_000);
    }

    #[tokio::test]
    async fn push_always_succeeds() {
        let mut changes = SyncChanges::new();
        changes.table_mut("todos").deleted.push("1".into());

        let response = transport(Arc::new(ManualClock::new(0)))
            .push_changes(PushRequest {
                changes,
                last_pulled_at: 10,
            })
            .await
            .unwrap();
        assert_eq!(response, PushResponse::accepted());
    }

    #[tokio::test]
    async fn simulated_delay() {
        let transport = ConsoleTransport::new(
            ConsoleTransportConfig {
                simulate_delay: true,
                delay: Duration::from_millis(20),
            },
            Arc::new(ManualClock::new(0)),
        );
        let before = Instant::now();
        transport
            .pull_changes(PullRequest {
                last_pulled_at: Some(1),
                schema_version: 1,
            })
            .await
            .unwrap();
        assert!(before.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn renders_first_sync() {
        let out = render_pull_request(&PullRequest {
            last_pulled_at: None,
            schema_version: 3,
        });
        assert!(out.contains("GET /sync/pull"));
        assert!(out.contains("lastPulledAt: null (first sync)"));
        assert!(out.contains("schemaVersion: 3"));
        assert!(out.trim_start().starts_with('┌'));
    }

    #[test]
    fn renders_push_details() {
        let mut changes = SyncChanges::new();
        let todos = changes.table_mut("todos");
        todos
            .created
            .push(RecordChange::new("1").field("title", "x".repeat(100)));
        todos.deleted.push("9".into());

        let out = render_push_request(&PushRequest {
            changes,
            last_pulled_at: 77,
        });
        assert!(out.contains("lastPulledAt: 77"));
        assert!(out.contains("Changes: todos: 1 created, 1 deleted"));
        assert!(out.contains("[POST] todos (create):"));
        assert!(out.contains("[DELETE] todos:"));
        assert!(out.contains("  - id: 9"));
        assert!(!out.contains(&"x".repeat(60)));
    }
}
