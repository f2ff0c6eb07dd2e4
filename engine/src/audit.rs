//! Append-only audit trail of resolved conflicts.
//!
//! Every conflict the engine resolves produces one [`SyncEvent`]. Events are
//! never edited; the only removal path is [`SyncEventRepository::purge_older_than`].
//! A file-backed repository stores one JSON event per line.

use crate::{
    clock::Clock,
    error::Result,
    resolver::{ConflictInfo, ConflictResolution, Winner},
    CollectionName, RecordId, Timestamp,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default page size for [`SyncEventRepository::recent`].
pub const DEFAULT_RECENT_LIMIT: usize = 50;

/// One resolved conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub id: String,
    pub collection: CollectionName,
    pub record_id: RecordId,
    pub local_updated_at: Timestamp,
    pub remote_updated_at: Timestamp,
    pub winner: Winner,
    pub reason: String,
    pub created_at: Timestamp,
}

/// Repository of [`SyncEvent`]s, optionally mirrored to a JSON-lines file.
pub struct SyncEventRepository {
    clock: Arc<dyn Clock>,
    path: Option<PathBuf>,
    events: Mutex<Vec<SyncEvent>>,
}

impl std::fmt::Debug for SyncEventRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEventRepository")
            .field("path", &self.path)
            .field("events", &self.len())
            .finish()
    }
}

impl SyncEventRepository {
    /// A repository that lives only as long as the process.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            path: None,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Open (or create) a file-backed repository, loading existing events.
    pub fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.into();
        let events = if path.exists() {
            read_events(&path)?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            File::create(&path)?;
            Vec::new()
        };
        tracing::debug!(path = %path.display(), events = events.len(), "opened sync event log");
        Ok(Self {
            clock,
            path: Some(path),
            events: Mutex::new(events),
        })
    }

    /// Append one event for a resolved conflict.
    pub fn record(
        &self,
        conflict: &ConflictInfo,
        resolution: &ConflictResolution,
    ) -> Result<SyncEvent> {
        let mut events = self.record_all([(conflict, resolution)])?;
        Ok(events.remove(0))
    }

    /// Append one event per resolved conflict in a single write. On error no
    /// event is kept.
    pub fn record_all<'a, I>(&self, resolved: I) -> Result<Vec<SyncEvent>>
    where
        I: IntoIterator<Item = (&'a ConflictInfo, &'a ConflictResolution)>,
    {
        let now = self.clock.now_ms();
        let batch: Vec<SyncEvent> = resolved
            .into_iter()
            .map(|(conflict, resolution)| SyncEvent {
                id: uuid::Uuid::new_v4().to_string(),
                collection: conflict.collection.clone(),
                record_id: conflict.record_id.clone(),
                local_updated_at: conflict.local_updated_at,
                remote_updated_at: conflict.remote_updated_at,
                winner: resolution.winner,
                reason: resolution.reason.clone(),
                created_at: now,
            })
            .collect();
        if batch.is_empty() {
            return Ok(batch);
        }

        let mut events = self.events.lock();
        if let Some(path) = &self.path {
            let mut lines = String::new();
            for event in &batch {
                lines.push_str(&serde_json::to_string(event)?);
                lines.push('\n');
            }
            let mut file = OpenOptions::new().append(true).create(true).open(path)?;
            file.write_all(lines.as_bytes())?;
        }
        events.extend(batch.iter().cloned());

        for event in &batch {
            tracing::info!(
                collection = %event.collection,
                record_id = %event.record_id,
                winner = %event.winner,
                "logged conflict resolution"
            );
        }
        Ok(batch)
    }

    /// All events for one record, oldest first.
    pub fn events_for_record(&self, collection: &str, record_id: &str) -> Vec<SyncEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.collection == collection && e.record_id == record_id)
            .cloned()
            .collect()
    }

    /// The `limit` most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<SyncEvent> {
        let mut events = self.events.lock().clone();
        // Stable sort keeps insertion order reversed among equal timestamps.
        events.reverse();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit);
        events
    }

    /// Drop events older than `age`. Returns how many were removed.
    pub fn purge_older_than(&self, age: Duration) -> Result<usize> {
        let age_ms = Timestamp::try_from(age.as_millis()).unwrap_or(Timestamp::MAX);
        let cutoff = self.clock.now_ms().saturating_sub(age_ms);

        let mut events = self.events.lock();
        let (kept, purged): (Vec<_>, Vec<_>) =
            events.drain(..).partition(|e| e.created_at >= cutoff);

        if let Some(path) = &self.path {
            if let Err(e) = rewrite_events(path, &kept) {
                events.extend(kept);
                events.extend(purged);
                events.sort_by_key(|e| e.created_at);
                return Err(e);
            }
        }
        *events = kept;

        tracing::info!(purged = purged.len(), cutoff, "cleared old sync events");
        Ok(purged.len())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn read_events(path: &Path) -> Result<Vec<SyncEvent>> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    Ok(events)
}

fn rewrite_events(path: &Path, events: &[SyncEvent]) -> Result<()> {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    let temp = path.with_file_name(name);

    let mut file = File::create(&temp)?;
    for event in events {
        serde_json::to_writer(&mut file, event)?;
        file.write_all(b"\n")?;
    }
    file.sync_all()?;
    std::fs::rename(&temp, path)?;
    Ok(())
}
