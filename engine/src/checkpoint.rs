//! Persisted pull checkpoint (`lastPulledAt`).
//!
//! The checkpoint is the server time of the last fully applied pull. Absent
//! means "never synced", so the next pull asks for everything.

use crate::{error::Result, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Durable storage for the pull checkpoint.
pub trait CheckpointStore: Send + Sync {
    fn load(&self) -> Result<Option<Timestamp>>;
    fn save(&self, timestamp: Timestamp) -> Result<()>;
    /// Forget the checkpoint, forcing a full resync.
    fn clear(&self) -> Result<()>;
}

/// Checkpoint held in memory only.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    value: Mutex<Option<Timestamp>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn load(&self) -> Result<Option<Timestamp>> {
        Ok(*self.value.lock())
    }

    fn save(&self, timestamp: Timestamp) -> Result<()> {
        *self.value.lock() = Some(timestamp);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.value.lock() = None;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointFile {
    last_pulled_at: Timestamp,
}

/// Checkpoint stored as a small JSON file.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a crash mid-write leaves the previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for FileCheckpoint {
    fn load(&self) -> Result<Option<Timestamp>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let file: CheckpointFile = serde_json::from_str(&contents)?;
                Ok(Some(file.last_pulled_at))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, timestamp: Timestamp) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let temp = self.temp_path();
        let json = serde_json::to_string(&CheckpointFile {
            last_pulled_at: timestamp,
        })?;
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
