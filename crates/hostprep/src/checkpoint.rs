//! Durable provisioning progress.
//!
//! The checkpoint is the only mutable state that survives a restart. It is
//! read once when the process starts and written before every restart, on
//! abort and on completion. Writes go to a temporary sibling file which is
//! synced and then renamed over the record, so a power loss leaves either
//! the old or the new record on disk, never a torn one.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CheckpointError;

/// Persisted workflow cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Index of the next step to execute.
    pub next_step_index: usize,
    /// Completed passes of the update step at the cursor.
    #[serde(default)]
    pub update_retry_count: u32,
    /// Failure that aborted the last run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// RFC 3339 timestamp of the last write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Checkpoint {
    /// A checkpoint positioned at `index` with no retry history.
    #[must_use]
    pub fn at(index: usize) -> Self {
        Self {
            next_step_index: index,
            ..Self::default()
        }
    }

    /// Whether the cursor is past the last of `total` steps.
    #[must_use]
    pub fn is_complete(&self, total: usize) -> bool {
        self.next_step_index >= total
    }
}

/// Storage for the checkpoint record.
pub trait CheckpointStore {
    /// Read the checkpoint. `Ok(None)` means no run has started yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or parsed.
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Durably replace the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Remove the checkpoint. Returns whether a record existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be removed.
    fn clear(&self) -> Result<bool, CheckpointError>;

    /// Where the record lives, for diagnostics.
    fn location(&self) -> String;

    /// Read the checkpoint, creating and persisting a fresh one if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or the initial record
    /// cannot be written.
    fn load_or_init(&self) -> Result<Checkpoint, CheckpointError> {
        if let Some(existing) = self.load()? {
            return Ok(existing);
        }
        let fresh = Checkpoint::default();
        self.save(&fresh)?;
        info!(location = %self.location(), "Created new checkpoint");
        Ok(fresh)
    }
}

/// JSON checkpoint at a fixed path.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store for the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the checkpoint file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_err(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let checkpoint: Checkpoint =
            serde_json::from_str(&content).map_err(|source| CheckpointError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        debug!(
            next_step_index = checkpoint.next_step_index,
            update_retry_count = checkpoint.update_retry_count,
            "Loaded checkpoint"
        );
        Ok(Some(checkpoint))
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut record = checkpoint.clone();
        record.updated_at = Some(chrono::Utc::now().to_rfc3339());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.write_err(e))?;
            }
        }

        let content = serde_json::to_vec_pretty(&record).map_err(|source| {
            CheckpointError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;

        let temp = self.temp_path();
        let mut file = File::create(&temp).map_err(|e| self.write_err(e))?;
        file.write_all(&content).map_err(|e| self.write_err(e))?;
        file.sync_all().map_err(|e| self.write_err(e))?;
        drop(file);

        fs::rename(&temp, &self.path).map_err(|e| self.write_err(e))?;

        debug!(
            next_step_index = record.next_step_index,
            update_retry_count = record.update_retry_count,
            "Saved checkpoint"
        );
        Ok(())
    }

    fn clear(&self) -> Result<bool, CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.write_err(e)),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
