//! On-disk checkpoint store: one JSON file per key.
//!
//! Records are written to a temporary file in the same directory and
//! renamed over the target, so a crash mid-write leaves either the old
//! record or the new one, never a truncated file.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{CheckpointError, CheckpointStore, validate_key};

/// Records larger than this are treated as corrupt and ignored.
pub const MAX_RECORD_SIZE: u64 = 16 * 1024 * 1024;

/// File extension for checkpoint records.
const RECORD_EXTENSION: &str = "json";

/// Checkpoint store backed by a directory of JSON files.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Creates a store in [`default_checkpoint_dir`].
    pub fn open_default() -> Result<Self, CheckpointError> {
        let dir = default_checkpoint_dir().ok_or_else(|| {
            CheckpointError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no config directory available",
            ))
        })?;
        Self::new(dir)
    }

    /// Directory holding the records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record file for `key`.
    pub fn record_path(&self, key: &str) -> Result<PathBuf, CheckpointError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.{RECORD_EXTENSION}")))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self, key: &str) -> Result<Option<String>, CheckpointError> {
        let path = self.record_path(key)?;
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if metadata.len() > MAX_RECORD_SIZE {
            debug!(path = %path.display(), size = metadata.len(), "checkpoint record too large, ignoring");
            return Ok(None);
        }
        match std::fs::read_to_string(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CheckpointError> {
        let path = self.record_path(key)?;
        std::fs::create_dir_all(&self.dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| CheckpointError::Io(e.error))?;

        debug!(path = %path.display(), bytes = value.len(), "checkpoint persisted");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CheckpointError> {
        let path = self.record_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "checkpoint removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Returns the default checkpoint directory
/// (`<config dir>/chunkwise/checkpoints`).
pub fn default_checkpoint_dir() -> Option<PathBuf> {
    config_dir().map(|d| d.join("chunkwise").join("checkpoints"))
}

/// Returns the platform-specific config directory.
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
