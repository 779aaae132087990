//! Durable checkpoint storage for resumable transfers.
//!
//! A checkpoint store is a string-keyed map of serialized records. The
//! transfer engine writes one JSON record per resumable job and removes it
//! once the job has been finalized. Stores are injected into the engine so
//! tests can swap the on-disk store for [`MemoryCheckpointStore`].

mod file;
mod memory;

pub use file::{FileCheckpointStore, default_checkpoint_dir};
pub use memory::MemoryCheckpointStore;

/// Errors produced by checkpoint stores.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid checkpoint key: {0}")]
    InvalidKey(String),
}

/// Key-value storage for serialized checkpoint records.
///
/// Implementations must survive process restarts to be useful for
/// resuming, but the engine only relies on read-your-writes within one
/// process. A store performs no cross-process locking: two jobs writing
/// the same key at once is a caller error.
pub trait CheckpointStore: Send + Sync {
    /// Returns the record stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>, CheckpointError>;

    /// Stores `value` under `key`, replacing any previous record.
    fn set(&self, key: &str, value: &str) -> Result<(), CheckpointError>;

    /// Removes the record under `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), CheckpointError>;
}

/// Validates that a checkpoint key can be used as a file name component.
///
/// Rejects empty keys, path separators and parent-directory references.
pub fn validate_key(key: &str) -> Result<(), CheckpointError> {
    if key.is_empty() {
        return Err(CheckpointError::InvalidKey("empty key".into()));
    }
    if key.contains('/') || key.contains('\\') {
        return Err(CheckpointError::InvalidKey(format!(
            "path separator not allowed: {key}"
        )));
    }
    if key == "." || key == ".." || key.contains("..") {
        return Err(CheckpointError::InvalidKey(format!(
            "parent directory reference not allowed: {key}"
        )));
    }
    if key.chars().any(char::is_control) {
        return Err(CheckpointError::InvalidKey(format!(
            "control character not allowed: {key:?}"
        )));
    }
    Ok(())
}
