//! Transfer error taxonomy.

use std::time::Duration;

use chunkwise_checkpoint::CheckpointError;

/// Errors produced by the transfer engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The transport failed before a response was received
    /// (connection refused, reset, DNS failure...).
    #[error("network error: {0}")]
    Network(String),

    /// The receiving side answered with a non-2xx status.
    #[error("HTTP {status} on {method} {url}: {message}")]
    Http {
        status: u16,
        method: String,
        url: String,
        message: String,
    },

    #[error("request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("transfer aborted")]
    Aborted,

    /// A runtime feature required by the transfer mode is missing.
    #[error("capability unavailable: {0}")]
    Capability(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

impl TransferError {
    /// Returns `true` if retrying the same request may succeed.
    ///
    /// Aborts, missing capabilities, bad options and undecodable payloads
    /// fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Network(_)
                | TransferError::Http { .. }
                | TransferError::Timeout { .. }
                | TransferError::Io(_)
        )
    }

    /// Returns `true` for the timeout class.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransferError::Timeout { .. })
    }

    /// HTTP status code, if this is an HTTP error.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransferError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
