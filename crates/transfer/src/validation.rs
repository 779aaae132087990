use crate::TransferError;
use crate::options::{PaginatedOptions, ResumableOptions, StreamOptions};

/// Validates a destination URL.
///
/// Rejects:
/// - Empty or whitespace-only URLs
/// - URLs containing control characters (header injection)
pub fn validate_url(url: &str) -> Result<(), TransferError> {
    if url.trim().is_empty() {
        return Err(TransferError::InvalidOptions("empty url".into()));
    }
    if url.chars().any(char::is_control) {
        return Err(TransferError::InvalidOptions(format!(
            "control character in url: {url:?}"
        )));
    }
    Ok(())
}

pub fn validate_paginated(url: &str, options: &PaginatedOptions) -> Result<(), TransferError> {
    validate_url(url)?;
    if options.page_size == 0 {
        return Err(TransferError::InvalidOptions("page size must be > 0".into()));
    }
    if options.max_connections == Some(0) {
        return Err(TransferError::InvalidOptions(
            "max connections must be > 0".into(),
        ));
    }
    Ok(())
}

pub fn validate_stream(url: &str, options: &StreamOptions) -> Result<(), TransferError> {
    validate_url(url)?;
    if options.chunk_size == 0 {
        return Err(TransferError::InvalidOptions(
            "chunk size must be > 0".into(),
        ));
    }
    Ok(())
}

pub fn validate_resumable(url: &str, options: &ResumableOptions) -> Result<(), TransferError> {
    validate_url(url)?;
    if options.checkpoint {
        chunkwise_checkpoint::validate_key(&options.checkpoint_key)?;
    }
    Ok(())
}
