use std::ops::Range;

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::source::ByteSource;
use crate::types::ChunkInfo;

/// Length of a content-derived file id, in hex characters.
pub const FILE_ID_LEN: usize = 16;

/// Prefix marking a randomly generated (not content-derived) file id.
pub const RANDOM_FILE_ID_PREFIX: &str = "r-";

// ---------------------------------------------------------------------------
// Partitioning
// ---------------------------------------------------------------------------

/// Number of `unit`-sized pieces needed to cover `total` bytes.
///
/// Returns 0 for an empty source or a zero unit.
pub fn piece_count(total: u64, unit: u64) -> usize {
    if unit == 0 {
        return 0;
    }
    total.div_ceil(unit) as usize
}

/// Splits `[0, total)` into contiguous ranges of `page_size` bytes.
/// The last range is shorter when `total` is not a multiple.
pub fn page_ranges(total: u64, page_size: u64) -> Vec<Range<u64>> {
    (0..piece_count(total, page_size))
        .map(|i| {
            let start = i as u64 * page_size;
            start..(start + page_size).min(total)
        })
        .collect()
}

/// Builds the chunk plan for a resumable upload of `total` bytes.
pub fn plan_chunks(total: u64, chunk_size: u64) -> Vec<ChunkInfo> {
    page_ranges(total, chunk_size)
        .into_iter()
        .enumerate()
        .map(|(i, r)| ChunkInfo::new(i, r.start, r.end))
        .collect()
}

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Derives the file id of `source`: the first 16 hex chars of its SHA-256.
///
/// Falls back to a random id when the source cannot be hashed; random ids
/// carry [`RANDOM_FILE_ID_PREFIX`] so they are never compared against
/// content on resume.
pub fn file_id_for(source: &dyn ByteSource) -> String {
    match source.compute_hash() {
        Ok(hash) if hash.len() >= FILE_ID_LEN => hash[..FILE_ID_LEN].to_string(),
        Ok(hash) => {
            warn!(len = hash.len(), "source hash too short, using random file id");
            random_file_id()
        }
        Err(e) => {
            warn!(error = %e, "failed to hash source, using random file id");
            random_file_id()
        }
    }
}

/// Returns `true` if `file_id` was derived from content.
pub fn is_content_file_id(file_id: &str) -> bool {
    !file_id.starts_with(RANDOM_FILE_ID_PREFIX)
}

fn random_file_id() -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    format!("{RANDOM_FILE_ID_PREFIX}{}", &simple[..FILE_ID_LEN - RANDOM_FILE_ID_PREFIX.len()])
}
