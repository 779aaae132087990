//! Data model shared by the transfer modes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::TransferError;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One contiguous byte range of a resumable upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkInfo {
    pub index: usize,
    /// First byte (inclusive).
    pub start: u64,
    /// Last byte (exclusive).
    pub end: u64,
    pub size: u64,
    pub uploaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

impl ChunkInfo {
    /// Creates a pending chunk covering `[start, end)`.
    pub fn new(index: usize, start: u64, end: u64) -> Self {
        Self {
            index,
            start,
            end,
            size: end - start,
            uploaded: false,
            uploaded_at: None,
            retry_count: None,
        }
    }

    /// Value of the `Content-Range` header for this chunk.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end - 1, self.size)
    }
}

/// Persisted progress of one resumable upload (the checkpoint record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumableState {
    pub file_id: String,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub chunks: Vec<ChunkInfo>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ResumableState {
    /// Creates a fresh state with every chunk pending.
    pub fn new(file_id: String, total_bytes: u64, chunks: Vec<ChunkInfo>) -> Self {
        let now = now_millis();
        Self {
            file_id,
            uploaded_bytes: 0,
            total_bytes,
            chunks,
            created_at: now,
            updated_at: now,
        }
    }

    /// Indices of chunks not yet uploaded, ascending.
    pub fn pending_chunks(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .filter(|c| !c.uploaded)
            .map(|c| c.index)
            .collect()
    }

    /// Returns `true` once every chunk is uploaded.
    pub fn is_complete(&self) -> bool {
        self.chunks.iter().all(|c| c.uploaded)
    }

    /// Marks chunk `index` as uploaded and accounts its bytes.
    ///
    /// Marking an already-uploaded chunk is a no-op so `uploaded_bytes`
    /// can never double-count.
    pub fn mark_uploaded(&mut self, index: usize) {
        let now = now_millis();
        if let Some(chunk) = self.chunks.get_mut(index)
            && !chunk.uploaded
        {
            chunk.uploaded = true;
            chunk.uploaded_at = Some(now);
            self.uploaded_bytes += chunk.size;
            self.updated_at = now;
        }
    }

    /// Bumps the recorded failure count of chunk `index`.
    pub fn record_retry(&mut self, index: usize) {
        if let Some(chunk) = self.chunks.get_mut(index) {
            chunk.retry_count = Some(chunk.retry_count.unwrap_or(0) + 1);
            self.updated_at = now_millis();
        }
    }

    /// Checks the structural invariants of a state read back from storage.
    ///
    /// Chunks must be indexed `0..n` in order, partition `[0, total_bytes)`
    /// without gaps or overlaps, and `uploaded_bytes` must equal the size
    /// of the uploaded chunks.
    pub fn is_consistent(&self) -> bool {
        let mut cursor = 0u64;
        let mut uploaded = 0u64;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.index != i
                || chunk.start != cursor
                || chunk.start >= chunk.end
                || chunk.size != chunk.end - chunk.start
            {
                return false;
            }
            if chunk.uploaded {
                uploaded += chunk.size;
            }
            cursor = chunk.end;
        }
        cursor == self.total_bytes && uploaded == self.uploaded_bytes
    }
}

/// Timing and volume figures for one transfer call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStats {
    /// Wall-clock start, Unix milliseconds.
    pub start_time: i64,
    /// Wall-clock end, Unix milliseconds (`>= start_time`).
    pub end_time: i64,
    #[serde(serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
    pub bytes_transferred: u64,
    /// Bytes per second over `duration`; 0 when the duration is zero.
    pub average_speed: f64,
    pub retry_count: u32,
}

impl TransferStats {
    /// Starts a stats record at the current instant.
    pub fn start() -> Self {
        let now = now_millis();
        Self {
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            bytes_transferred: 0,
            average_speed: 0.0,
            retry_count: 0,
        }
    }

    /// Stamps the end time and derives duration and average speed.
    pub fn finish(&mut self) {
        self.end_time = now_millis().max(self.start_time);
        let ms = (self.end_time - self.start_time) as u64;
        self.duration = Duration::from_millis(ms);
        self.average_speed = calculate_speed(self.bytes_transferred, self.duration);
    }
}

/// Bytes per second, guarding against a zero duration.
pub fn calculate_speed(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / secs
}

fn serialize_duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// A progress notification passed to `on_progress`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    pub loaded: u64,
    /// Total bytes, 0 when unknown.
    pub total: u64,
    /// `round(loaded / total * 100)`, 0 when the total is unknown.
    pub percentage: u8,
    /// Bytes per second since the previous notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_time: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
}

/// Uniform outcome of every transfer method.
///
/// `stats` is populated on both paths; `data` is only present on success.
#[derive(Debug)]
pub struct TransferResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<TransferError>,
    pub stats: TransferStats,
}

impl<T> TransferResult<T> {
    /// A successful result.
    pub fn succeeded(data: T, stats: TransferStats) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            stats,
        }
    }

    /// A failed result carrying the causal error.
    pub fn failed(error: TransferError, stats: TransferStats) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            stats,
        }
    }

    /// Converts into a plain `Result`, dropping the stats.
    pub fn into_result(self) -> Result<T, TransferError> {
        match (self.data, self.error) {
            (Some(data), None) if self.success => Ok(data),
            (_, Some(err)) => Err(err),
            _ => Err(TransferError::InvalidOptions(
                "transfer result carries neither data nor error".into(),
            )),
        }
    }
}
