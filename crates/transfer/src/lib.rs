//! Chunked, resumable data transfer over an abstract transport.
//!
//! A [`TransferEngine`] moves a [`ByteSource`] to a URL in one of four
//! ways: paginated (serial or bounded-parallel pages), streaming,
//! compressed streaming, or resumable chunk upload with checkpoints kept
//! in a [`chunkwise_checkpoint::CheckpointStore`]. The network itself is
//! behind the [`Transport`] trait and optional codecs behind
//! [`Capabilities`], so the engine runs the same against a real HTTP
//! client or an in-memory mock.

mod chunked;
mod config;
mod engine;
mod error;
mod options;
mod progress;
mod semaphore;
mod source;
mod stream;
mod transport;
mod types;
mod validation;

pub use chunked::{
    FILE_ID_LEN, RANDOM_FILE_ID_PREFIX, checksum_bytes, file_id_for, is_content_file_id,
    page_ranges, piece_count, plan_chunks,
};
pub use config::{DEFAULT_CHECKPOINT_PREFIX, TransferConfig};
pub use engine::TransferEngine;
pub use error::TransferError;
pub use options::{
    CompressedOptions, DEFAULT_CHECKPOINT_KEY, InterruptCallback, PageCompleteCallback,
    PaginatedOptions, ProgressCallback, ResumableOptions, ResumeCallback, StreamOptions,
};
pub use progress::{ProgressTracker, percentage, progress_info};
pub use semaphore::{Semaphore, SemaphorePermit};
pub use source::{ByteSource, FileSource};
pub use stream::{
    Capabilities, ChunkStream, CompressionAlgorithm, CompressionTransform, binary_to_stream,
    cancellable, monitor,
};
pub use transport::{
    Body, HEADER_CHUNK_INDEX, HEADER_CONTENT_ENCODING, HEADER_CONTENT_RANGE, HEADER_CONTENT_TYPE,
    HEADER_FILE_ID, HEADER_PAGE_INDEX, HEADER_PAGE_SIZE, HEADER_TRANSFER_ENCODING,
    HEADER_UPLOAD_COMPLETE, Method, OCTET_STREAM, Transport, TransportRequest, TransportResponse,
};
pub use types::{
    ChunkInfo, ProgressInfo, ResumableState, TransferResult, TransferStats, calculate_speed,
    now_millis,
};
pub use validation::{validate_paginated, validate_resumable, validate_stream, validate_url};

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;
