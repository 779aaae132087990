//! Chunk streams, pass-through monitoring and the compression capability.

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};

use crate::TransferError;
use crate::chunked::page_ranges;
use crate::source::ByteSource;

/// A lazily produced sequence of byte chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransferError>> + Send>>;

/// Turns `source` into a stream of `chunk_size` slices, read on demand.
pub fn binary_to_stream(source: Arc<dyn ByteSource>, chunk_size: u64) -> ChunkStream {
    let ranges = page_ranges(source.size(), chunk_size);
    Box::pin(stream::iter(ranges).map(move |r| source.slice(r.start, r.end)))
}

/// Wraps `input` so `observe` sees every chunk as it passes through.
///
/// `observe` receives the zero-based ordinal and the chunk itself; errors
/// pass through unobserved.
pub fn monitor<F>(input: ChunkStream, mut observe: F) -> ChunkStream
where
    F: FnMut(usize, &[u8]) + Send + 'static,
{
    let mut ordinal = 0usize;
    Box::pin(input.inspect(move |item| {
        if let Ok(chunk) = item {
            observe(ordinal, chunk);
            ordinal += 1;
        }
    }))
}

/// Wraps `input` so it ends with [`TransferError::Aborted`] once `cancel`
/// fires, without pulling any further chunks from the source.
pub fn cancellable(
    input: ChunkStream,
    cancel: tokio_util::sync::CancellationToken,
) -> ChunkStream {
    Box::pin(input.take_until(cancel.clone().cancelled_owned()).chain(
        stream::once(async move { cancel.is_cancelled() })
            .filter_map(|cancelled| async move { cancelled.then_some(Err(TransferError::Aborted)) }),
    ))
}

/// Compression algorithms a transform may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    Gzip,
    Deflate,
}

impl CompressionAlgorithm {
    /// Token used in `Content-Encoding`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionAlgorithm::Gzip => "gzip",
            CompressionAlgorithm::Deflate => "deflate",
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gzip" => Ok(CompressionAlgorithm::Gzip),
            "deflate" => Ok(CompressionAlgorithm::Deflate),
            other => Err(TransferError::InvalidOptions(format!(
                "unsupported compression algorithm: {other}"
            ))),
        }
    }
}

/// A compression codec applied to a chunk stream.
pub trait CompressionTransform: Send + Sync {
    /// Returns `input` compressed with `algorithm`.
    ///
    /// Fails with [`TransferError::Capability`] if the algorithm is not
    /// offered by this transform.
    fn compress(
        &self,
        algorithm: CompressionAlgorithm,
        input: ChunkStream,
    ) -> Result<ChunkStream, TransferError>;
}

/// Runtime capabilities available to the engine.
///
/// Built explicitly by the caller and injected at construction, so tests
/// can describe any environment without global state.
#[derive(Clone, Default)]
pub struct Capabilities {
    compression: Option<Arc<dyn CompressionTransform>>,
}

impl Capabilities {
    /// No optional capabilities.
    pub fn none() -> Self {
        Self::default()
    }

    /// Adds a compression transform.
    pub fn with_compression(mut self, transform: Arc<dyn CompressionTransform>) -> Self {
        self.compression = Some(transform);
        self
    }

    /// Returns `true` if compression transforms are available.
    pub fn supports_compression(&self) -> bool {
        self.compression.is_some()
    }

    /// The compression transform, or a capability error.
    pub fn compression(&self) -> Result<&Arc<dyn CompressionTransform>, TransferError> {
        self.compression.as_ref().ok_or_else(|| {
            TransferError::Capability(
                "compression streams not supported in this environment".into(),
            )
        })
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("compression", &self.supports_compression())
            .finish()
    }
}
