//! Per-call options and callback types for each transfer mode.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::stream::CompressionAlgorithm;
use crate::types::ProgressInfo;

/// Default checkpoint key for resumable transfers.
pub const DEFAULT_CHECKPOINT_KEY: &str = "default";

/// Called with each progress snapshot.
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;
/// Called with a page index and that page's decoded response.
pub type PageCompleteCallback = Arc<dyn Fn(usize, &serde_json::Value) + Send + Sync>;
/// Called when a resumable job gives up.
pub type InterruptCallback = Arc<dyn Fn() + Send + Sync>;
/// Called with the already-uploaded byte count when a job resumes.
pub type ResumeCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Options for [`TransferEngine::paginated_transfer`](crate::TransferEngine::paginated_transfer).
#[derive(Clone, Default)]
pub struct PaginatedOptions {
    pub page_size: u64,
    /// Send pages concurrently instead of strictly in order.
    pub parallel: bool,
    /// In-flight limit for parallel mode; defaults to the engine's
    /// `max_concurrency`.
    pub max_connections: Option<usize>,
    pub headers: BTreeMap<String, String>,
    pub on_progress: Option<ProgressCallback>,
    pub on_page_complete: Option<PageCompleteCallback>,
}

impl PaginatedOptions {
    /// Serial transfer with `page_size`-byte pages.
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    /// Switches to parallel mode with at most `max_connections` in flight.
    pub fn parallel(mut self, max_connections: usize) -> Self {
        self.parallel = true;
        self.max_connections = Some(max_connections);
        self
    }

    pub fn on_progress(mut self, f: impl Fn(ProgressInfo) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_page_complete(
        mut self,
        f: impl Fn(usize, &serde_json::Value) + Send + Sync + 'static,
    ) -> Self {
        self.on_page_complete = Some(Arc::new(f));
        self
    }
}

/// Options for [`TransferEngine::stream_transfer`](crate::TransferEngine::stream_transfer).
#[derive(Clone, Default)]
pub struct StreamOptions {
    pub chunk_size: u64,
    /// Gzip the stream before sending.
    pub enable_compression: bool,
    pub headers: BTreeMap<String, String>,
    pub on_progress: Option<ProgressCallback>,
    /// Aborts the in-flight request when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl StreamOptions {
    pub fn new(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            ..Self::default()
        }
    }

    pub fn on_progress(mut self, f: impl Fn(ProgressInfo) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Options for [`TransferEngine::compressed_transfer`](crate::TransferEngine::compressed_transfer).
#[derive(Clone)]
pub struct CompressedOptions {
    pub algorithm: CompressionAlgorithm,
    /// Source chunk size; defaults to the engine's `chunk_size`.
    pub chunk_size: Option<u64>,
    pub headers: BTreeMap<String, String>,
    pub on_progress: Option<ProgressCallback>,
    pub cancel: Option<CancellationToken>,
}

impl CompressedOptions {
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        Self {
            algorithm,
            chunk_size: None,
            headers: BTreeMap::new(),
            on_progress: None,
            cancel: None,
        }
    }

    pub fn on_progress(mut self, f: impl Fn(ProgressInfo) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Options for [`TransferEngine::resumable_transfer`](crate::TransferEngine::resumable_transfer).
#[derive(Clone)]
pub struct ResumableOptions {
    /// Persist progress after every chunk and resume from saved state.
    pub checkpoint: bool,
    /// Identifies the job in the checkpoint store.
    pub checkpoint_key: String,
    pub headers: BTreeMap<String, String>,
    pub on_progress: Option<ProgressCallback>,
    pub on_interrupt: Option<InterruptCallback>,
    pub on_resume: Option<ResumeCallback>,
}

impl Default for ResumableOptions {
    fn default() -> Self {
        Self {
            checkpoint: true,
            checkpoint_key: DEFAULT_CHECKPOINT_KEY.to_string(),
            headers: BTreeMap::new(),
            on_progress: None,
            on_interrupt: None,
            on_resume: None,
        }
    }
}

impl ResumableOptions {
    /// Checkpointed transfer stored under `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            checkpoint_key: key.into(),
            ..Self::default()
        }
    }

    pub fn on_progress(mut self, f: impl Fn(ProgressInfo) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_interrupt(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_interrupt = Some(Arc::new(f));
        self
    }

    pub fn on_resume(mut self, f: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_resume = Some(Arc::new(f));
        self
    }
}
