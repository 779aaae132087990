use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::{JobCancel, TransferEngine, decode};
use crate::TransferError;
use crate::options::{CompressedOptions, ProgressCallback, StreamOptions};
use crate::progress::ProgressTracker;
use crate::source::ByteSource;
use crate::stream::{ChunkStream, CompressionAlgorithm, binary_to_stream, cancellable, monitor};
use crate::transport::{
    Body, HEADER_CONTENT_ENCODING, HEADER_CONTENT_TYPE, HEADER_TRANSFER_ENCODING, OCTET_STREAM,
    TransportRequest,
};
use crate::types::{TransferResult, TransferStats};
use crate::validation::{validate_stream, validate_url};

/// Where compression sits relative to the progress monitor.
enum Compression {
    None,
    /// Compress after monitoring: progress counts raw source bytes.
    AfterMonitor(CompressionAlgorithm),
    /// Input is already compressed: progress counts compressed bytes.
    Upstream(CompressionAlgorithm),
}

impl TransferEngine {
    /// Sends `source` as a single request with a chunked streaming body.
    ///
    /// Progress is reported per chunk against the source size. With
    /// `enable_compression` the monitored stream is gzipped before it
    /// leaves, which requires a compression capability. No retry.
    pub async fn stream_transfer<T: DeserializeOwned>(
        &self,
        url: &str,
        source: Arc<dyn ByteSource>,
        options: StreamOptions,
    ) -> TransferResult<T> {
        let stats = TransferStats::start();
        let transferred = Arc::new(AtomicU64::new(0));
        let outcome = match validate_stream(url, &options) {
            Ok(()) => {
                let total = source.size();
                let input = binary_to_stream(source, options.chunk_size);
                let compression = if options.enable_compression {
                    Compression::AfterMonitor(CompressionAlgorithm::Gzip)
                } else {
                    Compression::None
                };
                let cancel = self.job_cancel(options.cancel.clone());
                self.send_stream(
                    url,
                    input,
                    compression,
                    &options.headers,
                    options.on_progress.clone(),
                    total,
                    &cancel,
                    &transferred,
                )
                .await
            }
            Err(e) => Err(e),
        };
        Self::finish_stream(url, outcome, finish_stats(stats, &transferred))
    }

    /// Sends `source` compressed with `options.algorithm` as a single
    /// streaming request with `Content-Encoding` set.
    ///
    /// Fails before any I/O if no compression capability is available.
    /// Progress counts compressed bytes; the total is unknown.
    pub async fn compressed_transfer<T: DeserializeOwned>(
        &self,
        url: &str,
        source: Arc<dyn ByteSource>,
        options: CompressedOptions,
    ) -> TransferResult<T> {
        let stats = TransferStats::start();
        let transferred = Arc::new(AtomicU64::new(0));
        let outcome = self
            .run_compressed(url, source, &options, &transferred)
            .await;
        Self::finish_stream(url, outcome, finish_stats(stats, &transferred))
    }

    async fn run_compressed(
        &self,
        url: &str,
        source: Arc<dyn ByteSource>,
        options: &CompressedOptions,
        transferred: &Arc<AtomicU64>,
    ) -> Result<serde_json::Value, TransferError> {
        let transform = self.capabilities.compression()?;
        validate_url(url)?;
        let chunk_size = options.chunk_size.unwrap_or(self.config.chunk_size);
        if chunk_size == 0 {
            return Err(TransferError::InvalidOptions("chunk size must be > 0".into()));
        }

        let compressed = transform.compress(options.algorithm, binary_to_stream(source, chunk_size))?;
        let cancel = self.job_cancel(options.cancel.clone());
        self.send_stream(
            url,
            compressed,
            Compression::Upstream(options.algorithm),
            &options.headers,
            options.on_progress.clone(),
            0,
            &cancel,
            transferred,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_stream(
        &self,
        url: &str,
        input: ChunkStream,
        compression: Compression,
        headers: &BTreeMap<String, String>,
        on_progress: Option<ProgressCallback>,
        total: u64,
        cancel: &JobCancel,
        transferred: &Arc<AtomicU64>,
    ) -> Result<serde_json::Value, TransferError> {
        info!(url, total, "starting stream transfer");
        let tracker = ProgressTracker::new();
        let counter = Arc::clone(transferred);
        let mut body = monitor(input, move |index, chunk| {
            let len = chunk.len() as u64;
            let loaded = counter.fetch_add(len, Ordering::Relaxed) + len;
            if let Some(on_progress) = &on_progress {
                let mut info = tracker.update(loaded, total);
                info.chunk_index = Some(index);
                on_progress(info);
            }
        });

        let mut request = TransportRequest::post(url, Body::Empty).headers(headers);
        match compression {
            Compression::None => {}
            Compression::AfterMonitor(algorithm) => {
                body = self.capabilities.compression()?.compress(algorithm, body)?;
                request = request.header(HEADER_CONTENT_ENCODING, algorithm.as_str());
            }
            Compression::Upstream(algorithm) => {
                request = request.header(HEADER_CONTENT_ENCODING, algorithm.as_str());
            }
        }
        request.body = Body::Stream(cancellable(body, cancel.token()));
        let request = request
            .header(HEADER_CONTENT_TYPE, OCTET_STREAM)
            .header(HEADER_TRANSFER_ENCODING, "chunked");

        let response = self.perform_request(request, cancel).await?;
        Ok(response.body)
    }

    fn finish_stream<T: DeserializeOwned>(
        url: &str,
        outcome: Result<serde_json::Value, TransferError>,
        stats: TransferStats,
    ) -> TransferResult<T> {
        match outcome.and_then(decode::<T>) {
            Ok(data) => {
                info!(url, bytes = stats.bytes_transferred, "stream transfer complete");
                TransferResult::succeeded(data, stats)
            }
            Err(e) => {
                warn!(url, error = %e, "stream transfer failed");
                TransferResult::failed(e, stats)
            }
        }
    }
}

fn finish_stats(mut stats: TransferStats, transferred: &AtomicU64) -> TransferStats {
    stats.bytes_transferred = transferred.load(Ordering::Relaxed);
    stats.finish();
    stats
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use chunkwise_checkpoint::MemoryCheckpointStore;
    use futures_util::StreamExt;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::TransferConfig;
    use crate::engine::test_support::*;
    use crate::stream::{Capabilities, CompressionTransform};

    /// "Compresses" by tagging each chunk with the algorithm name.
    struct TaggingTransform;

    impl CompressionTransform for TaggingTransform {
        fn compress(
            &self,
            algorithm: CompressionAlgorithm,
            input: ChunkStream,
        ) -> Result<ChunkStream, TransferError> {
            let tag = algorithm.as_str().as_bytes().to_vec();
            Ok(Box::pin(input.map(move |chunk| {
                chunk.map(|mut c| {
                    c.splice(0..0, tag.iter().copied());
                    c
                })
            })))
        }
    }

    fn engine(transport: Arc<MockTransport>, capabilities: Capabilities) -> TransferEngine {
        engine_with(
            transport,
            Arc::new(MemoryCheckpointStore::new()),
            TransferConfig {
                timeout: Duration::from_secs(5),
                ..TransferConfig::default()
            },
            capabilities,
        )
    }

    fn source(len: usize) -> Arc<dyn ByteSource> {
        Arc::new(vec![7u8; len])
    }

    #[tokio::test]
    async fn stream_sends_one_request() {
        let transport = Arc::new(MockTransport::new());
        transport.push(Reply::Ok(serde_json::json!({ "id": 9 })));
        let engine = engine(Arc::clone(&transport), Capabilities::none());
        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&progress);

        let result = engine
            .stream_transfer::<serde_json::Value>(
                "https://a.test/stream",
                source(2500),
                StreamOptions::new(1000).on_progress(move |p| seen.lock().unwrap().push(p)),
            )
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.data.unwrap()["id"], 9);
        assert_eq!(result.stats.bytes_transferred, 2500);

        let recorded = transport.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].body.len(), 2500);
        assert_eq!(recorded[0].headers[HEADER_CONTENT_TYPE], OCTET_STREAM);
        assert_eq!(recorded[0].headers[HEADER_TRANSFER_ENCODING], "chunked");
        assert!(!recorded[0].headers.contains_key(HEADER_CONTENT_ENCODING));

        let progress = progress.lock().unwrap();
        let loaded: Vec<_> = progress.iter().map(|p| p.loaded).collect();
        assert_eq!(loaded, vec![1000, 2000, 2500]);
        assert_eq!(progress.last().unwrap().percentage, 100);
    }

    #[tokio::test]
    async fn engine_headers_override_caller_headers() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine(Arc::clone(&transport), Capabilities::none());
        let mut options = StreamOptions::new(100);
        options
            .headers
            .insert(HEADER_CONTENT_TYPE.to_string(), "text/plain".to_string());
        options
            .headers
            .insert("Authorization".to_string(), "Bearer t".to_string());

        let result = engine
            .stream_transfer::<serde_json::Value>("https://a.test/stream", source(10), options)
            .await;

        assert!(result.success);
        let headers = &transport.recorded()[0].headers;
        assert_eq!(headers[HEADER_CONTENT_TYPE], OCTET_STREAM);
        assert_eq!(headers["Authorization"], "Bearer t");
    }

    #[tokio::test]
    async fn stream_compression_requires_capability() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine(Arc::clone(&transport), Capabilities::none());
        let mut options = StreamOptions::new(100);
        options.enable_compression = true;

        let result = engine
            .stream_transfer::<serde_json::Value>("https://a.test/stream", source(10), options)
            .await;

        assert!(matches!(result.error, Some(TransferError::Capability(_))));
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn stream_compression_counts_raw_bytes() {
        let transport = Arc::new(MockTransport::new());
        let capabilities = Capabilities::none().with_compression(Arc::new(TaggingTransform));
        let engine = engine(Arc::clone(&transport), capabilities);
        let mut options = StreamOptions::new(100);
        options.enable_compression = true;

        let result = engine
            .stream_transfer::<serde_json::Value>("https://a.test/stream", source(250), options)
            .await;

        assert!(result.success);
        assert_eq!(result.stats.bytes_transferred, 250);
        let recorded = &transport.recorded()[0];
        assert_eq!(recorded.body.len(), 250 + 3 * 4);
        assert_eq!(recorded.headers[HEADER_CONTENT_ENCODING], "gzip");
    }

    #[tokio::test]
    async fn compressed_without_capability_fails_before_io() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine(Arc::clone(&transport), Capabilities::none());

        let result = engine
            .compressed_transfer::<serde_json::Value>(
                "https://a.test/c",
                source(10),
                CompressedOptions::new(CompressionAlgorithm::Gzip),
            )
            .await;

        assert!(!result.success);
        assert!(matches!(result.error, Some(TransferError::Capability(_))));
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn compressed_sets_encoding_and_counts_compressed_bytes() {
        let transport = Arc::new(MockTransport::new());
        let capabilities = Capabilities::none().with_compression(Arc::new(TaggingTransform));
        let engine = engine(Arc::clone(&transport), capabilities);
        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&progress);

        let mut options = CompressedOptions::new(CompressionAlgorithm::Deflate)
            .on_progress(move |p| seen.lock().unwrap().push(p));
        options.chunk_size = Some(100);
        let result = engine
            .compressed_transfer::<serde_json::Value>("https://a.test/c", source(200), options)
            .await;

        assert!(result.success);
        // Two chunks, each tagged with "deflate".
        assert_eq!(result.stats.bytes_transferred, 2 * (100 + 7));
        let headers = &transport.recorded()[0].headers;
        assert_eq!(headers[HEADER_CONTENT_ENCODING], "deflate");
        assert_eq!(headers[HEADER_CONTENT_TYPE], OCTET_STREAM);

        let progress = progress.lock().unwrap();
        assert_eq!(progress.len(), 2);
        assert!(progress.iter().all(|p| p.total == 0 && p.percentage == 0));
    }

    #[tokio::test]
    async fn cancelled_stream_is_aborted() {
        let transport = Arc::new(MockTransport::new());
        let engine = engine(Arc::clone(&transport), Capabilities::none());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine
            .stream_transfer::<serde_json::Value>(
                "https://a.test/stream",
                source(100),
                StreamOptions::new(10).with_cancel(cancel),
            )
            .await;

        assert!(matches!(result.error, Some(TransferError::Aborted)));
        assert_eq!(result.stats.bytes_transferred, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_cancel_mid_request_aborts() {
        let transport = Arc::new(MockTransport::new());
        transport.push(Reply::Hang);
        let engine = Arc::new(engine(Arc::clone(&transport), Capabilities::none()));
        let cancel = CancellationToken::new();

        let running = {
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                engine
                    .stream_transfer::<serde_json::Value>(
                        "https://a.test/stream",
                        source(100),
                        StreamOptions::new(10).with_cancel(cancel),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        // The body was fully handed over; the request is waiting on a reply.
        assert_eq!(transport.count(), 1);
        cancel.cancel();

        let result = running.await.unwrap();
        assert!(matches!(result.error, Some(TransferError::Aborted)));
        assert_eq!(result.stats.bytes_transferred, 100);

        // The engine itself stays usable.
        let next = engine
            .stream_transfer::<serde_json::Value>(
                "https://a.test/stream",
                source(10),
                StreamOptions::new(10),
            )
            .await;
        assert!(next.success, "{:?}", next.error);
    }

    #[tokio::test(start_paused = true)]
    async fn engine_abort_stops_hanging_stream() {
        let transport = Arc::new(MockTransport::new());
        transport.push(Reply::Hang);
        let engine = Arc::new(engine(Arc::clone(&transport), Capabilities::none()));

        let running = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .stream_transfer::<serde_json::Value>(
                        "https://a.test/stream",
                        source(100),
                        StreamOptions::new(10),
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.abort();

        let result = running.await.unwrap();
        assert!(matches!(result.error, Some(TransferError::Aborted)));
    }
}
