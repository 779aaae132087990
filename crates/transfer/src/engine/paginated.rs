use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::{JobCancel, TransferEngine, decode};
use crate::TransferError;
use crate::chunked::page_ranges;
use crate::options::PaginatedOptions;
use crate::progress::ProgressTracker;
use crate::semaphore::Semaphore;
use crate::source::ByteSource;
use crate::transport::{Body, HEADER_PAGE_INDEX, HEADER_PAGE_SIZE, TransportRequest};
use crate::types::{TransferResult, TransferStats};
use crate::validation::validate_paginated;

/// Shared state of one paginated call.
struct PageJob<'a> {
    url: &'a str,
    source: &'a dyn ByteSource,
    options: &'a PaginatedOptions,
    cancel: JobCancel,
    tracker: ProgressTracker,
    transferred: AtomicU64,
    total_pages: usize,
}

impl TransferEngine {
    /// Sends `source` as fixed-size pages, one request per page.
    ///
    /// Pages carry `X-Page-Index` and `X-Page-Size`. Each response body is
    /// decoded as `T`; on success `data` holds the decoded pages in page
    /// order regardless of completion order. The first failing page fails
    /// the whole call and no partial data is returned.
    pub async fn paginated_transfer<T>(
        &self,
        url: &str,
        source: Arc<dyn ByteSource>,
        options: PaginatedOptions,
    ) -> TransferResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let mut stats = TransferStats::start();
        if let Err(e) = validate_paginated(url, &options) {
            stats.finish();
            return TransferResult::failed(e, stats);
        }

        let ranges = page_ranges(source.size(), options.page_size);
        let job = PageJob {
            url,
            source: source.as_ref(),
            options: &options,
            cancel: self.job_cancel(None),
            tracker: ProgressTracker::new(),
            transferred: AtomicU64::new(0),
            total_pages: ranges.len(),
        };
        info!(
            url,
            pages = job.total_pages,
            page_size = options.page_size,
            parallel = options.parallel,
            "starting paginated transfer"
        );

        let outcome = if options.parallel {
            self.run_parallel(&job, ranges).await
        } else {
            self.run_serial(&job, ranges).await
        };

        stats.bytes_transferred = job.transferred.load(Ordering::Relaxed);
        stats.finish();
        match outcome {
            Ok(pages) => {
                info!(url, bytes = stats.bytes_transferred, "paginated transfer complete");
                TransferResult::succeeded(pages, stats)
            }
            Err(e) => {
                warn!(url, error = %e, "paginated transfer failed");
                TransferResult::failed(e, stats)
            }
        }
    }

    async fn run_serial<T: DeserializeOwned>(
        &self,
        job: &PageJob<'_>,
        ranges: Vec<Range<u64>>,
    ) -> Result<Vec<T>, TransferError> {
        let mut pages = Vec::with_capacity(ranges.len());
        for (index, range) in ranges.into_iter().enumerate() {
            let body = self.send_page(job, index, range).await?;
            pages.push(decode(body)?);
        }
        Ok(pages)
    }

    /// Starts every page at once, gated by a FIFO semaphore so at most
    /// `max_connections` requests are outstanding and pages are issued in
    /// index order. Results land in a slot per page.
    async fn run_parallel<T: DeserializeOwned>(
        &self,
        job: &PageJob<'_>,
        ranges: Vec<Range<u64>>,
    ) -> Result<Vec<T>, TransferError> {
        let limit = job
            .options
            .max_connections
            .unwrap_or(self.config.max_concurrency)
            .min(job.total_pages)
            .max(1);
        let semaphore = Semaphore::new(limit);
        debug!(limit, pages = job.total_pages, "parallel page window");

        let mut in_flight: FuturesUnordered<_> = ranges
            .into_iter()
            .enumerate()
            .map(|(index, range)| {
                let semaphore = &semaphore;
                async move {
                    let _permit = semaphore.acquire().await;
                    let body = self.send_page(job, index, range).await?;
                    Ok::<_, TransferError>((index, body))
                }
            })
            .collect();

        let mut slots: Vec<Option<T>> = (0..job.total_pages).map(|_| None).collect();
        while let Some(result) = in_flight.next().await {
            let (index, body) = result?;
            slots[index] = Some(decode(body)?);
        }
        drop(in_flight);

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    TransferError::InvalidOptions(format!("page {index} produced no result"))
                })
            })
            .collect()
    }

    async fn send_page(
        &self,
        job: &PageJob<'_>,
        index: usize,
        range: Range<u64>,
    ) -> Result<serde_json::Value, TransferError> {
        let data = job.source.slice(range.start, range.end)?;
        let len = data.len() as u64;
        let request = TransportRequest::post(job.url, Body::Bytes(data))
            .headers(&job.options.headers)
            .header(HEADER_PAGE_INDEX, index.to_string())
            .header(HEADER_PAGE_SIZE, job.options.page_size.to_string());

        let response = self.perform_request(request, &job.cancel).await?;
        let loaded = job.transferred.fetch_add(len, Ordering::Relaxed) + len;
        debug!(index, bytes = len, "page sent");

        if let Some(on_progress) = &job.options.on_progress {
            let mut info = job.tracker.update(loaded, job.source.size());
            info.chunk_index = Some(index);
            info.total_chunks = Some(job.total_pages);
            on_progress(info);
        }
        if let Some(on_page_complete) = &job.options.on_page_complete {
            on_page_complete(index, &response.body);
        }
        Ok(response.body)
    }
}
