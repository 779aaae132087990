use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::{JobCancel, TransferEngine, decode};
use crate::TransferError;
use crate::chunked::{file_id_for, is_content_file_id, plan_chunks};
use crate::options::ResumableOptions;
use crate::progress::ProgressTracker;
use crate::source::ByteSource;
use crate::transport::{
    Body, HEADER_CHUNK_INDEX, HEADER_CONTENT_RANGE, HEADER_FILE_ID, HEADER_UPLOAD_COMPLETE,
    TransportRequest,
};
use crate::types::{ChunkInfo, ResumableState, TransferResult, TransferStats};
use crate::validation::validate_resumable;

impl TransferEngine {
    /// Uploads `source` chunk by chunk, persisting progress after each one.
    ///
    /// With `options.checkpoint` set, a compatible saved state under
    /// `options.checkpoint_key` is resumed: already uploaded chunks are
    /// skipped and `on_resume` receives the byte count already done. Each
    /// chunk is retried up to `retry_count` times on retryable errors.
    /// After the last chunk a metadata-only request carrying
    /// `X-Upload-Complete` and `X-File-Id` finalizes the upload; its body
    /// is decoded as `T` and the checkpoint is deleted.
    ///
    /// On failure `on_interrupt` fires and the checkpoint is kept so a
    /// later call with the same key continues where this one stopped.
    pub async fn resumable_transfer<T: DeserializeOwned>(
        &self,
        url: &str,
        source: Arc<dyn ByteSource>,
        options: ResumableOptions,
    ) -> TransferResult<T> {
        let mut stats = TransferStats::start();
        if let Err(e) = validate_resumable(url, &options) {
            stats.finish();
            return TransferResult::failed(e, stats);
        }

        let outcome = self
            .run_resumable::<T>(url, source.as_ref(), &options, &mut stats)
            .await;
        stats.finish();

        match outcome {
            Ok(data) => {
                info!(
                    url,
                    bytes = stats.bytes_transferred,
                    retries = stats.retry_count,
                    "resumable transfer complete"
                );
                TransferResult::succeeded(data, stats)
            }
            Err(e) => {
                warn!(url, key = %options.checkpoint_key, error = %e, "resumable transfer interrupted");
                if let Some(on_interrupt) = &options.on_interrupt {
                    on_interrupt();
                }
                TransferResult::failed(e, stats)
            }
        }
    }

    async fn run_resumable<T: DeserializeOwned>(
        &self,
        url: &str,
        source: &dyn ByteSource,
        options: &ResumableOptions,
        stats: &mut TransferStats,
    ) -> Result<T, TransferError> {
        let store_key = self.config.checkpoint_store_key(&options.checkpoint_key);
        let mut state = self.load_or_create_state(source, options, &store_key);
        let total_chunks = state.chunks.len();
        let cancel = self.job_cancel(None);
        let tracker = ProgressTracker::new();

        let pending = state.pending_chunks();
        info!(
            url,
            file_id = %state.file_id,
            chunks = total_chunks,
            pending = pending.len(),
            "starting resumable transfer"
        );

        for index in pending {
            let uploaded = self
                .upload_chunk_with_retry(url, source, &mut state, index, options, &cancel, stats)
                .await;
            if options.checkpoint {
                self.save_state(&store_key, &state);
            }
            let size = uploaded?;
            stats.bytes_transferred += size;

            if let Some(on_progress) = &options.on_progress {
                let mut info = tracker.update(state.uploaded_bytes, state.total_bytes);
                info.chunk_index = Some(index);
                info.total_chunks = Some(total_chunks);
                on_progress(info);
            }
        }

        let body = self.finalize_upload(url, &state, options, &cancel).await?;
        // The checkpoint only goes once the receiver's answer is usable.
        let data = decode::<T>(body)?;
        if options.checkpoint {
            self.remove_state(&store_key);
        }
        Ok(data)
    }

    /// Restores a saved state that still describes `source`, or plans a
    /// fresh one and persists it.
    fn load_or_create_state(
        &self,
        source: &dyn ByteSource,
        options: &ResumableOptions,
        store_key: &str,
    ) -> ResumableState {
        let file_id = file_id_for(source);

        if options.checkpoint
            && let Some(saved) = self.load_state(store_key)
        {
            if state_matches(&saved, &file_id, source.size()) {
                info!(
                    key = %store_key,
                    uploaded = saved.uploaded_bytes,
                    total = saved.total_bytes,
                    "resuming from checkpoint"
                );
                if let Some(on_resume) = &options.on_resume {
                    on_resume(saved.uploaded_bytes);
                }
                return saved;
            }
            info!(key = %store_key, "discarding checkpoint for a different source");
        }

        let chunks = plan_chunks(source.size(), self.config.chunk_size);
        let state = ResumableState::new(file_id, source.size(), chunks);
        if options.checkpoint {
            self.save_state(store_key, &state);
        }
        state
    }

    /// Uploads one chunk, retrying retryable failures with the configured
    /// delay. Returns the chunk size on success.
    #[allow(clippy::too_many_arguments)]
    async fn upload_chunk_with_retry(
        &self,
        url: &str,
        source: &dyn ByteSource,
        state: &mut ResumableState,
        index: usize,
        options: &ResumableOptions,
        cancel: &JobCancel,
        stats: &mut TransferStats,
    ) -> Result<u64, TransferError> {
        let chunk = state.chunks.get(index).cloned().ok_or_else(|| {
            TransferError::InvalidOptions(format!("chunk {index} missing from state"))
        })?;
        let mut retries = 0u32;

        loop {
            match self.upload_chunk(url, source, &chunk, options, cancel).await {
                Ok(()) => {
                    state.mark_uploaded(index);
                    debug!(index, size = chunk.size, "chunk uploaded");
                    return Ok(chunk.size);
                }
                Err(e) => {
                    state.record_retry(index);
                    if !e.is_retryable() || retries >= self.config.retry_count {
                        return Err(e);
                    }
                    retries += 1;
                    stats.retry_count += 1;
                    let delay = self.config.retry_delay_for(retries);
                    warn!(
                        index,
                        attempt = retries,
                        max = self.config.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "chunk upload failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(TransferError::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn upload_chunk(
        &self,
        url: &str,
        source: &dyn ByteSource,
        chunk: &ChunkInfo,
        options: &ResumableOptions,
        cancel: &JobCancel,
    ) -> Result<(), TransferError> {
        let data = source.slice(chunk.start, chunk.end)?;
        let request = TransportRequest::post(url, Body::Bytes(data))
            .headers(&options.headers)
            .header(HEADER_CONTENT_RANGE, chunk.content_range())
            .header(HEADER_CHUNK_INDEX, chunk.index.to_string());
        self.perform_request(request, cancel).await?;
        Ok(())
    }

    async fn finalize_upload(
        &self,
        url: &str,
        state: &ResumableState,
        options: &ResumableOptions,
        cancel: &JobCancel,
    ) -> Result<serde_json::Value, TransferError> {
        let request = TransportRequest::post(url, Body::Empty)
            .headers(&options.headers)
            .header(HEADER_UPLOAD_COMPLETE, "true")
            .header(HEADER_FILE_ID, state.file_id.clone());
        let response = self.perform_request(request, cancel).await?;
        debug!(file_id = %state.file_id, "upload finalized");
        Ok(response.body)
    }
}

/// A saved state is reusable if it is well formed, covers a source of the
/// same size and, when both ids come from content, names the same content.
fn state_matches(saved: &ResumableState, file_id: &str, size: u64) -> bool {
    if saved.total_bytes != size || !saved.is_consistent() {
        return false;
    }
    if is_content_file_id(&saved.file_id) && is_content_file_id(file_id) {
        return saved.file_id == file_id;
    }
    true
}
