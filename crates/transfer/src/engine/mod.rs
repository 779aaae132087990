//! The transfer orchestrator.
//!
//! [`TransferEngine`] drives four strategies on top of an injected
//! [`Transport`], [`CheckpointStore`] and [`Capabilities`]:
//!
//! - **paginated**: fixed-size pages, serial or bounded-parallel
//! - **streaming**: one request whose body is a monitored chunk stream
//! - **compressed**: streaming through a mandatory compression transform
//! - **resumable**: per-chunk requests with a checkpoint flushed after
//!   every chunk, per-chunk retry and a final metadata-only request
//!
//! Only resumable mode retries. Paginated and streaming modes fail the
//! whole call on the first error.

mod paginated;
mod resumable;
mod streaming;

use std::sync::{Arc, Mutex};

use chunkwise_checkpoint::CheckpointStore;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::TransferError;
use crate::config::TransferConfig;
use crate::stream::Capabilities;
use crate::transport::{Transport, TransportRequest, TransportResponse};
use crate::types::ResumableState;

/// Orchestrates chunked transfers over an abstract transport.
pub struct TransferEngine {
    config: TransferConfig,
    transport: Arc<dyn Transport>,
    checkpoints: Arc<dyn CheckpointStore>,
    capabilities: Capabilities,
    cancel: Mutex<CancellationToken>,
}

impl TransferEngine {
    /// Creates an engine. Fails if `config` does not validate.
    pub fn new(
        config: TransferConfig,
        transport: Arc<dyn Transport>,
        checkpoints: Arc<dyn CheckpointStore>,
        capabilities: Capabilities,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            checkpoints,
            capabilities,
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// The engine configuration.
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// The injected capability set.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Aborts every transfer currently running on this engine.
    ///
    /// Transfers started afterwards are unaffected. Resumable jobs stop
    /// before their next chunk and keep their checkpoint.
    pub fn abort(&self) {
        let mut token = self.cancel.lock().unwrap();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Reads the saved state for `key`, if any.
    ///
    /// Absent and malformed records both read as `None`.
    pub fn load_checkpoint(&self, key: &str) -> Option<ResumableState> {
        self.load_state(&self.config.checkpoint_store_key(key))
    }

    /// Deletes the saved state for `key`.
    pub fn clear_checkpoint(&self, key: &str) -> Result<(), TransferError> {
        self.checkpoints
            .remove(&self.config.checkpoint_store_key(key))?;
        Ok(())
    }

    fn job_cancel(&self, caller: Option<CancellationToken>) -> JobCancel {
        JobCancel {
            engine: self.cancel.lock().unwrap().child_token(),
            caller,
        }
    }

    /// Sends one request bounded by the configured timeout and `cancel`.
    ///
    /// Non-2xx responses become [`TransferError::Http`].
    async fn perform_request(
        &self,
        request: TransportRequest,
        cancel: &JobCancel,
    ) -> Result<TransportResponse, TransferError> {
        cancel.check()?;
        let url = request.url.clone();
        let method = request.method;
        let request = request.with_cancel(cancel.token());
        let timeout = self.config.timeout;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Aborted),
            result = tokio::time::timeout(timeout, self.transport.send(request)) => result,
        };

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(TransferError::Timeout { url, after: timeout }),
        };

        if !response.is_success() {
            return Err(TransferError::Http {
                status: response.status,
                method: method.to_string(),
                url,
                message: response.status_text,
            });
        }
        Ok(response)
    }

    fn load_state(&self, store_key: &str) -> Option<ResumableState> {
        let raw = match self.checkpoints.get(store_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %store_key, error = %e, "failed to read checkpoint");
                return None;
            }
        };
        match serde_json::from_str::<ResumableState>(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(key = %store_key, error = %e, "ignoring malformed checkpoint");
                None
            }
        }
    }

    /// Persists `state`. Store failures are logged and otherwise ignored:
    /// a lost checkpoint only costs re-uploading on the next attempt.
    fn save_state(&self, store_key: &str, state: &ResumableState) {
        let result = serde_json::to_string(state)
            .map_err(TransferError::from)
            .and_then(|json| Ok(self.checkpoints.set(store_key, &json)?));
        if let Err(e) = result {
            warn!(key = %store_key, error = %e, "failed to persist checkpoint");
        }
    }

    fn remove_state(&self, store_key: &str) {
        if let Err(e) = self.checkpoints.remove(store_key) {
            warn!(key = %store_key, error = %e, "failed to remove checkpoint");
        }
    }
}

fn decode<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, TransferError> {
    Ok(serde_json::from_value(body)?)
}

/// Cancellation scope of one transfer call: the engine-wide token plus an
/// optional caller token. Either one firing cancels the job.
struct JobCancel {
    engine: CancellationToken,
    caller: Option<CancellationToken>,
}

impl JobCancel {
    fn is_cancelled(&self) -> bool {
        self.engine.is_cancelled() || self.caller.as_ref().is_some_and(|c| c.is_cancelled())
    }

    fn check(&self) -> Result<(), TransferError> {
        if self.is_cancelled() {
            Err(TransferError::Aborted)
        } else {
            Ok(())
        }
    }

    async fn cancelled(&self) {
        match &self.caller {
            Some(caller) => {
                tokio::select! {
                    _ = self.engine.cancelled() => {}
                    _ = caller.cancelled() => {}
                }
            }
            None => self.engine.cancelled().await,
        }
    }

    /// Token handed to the transport and to body streams.
    fn token(&self) -> CancellationToken {
        self.caller
            .clone()
            .unwrap_or_else(|| self.engine.clone())
    }
}
