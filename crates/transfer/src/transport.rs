//! Transport abstraction: one request/response exchange per call.
//!
//! The engine never talks HTTP itself. Callers provide a [`Transport`]
//! implementation on top of whatever client they use; tests use mocks.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use crate::TransferError;
use crate::stream::ChunkStream;

/// Header carrying the page index of a paginated request.
pub const HEADER_PAGE_INDEX: &str = "X-Page-Index";
/// Header carrying the page size of a paginated request.
pub const HEADER_PAGE_SIZE: &str = "X-Page-Size";
/// Header carrying the chunk index of a resumable chunk request.
pub const HEADER_CHUNK_INDEX: &str = "X-Chunk-Index";
/// Header flagging the finalize request of a resumable upload.
pub const HEADER_UPLOAD_COMPLETE: &str = "X-Upload-Complete";
/// Header carrying the file id on the finalize request.
pub const HEADER_FILE_ID: &str = "X-File-Id";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_CONTENT_RANGE: &str = "Content-Range";
pub const HEADER_CONTENT_ENCODING: &str = "Content-Encoding";
pub const HEADER_TRANSFER_ENCODING: &str = "Transfer-Encoding";

/// MIME type for raw binary bodies.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Request method. Every engine request is a POST.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Method {
    #[default]
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body.
pub enum Body {
    /// No body (metadata-only requests).
    Empty,
    /// A contiguous byte range of the source.
    Bytes(Vec<u8>),
    /// A lazily produced chunk sequence.
    Stream(ChunkStream),
}

impl Body {
    /// Size of an in-memory body; `None` for streams.
    pub fn len(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Bytes(b) => Some(b.len() as u64),
            Body::Stream(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// One outgoing request.
#[derive(Debug)]
pub struct TransportRequest {
    pub url: String,
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub body: Body,
    /// Fires when the caller or the engine gives up on this request.
    /// Implementations should stop sending as soon as it is cancelled.
    pub cancel: Option<CancellationToken>,
}

impl TransportRequest {
    /// A POST to `url` with `body` and no headers.
    pub fn post(url: &str, body: Body) -> Self {
        Self {
            url: url.to_string(),
            method: Method::Post,
            headers: BTreeMap::new(),
            body,
            cancel: None,
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    /// Merges caller-supplied headers. Existing entries are overwritten.
    pub fn headers(mut self, extra: &BTreeMap<String, String>) -> Self {
        for (k, v) in extra {
            self.headers.insert(k.clone(), v.clone());
        }
        self
    }

    /// Attaches a cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Response to one request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    /// Decoded JSON body (`Null` when the response had none).
    pub body: serde_json::Value,
}

impl TransportResponse {
    /// A 200 response with a JSON body.
    pub fn ok(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            status_text: "OK".into(),
            headers: BTreeMap::new(),
            body,
        }
    }

    /// A response with `status` and no body.
    pub fn with_status(status: u16, status_text: &str) -> Self {
        Self {
            status,
            status_text: status_text.to_string(),
            headers: BTreeMap::new(),
            body: serde_json::Value::Null,
        }
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs one request/response exchange.
///
/// Implementations return `Err(TransferError::Network)` for failures
/// without a response. Non-2xx responses may be returned as `Ok`; the
/// engine turns them into [`TransferError::Http`].
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: TransportRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransferError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_merges_headers() {
        let mut custom = BTreeMap::new();
        custom.insert("Authorization".to_string(), "Bearer t".to_string());
        custom.insert(HEADER_PAGE_INDEX.to_string(), "overridden".to_string());

        let req = TransportRequest::post("https://example.test/up", Body::Bytes(vec![1, 2, 3]))
            .header(HEADER_PAGE_INDEX, "4")
            .headers(&custom);

        assert_eq!(req.method, Method::Post);
        assert_eq!(req.headers["Authorization"], "Bearer t");
        assert_eq!(req.headers[HEADER_PAGE_INDEX], "overridden");
        assert_eq!(req.body.len(), Some(3));
        assert!(req.cancel.is_none());
    }

    #[test]
    fn body_lengths() {
        assert!(Body::Empty.is_empty());
        assert_eq!(Body::Bytes(vec![0; 8]).len(), Some(8));
        let stream = crate::stream::binary_to_stream(std::sync::Arc::new(vec![0u8; 4]), 2);
        assert_eq!(Body::Stream(stream).len(), None);
    }

    #[test]
    fn response_success_range() {
        assert!(TransportResponse::ok(serde_json::json!({})).is_success());
        assert!(TransportResponse::with_status(204, "No Content").is_success());
        assert!(!TransportResponse::with_status(404, "Not Found").is_success());
        assert!(!TransportResponse::with_status(500, "Internal Server Error").is_success());
    }

    #[test]
    fn method_display() {
        assert_eq!(Method::Post.to_string(), "POST");
        assert_eq!(TransportRequest::post("https://a.test", Body::Empty).method, Method::Post);
    }
}
