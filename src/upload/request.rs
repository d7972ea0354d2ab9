//! Transport-neutral request and response types

use super::UploadError;
use crate::store::ByteStream;
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use http::header::{HeaderMap, CONTENT_TYPE};
use http::StatusCode;

/// Incoming upload: headers plus a streaming body
pub struct UploadRequest {
    headers: HeaderMap,
    body: ByteStream,
}

impl UploadRequest {
    /// Request with a body that is already in memory
    pub fn from_bytes(headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self {
            headers,
            body: stream::once(async move { Ok::<_, std::io::Error>(body) }).boxed(),
        }
    }

    pub fn from_stream<S>(headers: HeaderMap, body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    {
        Self {
            headers,
            body: body.boxed(),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Multipart boundary; anything but `multipart/form-data` with a
    /// boundary is rejected.
    pub fn boundary(&self) -> Result<String, UploadError> {
        let content_type = self.content_type().ok_or(UploadError::BadContentType)?;
        multer::parse_boundary(content_type).map_err(|_| UploadError::BadContentType)
    }

    pub fn into_body(self) -> ByteStream {
        self.body
    }
}

/// Plain-text reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: StatusCode,
    pub body: String,
}

impl UploadResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}
