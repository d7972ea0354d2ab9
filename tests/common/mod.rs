//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use formdrop::store::{ByteStream, ObjectStore, StoreError, WriteReceipt, WriteSink};
use formdrop::UploadRequest;
use futures::{stream, StreamExt};
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

pub const BOUNDARY: &str = "----formdrop-test-boundary";

/// Builds a `multipart/form-data` body part by part
#[derive(Default)]
pub struct MultipartBody {
    body: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(self, filename: &str, content_type: &str, data: &[u8]) -> Self {
        let disposition = format!("form-data; name=\"file\"; filename=\"{}\"", filename);
        self.raw_file(&disposition, Some(content_type), data)
    }

    /// File part with a hand-written `Content-Disposition`
    pub fn raw_file(mut self, disposition: &str, content_type: Option<&str>, data: &[u8]) -> Self {
        self.body
            .extend_from_slice(format!("--{}\r\nContent-Disposition: {}\r\n", BOUNDARY, disposition).as_bytes());
        if let Some(content_type) = content_type {
            self.body
                .extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
        }
        self.body.extend_from_slice(b"\r\n");
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        self.body
    }

    /// Body without the closing boundary
    pub fn unfinished(self) -> Vec<u8> {
        self.body
    }
}

pub fn content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}

pub fn multipart_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&content_type()).unwrap(),
    );
    headers
}

pub fn multipart_request(body: Vec<u8>) -> UploadRequest {
    UploadRequest::from_bytes(multipart_headers(), body)
}

/// Same body, delivered `chunk_size` bytes at a time
pub fn chunked_request(body: Vec<u8>, chunk_size: usize) -> UploadRequest {
    let chunks: Vec<Result<Bytes, std::io::Error>> = body
        .chunks(chunk_size)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    UploadRequest::from_stream(multipart_headers(), stream::iter(chunks))
}

/// Store whose writes always fail after reading the stream
pub struct FailingStore {
    pub reason: String,
}

impl FailingStore {
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for FailingStore {
    async fn open_write_destination(
        &self,
        _name: &str,
        _content_type: &str,
    ) -> Result<Box<dyn WriteSink>, StoreError> {
        Ok(Box::new(FailingSink {
            reason: self.reason.clone(),
        }))
    }
}

struct FailingSink {
    reason: String,
}

#[async_trait]
impl WriteSink for FailingSink {
    async fn accept_stream(self: Box<Self>, mut body: ByteStream) -> Result<WriteReceipt, StoreError> {
        while let Some(chunk) = body.next().await {
            chunk?;
        }
        Err(StoreError::ResponseError(self.reason))
    }
}

/// Store where the write to `stalled` reads its stream and then never
/// resolves, while every other write fails with `reason`
pub struct StallingStore {
    pub stalled: String,
    pub reason: String,
}

impl StallingStore {
    pub fn new(stalled: &str, reason: &str) -> Self {
        Self {
            stalled: stalled.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for StallingStore {
    async fn open_write_destination(
        &self,
        name: &str,
        _content_type: &str,
    ) -> Result<Box<dyn WriteSink>, StoreError> {
        if name == self.stalled {
            Ok(Box::new(StalledSink))
        } else {
            Ok(Box::new(FailingSink {
                reason: self.reason.clone(),
            }))
        }
    }
}

struct StalledSink;

#[async_trait]
impl WriteSink for StalledSink {
    async fn accept_stream(self: Box<Self>, mut body: ByteStream) -> Result<WriteReceipt, StoreError> {
        while let Some(chunk) = body.next().await {
            chunk?;
        }
        futures::future::pending().await
    }
}
