//! S3-compatible object store
//!
//! Path-style requests signed with SigV4 over `reqwest`. Writes are streamed:
//! the sink holds at most one part in memory and switches from a single
//! PutObject to a multipart upload once the stream outgrows `part_size`.
//!
//! # Example
//!
//! ```no_run
//! use formdrop::store::{Credentials, S3Client, S3ClientConfig};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = S3Client::new(S3ClientConfig {
//!     bucket: "uploads".to_string(),
//!     region: "us-east-1".to_string(),
//!     endpoint: Some("http://localhost:9000".to_string()),
//!     credentials: Credentials::new("minioadmin", "minioadmin"),
//!     part_size: formdrop::store::s3::DEFAULT_PART_SIZE,
//! })?;
//!
//! let response = client
//!     .put_object("hello.txt", Bytes::from("Hello, World!"), Some("text/plain"))
//!     .await?;
//! println!("ETag: {}", response.etag);
//! # Ok(())
//! # }
//! ```
//!
//! # Tracing
//!
//! | Operation | Span Name |
//! |-----------|-----------|
//! | PutObject | `s3.put_object` |
//! | CreateMultipartUpload | `s3.create_multipart_upload` |
//! | UploadPart | `s3.upload_part` |
//! | CompleteMultipartUpload | `s3.complete_multipart_upload` |
//! | AbortMultipartUpload | `s3.abort_multipart_upload` |

use super::signing::{self, CanonicalRequest};
use super::{ByteStream, Credentials, ObjectStore, StoreError, WriteReceipt, WriteSink};
use crate::metrics;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, ETAG};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Minimum part size (5MB) - S3 requirement
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Maximum parts allowed
pub const MAX_PARTS: usize = 10000;

/// Default part size (8MB)
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

const SERVICE: &str = "s3";

/// S3 Client configuration
#[derive(Debug, Clone)]
pub struct S3ClientConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub credentials: Credentials,
    /// Raised to [`MIN_PART_SIZE`] when smaller
    pub part_size: usize,
}

/// S3 Client
pub struct S3Client {
    config: S3ClientConfig,
    http_client: reqwest::Client,
}

impl S3Client {
    /// Create a new S3 client
    pub fn new(mut config: S3ClientConfig) -> Result<Self, StoreError> {
        if config.bucket.trim().is_empty() {
            return Err(StoreError::ConfigError("bucket name cannot be empty".into()));
        }
        config.part_size = std::cmp::max(config.part_size, MIN_PART_SIZE);

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| StoreError::ConfigError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    pub fn part_size(&self) -> usize {
        self.config.part_size
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> String {
        self.config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", self.config.region))
    }

    fn object_path(&self, key: &str) -> String {
        format!(
            "/{}/{}",
            signing::uri_encode(&self.config.bucket),
            signing::encode_key(key)
        )
    }

    /// Sign and send one request, mapping non-2xx answers to errors.
    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(&str, &str)],
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response, StoreError> {
        let path = self.object_path(key);
        let query = signing::canonical_query(query);

        let mut raw_url = format!("{}{}", self.endpoint().trim_end_matches('/'), path);
        if !query.is_empty() {
            raw_url.push('?');
            raw_url.push_str(&query);
        }
        let url = reqwest::Url::parse(&raw_url)
            .map_err(|e| StoreError::ConfigError(format!("Invalid URL '{}': {}", raw_url, e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(StoreError::ConfigError(format!(
                    "Endpoint has no host: {}",
                    raw_url
                )))
            }
        };

        let payload_hash = signing::sha256_hex(&body);
        let (amz_date, date) = signing::amz_timestamps(Utc::now());

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host);
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        if let Some(content_type) = content_type {
            headers.insert("content-type".to_string(), content_type.to_string());
        }
        if let Some(token) = self.config.credentials.session_token() {
            headers.insert("x-amz-security-token".to_string(), token.to_string());
        }

        let canonical = CanonicalRequest {
            method: method.as_str(),
            uri: &path,
            query: &query,
            headers,
            payload_hash: &payload_hash,
        };
        let authorization = signing::authorization(
            &canonical,
            &self.config.credentials,
            &self.config.region,
            SERVICE,
            &amz_date,
            &date,
        )?;

        let mut request = self
            .http_client
            .request(method.clone(), url)
            .header(AUTHORIZATION, authorization);
        for (name, value) in canonical.headers.iter().filter(|(name, _)| *name != "host") {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::RequestError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::ResponseError(format!(
                "{} {} returned {}: {}",
                method,
                key,
                status,
                error_message(&text)
            )));
        }

        Ok(response)
    }

    /// Upload an object in a single request (PutObject)
    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, body),
        fields(
            s3.bucket = %self.config.bucket,
            s3.key = %key,
            http.method = "PUT",
            upload.bytes = body.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    pub async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<S3PutObjectResponse, StoreError> {
        let response = self
            .send(Method::PUT, key, &[], body, content_type)
            .await?;
        let etag = etag_header(&response).unwrap_or_default();

        tracing::Span::current().record("s3.etag", etag.as_str());
        tracing::debug!(etag = %etag, "PutObject completed");

        Ok(S3PutObjectResponse { etag })
    }

    /// Create a multipart upload
    #[tracing::instrument(
        name = "s3.create_multipart_upload",
        skip(self),
        fields(
            s3.bucket = %self.config.bucket,
            s3.key = %key,
            http.method = "POST",
            s3.upload_id = tracing::field::Empty
        ),
        err
    )]
    pub async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<S3CreateMultipartUploadResponse, StoreError> {
        let response = self
            .send(Method::POST, key, &[("uploads", "")], Bytes::new(), content_type)
            .await?;
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::ResponseError(e.to_string()))?;
        let result: InitiateMultipartUploadResult = quick_xml::de::from_str(&text)
            .map_err(|e| {
                StoreError::ResponseError(format!("Malformed CreateMultipartUpload response: {}", e))
            })?;

        tracing::Span::current().record("s3.upload_id", result.upload_id.as_str());

        Ok(S3CreateMultipartUploadResponse {
            upload_id: result.upload_id,
        })
    }

    /// Upload a part in a multipart upload
    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, body),
        fields(
            s3.bucket = %self.config.bucket,
            s3.key = %key,
            s3.upload_id = %upload_id,
            s3.part_number = part_number,
            upload.bytes = body.len()
        ),
        err
    )]
    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<S3UploadPartResponse, StoreError> {
        let part_number_param = part_number.to_string();
        let response = self
            .send(
                Method::PUT,
                key,
                &[("partNumber", &part_number_param), ("uploadId", upload_id)],
                body,
                None,
            )
            .await?;
        let etag = etag_header(&response).ok_or_else(|| {
            StoreError::ResponseError(format!("UploadPart {} returned no ETag", part_number))
        })?;

        Ok(S3UploadPartResponse { etag })
    }

    /// Complete a multipart upload
    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, parts),
        fields(
            s3.bucket = %self.config.bucket,
            s3.key = %key,
            s3.upload_id = %upload_id,
            parts_count = parts.len()
        ),
        err
    )]
    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[S3CompletedPart],
    ) -> Result<S3CompleteMultipartUploadResponse, StoreError> {
        let document = CompleteMultipartUpload {
            parts: parts
                .iter()
                .map(|part| CompletedPartXml {
                    part_number: part.part_number,
                    etag: &part.etag,
                })
                .collect(),
        };
        let body = quick_xml::se::to_string(&document)
            .map_err(|e| StoreError::RequestError(e.to_string()))?;

        let response = self
            .send(
                Method::POST,
                key,
                &[("uploadId", upload_id)],
                Bytes::from(body),
                Some("application/xml"),
            )
            .await?;
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::ResponseError(e.to_string()))?;

        // S3 can report a failed completion inside a 200 response.
        if text.contains("<Error>") {
            return Err(StoreError::ResponseError(format!(
                "CompleteMultipartUpload failed: {}",
                error_message(&text)
            )));
        }
        let result: CompleteMultipartUploadResult =
            quick_xml::de::from_str(&text).unwrap_or_default();

        Ok(S3CompleteMultipartUploadResponse {
            etag: result.etag.unwrap_or_default(),
        })
    }

    /// Abort a multipart upload
    #[tracing::instrument(
        name = "s3.abort_multipart_upload",
        skip(self),
        fields(s3.bucket = %self.config.bucket, s3.key = %key, s3.upload_id = %upload_id),
        err
    )]
    pub async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), StoreError> {
        self.send(
            Method::DELETE,
            key,
            &[("uploadId", upload_id)],
            Bytes::new(),
            None,
        )
        .await?;
        Ok(())
    }
}

fn etag_header(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Best-effort summary of an S3 `<Error>` document.
fn error_message(body: &str) -> String {
    match quick_xml::de::from_str::<S3ErrorBody>(body) {
        Ok(S3ErrorBody {
            code: Some(code),
            message,
        }) => match message {
            Some(message) => format!("{}: {}", code, message),
            None => code,
        },
        _ => body.trim().chars().take(200).collect(),
    }
}

/// S3 PutObject response
#[derive(Debug, Clone)]
pub struct S3PutObjectResponse {
    pub etag: String,
}

/// S3 CreateMultipartUpload response
#[derive(Debug, Clone)]
pub struct S3CreateMultipartUploadResponse {
    pub upload_id: String,
}

/// S3 UploadPart response
#[derive(Debug, Clone)]
pub struct S3UploadPartResponse {
    pub etag: String,
}

/// S3 CompleteMultipartUpload response
#[derive(Debug, Clone)]
pub struct S3CompleteMultipartUploadResponse {
    pub etag: String,
}

/// S3 completed part
#[derive(Debug, Clone)]
pub struct S3CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateMultipartUploadResult {
    upload_id: String,
}

#[derive(Deserialize, Default)]
struct CompleteMultipartUploadResult {
    #[serde(rename = "ETag", default)]
    etag: Option<String>,
}

#[derive(Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteMultipartUpload<'a> {
    #[serde(rename = "Part")]
    parts: Vec<CompletedPartXml<'a>>,
}

#[derive(Serialize)]
struct CompletedPartXml<'a> {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct S3ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// [`ObjectStore`] backed by an S3 bucket
pub struct S3Store {
    client: Arc<S3Client>,
}

impl S3Store {
    pub fn new(client: S3Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    pub fn client(&self) -> &S3Client {
        &self.client
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn open_write_destination(
        &self,
        name: &str,
        content_type: &str,
    ) -> Result<Box<dyn WriteSink>, StoreError> {
        if name.is_empty() {
            return Err(StoreError::RequestError(
                "object key cannot be empty".into(),
            ));
        }

        Ok(Box::new(S3WriteSink {
            client: Arc::clone(&self.client),
            key: name.to_string(),
            content_type: content_type.to_string(),
        }))
    }
}

struct S3WriteSink {
    client: Arc<S3Client>,
    key: String,
    content_type: String,
}

/// Multipart upload in flight. Dropped before it is completed or aborted
/// (the write task was cancelled), it aborts itself in the background.
struct MultipartProgress {
    client: Arc<S3Client>,
    key: String,
    upload_id: String,
    parts: Vec<S3CompletedPart>,
    settled: bool,
}

impl MultipartProgress {
    async fn start(client: &Arc<S3Client>, key: &str, content_type: &str) -> Result<Self, StoreError> {
        let created = client
            .create_multipart_upload(key, Some(content_type))
            .await?;
        Ok(Self {
            client: Arc::clone(client),
            key: key.to_string(),
            upload_id: created.upload_id,
            parts: Vec::new(),
            settled: false,
        })
    }

    async fn push_part(&mut self, body: Bytes) -> Result<(), StoreError> {
        let part_number = self.parts.len() + 1;
        if part_number > MAX_PARTS {
            return Err(StoreError::RequestError(format!(
                "object exceeds {} parts",
                MAX_PARTS
            )));
        }

        let uploaded = self
            .client
            .upload_part(&self.key, &self.upload_id, part_number as u32, body)
            .await?;
        self.parts.push(S3CompletedPart {
            part_number: part_number as u32,
            etag: uploaded.etag,
        });
        Ok(())
    }

    /// Upload the remaining bytes and complete; aborts on failure
    async fn complete(mut self, tail: Bytes) -> Result<String, StoreError> {
        match self.finish(tail).await {
            Ok(etag) => {
                self.settled = true;
                metrics::record_multipart_upload_success(self.parts.len());
                Ok(etag)
            }
            Err(e) => {
                self.abort().await;
                Err(e)
            }
        }
    }

    async fn finish(&mut self, tail: Bytes) -> Result<String, StoreError> {
        if !tail.is_empty() {
            self.push_part(tail).await?;
        }
        let response = self
            .client
            .complete_multipart_upload(&self.key, &self.upload_id, &self.parts)
            .await?;
        Ok(response.etag)
    }

    async fn abort(mut self) {
        self.settled = true;
        metrics::record_multipart_upload_failure();
        abort_upload(&self.client, &self.key, &self.upload_id).await;
    }
}

impl Drop for MultipartProgress {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        metrics::record_multipart_upload_failure();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                upload_id = %self.upload_id,
                "No runtime left to abort multipart upload"
            );
            return;
        };
        let client = Arc::clone(&self.client);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        tracing::debug!(upload_id = %upload_id, "Write cancelled, aborting multipart upload");
        runtime.spawn(async move { abort_upload(&client, &key, &upload_id).await });
    }
}

async fn abort_upload(client: &S3Client, key: &str, upload_id: &str) {
    if let Err(e) = client.abort_multipart_upload(key, upload_id).await {
        tracing::warn!(
            upload_id = %upload_id,
            error = %e,
            "Failed to abort multipart upload"
        );
    }
}

#[async_trait]
impl WriteSink for S3WriteSink {
    async fn accept_stream(self: Box<Self>, mut body: ByteStream) -> Result<WriteReceipt, StoreError> {
        let S3WriteSink {
            client,
            key,
            content_type,
        } = *self;
        let part_size = client.part_size();

        let mut buffer = BytesMut::new();
        let mut progress: Option<MultipartProgress> = None;
        let mut bytes_written: u64 = 0;

        let streamed: Result<(), StoreError> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                bytes_written += chunk.len() as u64;
                buffer.extend_from_slice(&chunk);

                while buffer.len() >= part_size {
                    let part = buffer.split_to(part_size).freeze();
                    if progress.is_none() {
                        progress = Some(MultipartProgress::start(&client, &key, &content_type).await?);
                    }
                    if let Some(upload) = progress.as_mut() {
                        upload.push_part(part).await?;
                    }
                }
            }
            Ok::<(), StoreError>(())
        }
        .await;

        let etag = match (streamed, progress) {
            (Err(e), Some(upload)) => {
                upload.abort().await;
                return Err(e);
            }
            (Err(e), None) => return Err(e),
            (Ok(()), None) => {
                client
                    .put_object(&key, buffer.freeze(), Some(&content_type))
                    .await?
                    .etag
            }
            (Ok(()), Some(upload)) => upload.complete(buffer.freeze()).await?,
        };

        tracing::info!(
            s3.key = %key,
            bytes_written = bytes_written,
            etag = %etag,
            "Object written"
        );

        Ok(WriteReceipt {
            key,
            etag: Some(etag),
            bytes_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_config(endpoint: Option<&str>) -> S3ClientConfig {
        S3ClientConfig {
            bucket: "test-bucket".into(),
            region: "us-west-2".into(),
            endpoint: endpoint.map(String::from),
            credentials: Credentials::new("test-key", "test-secret"),
            part_size: 0,
        }
    }

    #[test]
    fn test_default_endpoint() {
        let client = S3Client::new(client_config(None)).unwrap();
        assert_eq!(client.endpoint(), "https://s3.us-west-2.amazonaws.com");
    }

    #[test]
    fn test_part_size_is_clamped() {
        let client = S3Client::new(client_config(Some("http://localhost:9000"))).unwrap();
        assert_eq!(client.part_size(), MIN_PART_SIZE);
    }

    #[test]
    fn test_empty_bucket_rejected() {
        let mut config = client_config(None);
        config.bucket = " ".into();
        assert!(S3Client::new(config).is_err());
    }

    #[test]
    fn test_object_path_is_encoded() {
        let client = S3Client::new(client_config(None)).unwrap();
        assert_eq!(
            client.object_path("UserUpload_my photo.jpg"),
            "/test-bucket/UserUpload_my%20photo.jpg"
        );
    }

    #[test]
    fn test_error_message_from_xml() {
        let body = "<?xml version=\"1.0\"?><Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>";
        assert_eq!(error_message(body), "AccessDenied: Access Denied");
        assert_eq!(error_message("  plain text  "), "plain text");
    }

    #[test]
    fn test_complete_document_serialization() {
        let document = CompleteMultipartUpload {
            parts: vec![
                CompletedPartXml {
                    part_number: 1,
                    etag: "etag-1",
                },
                CompletedPartXml {
                    part_number: 2,
                    etag: "etag-2",
                },
            ],
        };
        let xml = quick_xml::se::to_string(&document).unwrap();
        assert!(xml.starts_with("<CompleteMultipartUpload>"));
        assert!(xml.contains("<Part><PartNumber>1</PartNumber><ETag>etag-1</ETag></Part>"));
        assert!(xml.contains("<PartNumber>2</PartNumber>"));
    }
}
