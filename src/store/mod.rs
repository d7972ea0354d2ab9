//! Object store module
//!
//! The upload pipeline only sees two traits: [`ObjectStore`] opens a write
//! destination for a name, and the returned [`WriteSink`] consumes a byte
//! stream into it. Two implementations ship with the crate:
//!
//! - [`S3Store`]: S3-compatible bucket, SigV4 signed, multipart for large objects
//! - [`MemoryStore`]: process-local map, for local runs and tests

pub mod credentials;
pub mod memory;
pub mod s3;
mod signing;

pub use credentials::{Credentials, CredentialsError, CredentialsProvider};
pub use memory::{MemoryStore, StoredObject};
pub use s3::{S3Client, S3ClientConfig, S3Store};

use crate::config::{StoreConfig, StoreKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;

/// Stream of file bytes handed to a [`WriteSink`]
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Object store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Request error: {0}")]
    RequestError(String),

    #[error("Response error: {0}")]
    ResponseError(String),

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Source stream error: {0}")]
    SourceError(#[from] std::io::Error),
}

/// Result of a completed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub key: String,
    pub etag: Option<String>,
    pub bytes_written: u64,
}

/// A place objects can be written to.
///
/// Writing to an existing name overwrites it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn open_write_destination(
        &self,
        name: &str,
        content_type: &str,
    ) -> Result<Box<dyn WriteSink>, StoreError>;
}

/// One open destination. Consumes the stream in order, exactly once.
#[async_trait]
pub trait WriteSink: Send {
    async fn accept_stream(self: Box<Self>, body: ByteStream) -> Result<WriteReceipt, StoreError>;
}

/// Build the configured store.
///
/// Returns `Ok(None)` when the section, the bucket or the credentials are
/// missing; uploads then answer with a configuration error instead of the
/// server refusing to start.
pub fn build_store(config: Option<&StoreConfig>) -> Result<Option<Arc<dyn ObjectStore>>, StoreError> {
    let Some(config) = config else {
        tracing::warn!("No store section configured, uploads will be rejected");
        return Ok(None);
    };

    match config.kind {
        StoreKind::Memory => {
            tracing::info!("Using in-memory object store");
            Ok(Some(Arc::new(MemoryStore::new())))
        }
        StoreKind::S3 => {
            if !config.has_bucket() {
                tracing::warn!("Store bucket is not set, uploads will be rejected");
                return Ok(None);
            }

            let credentials = match CredentialsProvider::resolve(config) {
                Ok(credentials) => credentials,
                Err(e) => {
                    tracing::warn!(error = %e, "Store credentials unavailable, uploads will be rejected");
                    return Ok(None);
                }
            };

            let client = S3Client::new(S3ClientConfig {
                bucket: config.bucket.clone(),
                region: config.region.clone(),
                endpoint: config.endpoint.clone(),
                credentials,
                part_size: config.part_size,
            })?;

            tracing::info!(
                bucket = %client.bucket(),
                region = %client.region(),
                endpoint = %client.endpoint(),
                part_size = client.part_size(),
                "Using S3 object store"
            );
            Ok(Some(Arc::new(S3Store::new(client))))
        }
    }
}
