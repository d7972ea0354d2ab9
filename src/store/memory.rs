//! In-memory object store
//!
//! Objects live in a shared map for the lifetime of the process. Clones share
//! the same map, so a test can keep a handle and inspect what was written.

use super::{ByteStream, ObjectStore, StoreError, WriteReceipt, WriteSink};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn open_write_destination(
        &self,
        name: &str,
        content_type: &str,
    ) -> Result<Box<dyn WriteSink>, StoreError> {
        if name.is_empty() {
            return Err(StoreError::RequestError("object key cannot be empty".into()));
        }

        Ok(Box::new(MemorySink {
            objects: Arc::clone(&self.objects),
            key: name.to_string(),
            content_type: content_type.to_string(),
        }))
    }
}

struct MemorySink {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    key: String,
    content_type: String,
}

#[async_trait]
impl WriteSink for MemorySink {
    async fn accept_stream(self: Box<Self>, mut body: ByteStream) -> Result<WriteReceipt, StoreError> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }

        let bytes_written = buffer.len() as u64;
        // The object only becomes visible once the whole stream arrived.
        self.objects.write().insert(
            self.key.clone(),
            StoredObject {
                content_type: self.content_type.clone(),
                body: buffer.freeze(),
            },
        );

        tracing::debug!(key = %self.key, bytes_written, "Object stored in memory");

        Ok(WriteReceipt {
            key: self.key.clone(),
            etag: None,
            bytes_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn body(chunks: Vec<Result<Bytes, std::io::Error>>) -> ByteStream {
        stream::iter(chunks).boxed()
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let store = MemoryStore::new();
        let sink = store
            .open_write_destination("UserUpload_notes.txt", "text/plain")
            .await
            .unwrap();
        let receipt = sink
            .accept_stream(body(vec![Ok(Bytes::from("hello ")), Ok(Bytes::from("world"))]))
            .await
            .unwrap();

        assert_eq!(receipt.bytes_written, 11);
        let object = store.get("UserUpload_notes.txt").unwrap();
        assert_eq!(object.body, Bytes::from("hello world"));
        assert_eq!(object.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_second_write_overwrites() {
        let store = MemoryStore::new();
        for content in ["first", "second"] {
            let sink = store.open_write_destination("a.jpg", "image/jpeg").await.unwrap();
            sink.accept_stream(body(vec![Ok(Bytes::from(content))]))
                .await
                .unwrap();
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a.jpg").unwrap().body, Bytes::from("second"));
    }

    #[tokio::test]
    async fn test_failed_stream_stores_nothing() {
        let store = MemoryStore::new();
        let sink = store.open_write_destination("broken.bin", "application/octet-stream").await.unwrap();
        let result = sink
            .accept_stream(body(vec![
                Ok(Bytes::from("partial")),
                Err(std::io::Error::other("connection reset")),
            ]))
            .await;

        assert!(matches!(result, Err(StoreError::SourceError(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let store = MemoryStore::new();
        assert!(store.open_write_destination("", "text/plain").await.is_err());
    }
}
