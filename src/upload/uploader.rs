//! Streaming uploader
//!
//! Each accepted file part is written by its own task so the parser can keep
//! reading while bytes flow to the store. The task pulls chunks from the
//! part's stream; nothing past the current chunk is buffered here.

use crate::store::{ByteStream, ObjectStore, StoreError, WriteReceipt};
use futures::FutureExt;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

#[derive(Clone)]
pub struct StreamingUploader {
    store: Arc<dyn ObjectStore>,
}

impl StreamingUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Start writing `body` to `destination`. Returns immediately.
    pub fn upload(&self, body: ByteStream, destination: &str, content_type: &str) -> PendingWrite {
        let store = Arc::clone(&self.store);
        let key = destination.to_string();
        let content_type = content_type.to_string();
        let span = tracing::info_span!(
            "upload.write",
            object.key = %key,
            content_type = %content_type,
            bytes_written = tracing::field::Empty
        );

        let handle = tokio::spawn(write(store, key, content_type, body).instrument(span));

        PendingWrite { handle }
    }
}

async fn write(
    store: Arc<dyn ObjectStore>,
    key: String,
    content_type: String,
    body: ByteStream,
) -> Result<WriteReceipt, StoreError> {
    let sink = store.open_write_destination(&key, &content_type).await?;
    let receipt = sink.accept_stream(body).await?;
    tracing::Span::current().record("bytes_written", receipt.bytes_written);
    Ok(receipt)
}

/// An outstanding write. Dropping it before it resolves aborts the write.
pub struct PendingWrite {
    handle: JoinHandle<Result<WriteReceipt, StoreError>>,
}

impl PendingWrite {
    /// Result of a write that already finished, or the write itself back
    /// when it is still running.
    pub fn try_finish(mut self) -> Result<Result<WriteReceipt, StoreError>, PendingWrite> {
        if !self.handle.is_finished() {
            return Err(self);
        }
        match (&mut self.handle).now_or_never() {
            Some(joined) => Ok(joined.unwrap_or_else(|e| Err(join_failure(e)))),
            None => Err(self),
        }
    }

    /// Wait for the write to resolve
    pub async fn wait(mut self) -> Result<WriteReceipt, StoreError> {
        match (&mut self.handle).await {
            Ok(result) => result,
            Err(e) => Err(join_failure(e)),
        }
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        // No-op for a task that already completed.
        self.handle.abort();
    }
}

fn join_failure(error: JoinError) -> StoreError {
    if error.is_cancelled() {
        StoreError::RequestError("write was cancelled".into())
    } else {
        StoreError::RequestError("write task panicked".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use bytes::Bytes;
    use futures::{stream, StreamExt};
    use std::time::Duration;

    fn chunks(parts: &'static [&'static str]) -> ByteStream {
        stream::iter(parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes())))).boxed()
    }

    #[tokio::test]
    async fn test_upload_writes_stream_in_order() {
        let store = MemoryStore::new();
        let uploader = StreamingUploader::new(Arc::new(store.clone()));

        let pending = uploader.upload(chunks(&["a", "b", "c"]), "abc.txt", "text/plain");
        let receipt = pending.wait().await.unwrap();

        assert_eq!(receipt.bytes_written, 3);
        assert_eq!(store.get("abc.txt").unwrap().body, Bytes::from("abc"));
    }

    #[tokio::test]
    async fn test_source_error_resolves_to_error() {
        let store = MemoryStore::new();
        let uploader = StreamingUploader::new(Arc::new(store.clone()));
        let body = stream::iter(vec![
            Ok(Bytes::from("a")),
            Err(std::io::Error::other("client went away")),
        ])
        .boxed();

        let result = uploader.upload(body, "broken.txt", "text/plain").wait().await;
        assert!(matches!(result, Err(StoreError::SourceError(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_try_finish_returns_running_write() {
        let store = MemoryStore::new();
        let uploader = StreamingUploader::new(Arc::new(store));
        let body = stream::pending::<Result<Bytes, std::io::Error>>().boxed();

        let pending = uploader.upload(body, "slow.txt", "text/plain");
        assert!(
            pending.try_finish().is_err(),
            "write cannot finish on a pending stream"
        );
    }

    #[tokio::test]
    async fn test_drop_aborts_write() {
        let store = MemoryStore::new();
        let uploader = StreamingUploader::new(Arc::new(store.clone()));
        let body = stream::iter(vec![Ok(Bytes::from("never stored"))])
            .chain(stream::pending())
            .boxed();

        drop(uploader.upload(body, "aborted.txt", "text/plain"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.is_empty());
    }
}
