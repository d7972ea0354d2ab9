//! Pipeline coordinator
//!
//! Drives `multer` over the request body and routes each part as it
//! arrives:
//!
//! ```text
//! Idle ──► Parsing ──► Draining ──► Resolved
//!   │         │
//!   └─────────┴───────────────────► Resolved (failure)
//! ```
//!
//! Field parts feed the [`MetadataGate`]. File parts are validated against
//! the [`UploadPolicy`] before any byte is forwarded, then pumped through a
//! bounded channel into a [`PendingWrite`]. The parser only advances once
//! the write has pulled the buffered chunks, so memory stays bounded by the
//! channel and the store's own part buffer.
//!
//! The first failure wins: parsing stops, unresolved writes are aborted and
//! that error becomes the outcome. Writes are drained concurrently, so a
//! stalled write cannot hold back a failure that is already known.

use super::gate::MetadataGate;
use super::part::{self, PartKind};
use super::policy::{ResolvedName, UploadPolicy};
use super::request::UploadRequest;
use super::uploader::{PendingWrite, StreamingUploader};
use super::{UploadError, UploadOutcome, UploadReceipt};
use crate::store::{StoreError, WriteReceipt};
use bytes::{Bytes, BytesMut};
use futures::channel::mpsc;
use futures::stream::FuturesUnordered;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;

/// Largest accepted text field
pub const MAX_FIELD_BYTES: usize = 64 * 1024;

/// Chunks buffered between the parser and a write
const CHANNEL_CAPACITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Parsing,
    Draining,
    Resolved,
}

/// Runs uploads for one endpoint
#[derive(Clone)]
pub struct UploadPipeline {
    policy: Arc<UploadPolicy>,
    uploader: StreamingUploader,
}

impl UploadPipeline {
    pub fn new(policy: Arc<UploadPolicy>, uploader: StreamingUploader) -> Self {
        Self { policy, uploader }
    }

    /// Consume the request and resolve its outcome
    #[tracing::instrument(
        name = "upload.pipeline",
        skip_all,
        fields(
            policy = %self.policy.label,
            final_name = tracing::field::Empty,
            bytes_written = tracing::field::Empty
        )
    )]
    pub async fn run(&self, request: UploadRequest) -> UploadOutcome {
        let mut run = PipelineRun::new(&self.policy, &self.uploader);
        let outcome = run.execute(request).await;
        run.resolve();

        match &outcome {
            Ok(receipt) => {
                let span = tracing::Span::current();
                span.record("final_name", receipt.final_name.as_str());
                span.record("bytes_written", receipt.bytes_written);
                tracing::info!(object_key = %receipt.object_key, "Upload completed");
            }
            Err(e) => tracing::warn!(error = %e, kind = e.kind(), "Upload failed"),
        }

        outcome
    }
}

/// State for a single request
struct PipelineRun<'a> {
    policy: &'a UploadPolicy,
    uploader: &'a StreamingUploader,
    state: PipelineState,
    gate: MetadataGate,
    pending: Vec<PendingWrite>,
    completed: Vec<WriteReceipt>,
    accepted: Option<ResolvedName>,
}

impl<'a> PipelineRun<'a> {
    fn new(policy: &'a UploadPolicy, uploader: &'a StreamingUploader) -> Self {
        Self {
            policy,
            uploader,
            state: PipelineState::Idle,
            gate: MetadataGate::default(),
            pending: Vec::new(),
            completed: Vec::new(),
            accepted: None,
        }
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::trace!(from = ?self.state, to = ?next, "Pipeline state change");
        self.state = next;
    }

    /// Terminal: anything still in flight is aborted.
    fn resolve(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(count = self.pending.len(), "Aborting unresolved writes");
        }
        self.pending.clear();
        self.transition(PipelineState::Resolved);
    }

    async fn execute(&mut self, request: UploadRequest) -> UploadOutcome {
        let boundary = request.boundary()?;
        self.transition(PipelineState::Parsing);

        let mut multipart = multer::Multipart::new(request.into_body(), boundary);
        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => return Err(UploadError::ParseFailure(e.to_string())),
            };
            self.surface_finished()?;

            match part::classify(field.headers()) {
                PartKind::Field { name } => {
                    let value = read_field_value(field).await?;
                    self.gate.set_field(&name, &value);
                }
                PartKind::File {
                    name,
                    filename,
                    content_type,
                } => {
                    tracing::debug!(
                        field = %name,
                        filename = ?filename,
                        content_type = ?content_type,
                        "Received file part"
                    );
                    self.accept_file(field, filename, content_type).await?;
                }
            }
        }

        self.transition(PipelineState::Draining);
        self.drain().await
    }

    /// Validate a file part and forward its bytes. A rejected part is
    /// dropped unread.
    async fn accept_file(
        &mut self,
        mut field: multer::Field<'_>,
        filename: Option<String>,
        content_type: Option<String>,
    ) -> Result<(), UploadError> {
        let resolved =
            self.policy
                .resolve(filename.as_deref(), content_type.as_deref(), &self.gate)?;
        let content_type = self.policy.content_type_for(content_type.as_deref());

        let (mut tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(CHANNEL_CAPACITY);
        let index = self.pending.len();
        self.pending
            .push(self.uploader.upload(rx.boxed(), &resolved.object_key, &content_type));

        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        return Err(self.closed_early(index).await);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let message = e.to_string();
                    // The write must see the failure to discard what it holds.
                    let _ = tx.send(Err(std::io::Error::other(message.clone()))).await;
                    drop(tx);
                    if let Err(write_error) = self.pending.remove(index).wait().await {
                        tracing::debug!(error = %write_error, "Write stopped after source failure");
                    }
                    return Err(UploadError::ParseFailure(message));
                }
            }
        }

        self.accepted = Some(resolved);
        Ok(())
    }

    /// The write stopped reading before the file ended
    async fn closed_early(&mut self, index: usize) -> UploadError {
        let write = self.pending.remove(index);
        match write.wait().await {
            Err(e) => UploadError::WriteFailure(e),
            Ok(_) => UploadError::WriteFailure(StoreError::RequestError(
                "destination closed before the file was fully written".into(),
            )),
        }
    }

    /// Surface a write that already failed before routing the next part
    fn surface_finished(&mut self) -> Result<(), UploadError> {
        let mut running = Vec::with_capacity(self.pending.len());
        let mut failure = None;

        for write in self.pending.drain(..) {
            if failure.is_some() {
                running.push(write);
                continue;
            }
            match write.try_finish() {
                Ok(Ok(receipt)) => self.completed.push(receipt),
                Ok(Err(e)) => failure = Some(e),
                Err(write) => running.push(write),
            }
        }
        self.pending = running;

        match failure {
            Some(e) => Err(UploadError::WriteFailure(e)),
            None => Ok(()),
        }
    }

    /// Wait for every write. The first one to fail resolves the outcome.
    async fn drain(&mut self) -> UploadOutcome {
        let mut bytes_written: u64 = self.completed.iter().map(|r| r.bytes_written).sum();

        let mut writes: FuturesUnordered<_> = std::mem::take(&mut self.pending)
            .into_iter()
            .map(PendingWrite::wait)
            .collect();
        // Writes still queued on failure are dropped, which aborts them.
        while let Some(result) = writes.next().await {
            let receipt = result?;
            bytes_written += receipt.bytes_written;
            self.completed.push(receipt);
        }

        let accepted = self.accepted.take().ok_or(UploadError::MissingFile)?;
        Ok(UploadReceipt {
            final_name: accepted.display_name,
            object_key: accepted.object_key,
            bytes_written,
        })
    }
}

async fn read_field_value(mut field: multer::Field<'_>) -> Result<String, UploadError> {
    let mut buffer = BytesMut::new();
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if buffer.len() + chunk.len() > MAX_FIELD_BYTES {
                    return Err(UploadError::ParseFailure(format!(
                        "field '{}' exceeds {} bytes",
                        field.name().unwrap_or_default(),
                        MAX_FIELD_BYTES
                    )));
                }
                buffer.extend_from_slice(&chunk);
            }
            Ok(None) => break,
            Err(e) => return Err(UploadError::ParseFailure(e.to_string())),
        }
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
