//! Upload service
//!
//! Entry point used by the HTTP server: checks the store is configured, runs
//! the pipeline for the endpoint's policy and renders the outcome.

use super::pipeline::UploadPipeline;
use super::policy::UploadPolicy;
use super::request::{UploadRequest, UploadResponse};
use super::uploader::StreamingUploader;
use super::{UploadError, UploadOutcome};
use crate::metrics;
use crate::store::ObjectStore;
use http::StatusCode;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct UploadService {
    store: Option<Arc<dyn ObjectStore>>,
}

impl UploadService {
    /// `None` answers every upload with a configuration error
    pub fn new(store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self { store }
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    pub async fn handle(&self, policy: &Arc<UploadPolicy>, request: UploadRequest) -> UploadResponse {
        let started = Instant::now();

        let outcome = match &self.store {
            None => Err(UploadError::ConfigMissing),
            Some(store) => {
                let uploader = StreamingUploader::new(Arc::clone(store));
                UploadPipeline::new(Arc::clone(policy), uploader)
                    .run(request)
                    .await
            }
        };

        let response = respond(policy, &outcome);
        match &outcome {
            Ok(receipt) => {
                metrics::record_upload(&policy.label, "success", receipt.bytes_written, started.elapsed())
            }
            Err(e) => {
                metrics::record_upload(&policy.label, "failure", 0, started.elapsed());
                metrics::record_error(e.kind());
            }
        }

        response
    }
}

/// Render an outcome as status and plain-text body
pub fn respond(policy: &UploadPolicy, outcome: &UploadOutcome) -> UploadResponse {
    match outcome {
        Ok(receipt) => UploadResponse::new(StatusCode::OK, policy.success_body(&receipt.final_name)),
        Err(e @ UploadError::ConfigMissing) => {
            UploadResponse::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e @ UploadError::BadContentType) => {
            UploadResponse::new(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) if e.is_validation() => {
            UploadResponse::new(StatusCode::BAD_REQUEST, format!("Upload failed: {}", e))
        }
        Err(e) => UploadResponse::new(policy.failure_status, format!("Upload failed: {}", e)),
    }
}
