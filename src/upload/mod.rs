//! Upload module
//!
//! Streams the file part of a `multipart/form-data` request into the object
//! store. The pieces, leaf first:
//!
//! - [`part`]: classifies a part from its `Content-Disposition`
//! - [`gate`]: holds the `FileName` text field
//! - [`policy`]: per-endpoint validation and naming
//! - [`uploader`]: forwards a file stream to a write destination
//! - [`pipeline`]: drives the parser and resolves one outcome per request
//! - [`service`]: maps outcomes to HTTP responses

use crate::store::StoreError;
use thiserror::Error;

pub mod gate;
pub mod part;
pub mod pipeline;
pub mod policy;
pub mod request;
pub mod service;
pub mod uploader;

pub use gate::MetadataGate;
pub use pipeline::{PipelineState, UploadPipeline};
pub use policy::UploadPolicy;
pub use request::{UploadRequest, UploadResponse};
pub use service::UploadService;
pub use uploader::{PendingWrite, StreamingUploader};

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Missing object store bucket or credentials")]
    ConfigMissing,

    #[error("Content-Type must be multipart/form-data")]
    BadContentType,

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid filename")]
    InvalidFilename,

    #[error("{hint}")]
    UnsupportedExtension { extension: String, hint: String },

    #[error("No file part in request")]
    MissingFile,

    #[error("{0}")]
    WriteFailure(#[from] StoreError),

    #[error("{0}")]
    ParseFailure(String),
}

impl UploadError {
    /// Short label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::ConfigMissing => "config_missing",
            UploadError::BadContentType => "bad_content_type",
            UploadError::MissingField(_) => "missing_field",
            UploadError::InvalidFilename => "invalid_filename",
            UploadError::UnsupportedExtension { .. } => "unsupported_extension",
            UploadError::MissingFile => "missing_file",
            UploadError::WriteFailure(_) => "write_failure",
            UploadError::ParseFailure(_) => "parse_failure",
        }
    }

    /// Caused by what the client sent rather than by the store or the transport
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            UploadError::MissingField(_)
                | UploadError::InvalidFilename
                | UploadError::UnsupportedExtension { .. }
                | UploadError::MissingFile
        )
    }
}

/// Successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Name reported back to the client
    pub final_name: String,
    pub object_key: String,
    pub bytes_written: u64,
}

/// Terminal result of one request
pub type UploadOutcome = Result<UploadReceipt, UploadError>;
