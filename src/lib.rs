//! formdrop Library
//!
//! Streaming `multipart/form-data` uploads into an S3-compatible object store.
//!
//! # Features
//!
//! - **Streaming**: file bytes go to the store as they arrive, never buffered whole
//! - **Policies**: per-endpoint filename, extension and naming rules
//! - **S3 Compatible**: SigV4 signed, multipart uploads for large files
//!
//! # Example
//!
//! ```no_run
//! use formdrop::{config::Config, server::UploadServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = UploadServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod router;
pub mod server;
pub mod store;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use server::UploadServer;
pub use upload::{UploadError, UploadPolicy, UploadRequest, UploadResponse, UploadService};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
