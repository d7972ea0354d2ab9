//! Configuration module for formdrop
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.
//!
//! ```yaml
//! server:
//!   address: "0.0.0.0:8080"
//! store:
//!   kind: s3
//!   bucket: "${STORE_BUCKET}"
//!   region: "${STORE_REGION:-us-east-1}"
//! endpoints:
//!   - path: /api/file-upload
//!     policy: generic
//! metrics:
//!   enabled: true
//!   port: 9090
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Absent means every upload is answered with a configuration error
    #[serde(default)]
    pub store: Option<StoreConfig>,
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: None,
            endpoints: default_endpoints(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one endpoint must be configured".into(),
            ));
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if !endpoint.path.starts_with('/') {
                return Err(ConfigError::ValidationError(format!(
                    "Endpoint path '{}' must start with '/'",
                    endpoint.path
                )));
            }
            if !seen.insert(endpoint.path.trim_end_matches('/')) {
                return Err(ConfigError::ValidationError(format!(
                    "Endpoint path '{}' is configured more than once",
                    endpoint.path
                )));
            }
        }

        if let Some(ref store) = self.store {
            if store.kind == StoreKind::S3 && store.region.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Store region cannot be empty for kind 's3'".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Object store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    S3,
    Memory,
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Falls back to `AWS_ACCESS_KEY_ID`
    #[serde(default)]
    pub access_key: Option<String>,
    /// Falls back to `AWS_SECRET_ACCESS_KEY`
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default = "default_part_size")]
    pub part_size: usize,
}

impl StoreConfig {
    /// False when the bucket is empty or still an unexpanded `${...}` placeholder
    pub fn has_bucket(&self) -> bool {
        let bucket = self.bucket.trim();
        !bucket.is_empty() && !bucket.contains("${")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            bucket: String::new(),
            region: default_region(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            part_size: default_part_size(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_part_size() -> usize {
    8388608 // 8MB
}

/// Which upload policy an endpoint applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPreset {
    Generic,
    MasterPhoto,
    Named,
}

/// Upload endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub path: String,
    pub policy: PolicyPreset,
}

impl EndpointConfig {
    pub fn new(path: impl Into<String>, policy: PolicyPreset) -> Self {
        Self {
            path: path.into(),
            policy,
        }
    }
}

fn default_endpoints() -> Vec<EndpointConfig> {
    vec![
        EndpointConfig::new("/api/file-upload", PolicyPreset::Generic),
        EndpointConfig::new("/api/master-photo-upload", PolicyPreset::MasterPhoto),
        EndpointConfig::new("/api/upload", PolicyPreset::Named),
    ]
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.endpoints.len(), 3);
        assert!(config.store.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_endpoints() {
        let config = Config {
            endpoints: vec![],
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_relative_path() {
        let config = Config {
            endpoints: vec![EndpointConfig::new("api/upload", PolicyPreset::Named)],
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_duplicate_path() {
        let config = Config {
            endpoints: vec![
                EndpointConfig::new("/api/upload", PolicyPreset::Named),
                EndpointConfig::new("/api/upload/", PolicyPreset::Generic),
            ],
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_s3_needs_region() {
        let config = Config {
            store: Some(StoreConfig {
                bucket: "uploads".into(),
                region: "".into(),
                ..StoreConfig::default()
            }),
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_has_bucket() {
        let mut store = StoreConfig::default();
        assert!(!store.has_bucket());
        store.bucket = "${STORE_BUCKET}".into();
        assert!(!store.has_bucket());
        store.bucket = "uploads".into();
        assert!(store.has_bucket());
    }
}
