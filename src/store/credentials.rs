//! Object store credentials
//!
//! Credentials come from the `store` section of the configuration first and
//! fall back to the standard AWS environment variables.
//!
//! # Example
//!
//! ```
//! use formdrop::store::Credentials;
//!
//! let creds = Credentials::new("access-key", "secret-key");
//! assert_eq!(creds.access_key_id(), "access-key");
//! assert!(creds.session_token().is_none());
//! ```

use crate::config::StoreConfig;
use std::fmt;
use thiserror::Error;

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

/// Access key pair used to sign object store requests
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    /// Create new credentials
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Create credentials with session token (for temporary credentials)
    pub fn with_session_token(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: Some(session_token.into()),
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

// Keep secrets out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Factory methods for loading credentials
pub struct CredentialsProvider;

impl CredentialsProvider {
    /// Load credentials from environment variables
    ///
    /// Looks for:
    /// - `AWS_ACCESS_KEY_ID`
    /// - `AWS_SECRET_ACCESS_KEY`
    /// - `AWS_SESSION_TOKEN` (optional)
    pub fn from_env() -> Result<Credentials, CredentialsError> {
        let access_key = non_empty_env("AWS_ACCESS_KEY_ID").ok_or_else(|| {
            CredentialsError::MissingCredentials("AWS_ACCESS_KEY_ID not set".into())
        })?;

        let secret_key = non_empty_env("AWS_SECRET_ACCESS_KEY").ok_or_else(|| {
            CredentialsError::MissingCredentials("AWS_SECRET_ACCESS_KEY not set".into())
        })?;

        Ok(match non_empty_env("AWS_SESSION_TOKEN") {
            Some(token) => Credentials::with_session_token(access_key, secret_key, token),
            None => Credentials::new(access_key, secret_key),
        })
    }

    /// Load credentials from the `store` configuration section
    pub fn from_config(config: &StoreConfig) -> Result<Credentials, CredentialsError> {
        let access_key = configured(&config.access_key).ok_or_else(|| {
            CredentialsError::MissingCredentials("access_key not set in config".into())
        })?;

        let secret_key = configured(&config.secret_key).ok_or_else(|| {
            CredentialsError::MissingCredentials("secret_key not set in config".into())
        })?;

        Ok(match configured(&config.session_token) {
            Some(token) => Credentials::with_session_token(access_key, secret_key, token),
            None => Credentials::new(access_key, secret_key),
        })
    }

    /// Configuration first, then the environment
    pub fn resolve(config: &StoreConfig) -> Result<Credentials, CredentialsError> {
        Self::from_config(config).or_else(|_| Self::from_env())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// A value still holding an unexpanded `${VAR}` placeholder is treated as unset.
fn configured(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.contains("${"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_config(access_key: Option<&str>, secret_key: Option<&str>) -> StoreConfig {
        StoreConfig {
            access_key: access_key.map(String::from),
            secret_key: secret_key.map(String::from),
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_credentials_with_session_token() {
        let creds = Credentials::with_session_token("access", "secret", "token");
        assert_eq!(creds.access_key_id(), "access");
        assert_eq!(creds.secret_access_key(), "secret");
        assert_eq!(creds.session_token(), Some("token"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials::new("AKIDEXAMPLE", "super-secret");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("AKIDEXAMPLE"));
        assert!(!printed.contains("super-secret"));
    }

    #[test]
    fn test_from_config_missing_secret_key() {
        let config = store_config(Some("access"), None);
        assert!(CredentialsProvider::from_config(&config).is_err());
    }

    #[test]
    fn test_from_config_rejects_unexpanded_placeholder() {
        let config = store_config(Some("${STORE_ACCESS_KEY}"), Some("secret"));
        assert!(CredentialsProvider::from_config(&config).is_err());
    }

    #[test]
    fn test_from_config_success() {
        let config = store_config(Some("config-access"), Some("config-secret"));
        let creds = CredentialsProvider::from_config(&config).unwrap();
        assert_eq!(creds.access_key_id(), "config-access");
        assert_eq!(creds.secret_access_key(), "config-secret");
    }
}
