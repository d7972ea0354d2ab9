//! Endpoint router
//!
//! Maps request paths to the upload policy configured for them. Paths match
//! exactly, ignoring a trailing slash.

use crate::config::EndpointConfig;
use crate::upload::UploadPolicy;
use hyper::Method;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub const HEALTH_PATH: &str = "/health";

/// Router errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouterError {
    #[error("Not Found")]
    NotFound(String),

    #[error("Method Not Allowed")]
    MethodNotAllowed(Method),
}

/// Where a request goes
#[derive(Debug, Clone)]
pub enum Route {
    Health,
    Upload(Arc<UploadPolicy>),
}

#[derive(Debug, Clone, Default)]
pub struct EndpointRouter {
    endpoints: HashMap<String, Arc<UploadPolicy>>,
}

impl EndpointRouter {
    pub fn new(endpoints: &[EndpointConfig]) -> Self {
        let endpoints = endpoints
            .iter()
            .map(|endpoint| {
                (
                    normalize(&endpoint.path).to_string(),
                    Arc::new(UploadPolicy::from_preset(endpoint.policy)),
                )
            })
            .collect();
        Self { endpoints }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn route(&self, method: &Method, path: &str) -> Result<Route, RouterError> {
        let path = normalize(path);

        if path == HEALTH_PATH {
            return match *method {
                Method::GET => Ok(Route::Health),
                _ => Err(RouterError::MethodNotAllowed(method.clone())),
            };
        }

        match self.endpoints.get(path) {
            Some(policy) if *method == Method::POST => Ok(Route::Upload(Arc::clone(policy))),
            Some(_) => Err(RouterError::MethodNotAllowed(method.clone())),
            None => Err(RouterError::NotFound(path.to_string())),
        }
    }
}

fn normalize(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PolicyPreset};

    fn router() -> EndpointRouter {
        EndpointRouter::new(&Config::default().endpoints)
    }

    #[test]
    fn test_default_endpoints() {
        let router = router();
        assert_eq!(router.len(), 3);

        match router.route(&Method::POST, "/api/master-photo-upload").unwrap() {
            Route::Upload(policy) => assert_eq!(policy.label, "master_photo"),
            Route::Health => panic!("expected upload route"),
        }
    }

    #[test]
    fn test_trailing_slash() {
        assert!(matches!(
            router().route(&Method::POST, "/api/upload/"),
            Ok(Route::Upload(_))
        ));
    }

    #[test]
    fn test_prefix_does_not_match() {
        assert_eq!(
            router().route(&Method::POST, "/api/upload/extra").unwrap_err(),
            RouterError::NotFound("/api/upload/extra".into())
        );
    }

    #[test]
    fn test_wrong_method() {
        assert_eq!(
            router().route(&Method::GET, "/api/file-upload").unwrap_err(),
            RouterError::MethodNotAllowed(Method::GET)
        );
        assert!(router().route(&Method::POST, "/health").is_err());
    }

    #[test]
    fn test_health() {
        assert!(matches!(router().route(&Method::GET, "/health"), Ok(Route::Health)));
    }

    #[test]
    fn test_custom_endpoint() {
        let router = EndpointRouter::new(&[EndpointConfig::new("/photos", PolicyPreset::Named)]);
        assert!(matches!(
            router.route(&Method::POST, "/photos"),
            Ok(Route::Upload(ref p)) if p.label == "named"
        ));
        assert!(router.route(&Method::POST, "/api/upload").is_err());
    }
}
