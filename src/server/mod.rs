//! HTTP server module
//!
//! Plain `hyper` 1.x over `tokio`: one http1 connection task per accepted
//! socket, requests routed through [`EndpointRouter`]. Upload bodies are
//! handed to the pipeline as a stream, never collected.
//!
//! # Example
//!
//! ```no_run
//! use formdrop::config::Config;
//! use formdrop::server::UploadServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = UploadServer::new(Config::default()).await?;
//! println!("Server bound to: {}", server.local_addr());
//! server.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::router::{EndpointRouter, Route, RouterError};
use crate::store::{self, ObjectStore, StoreError};
use crate::upload::{UploadRequest, UploadService};
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, Instrument};
use uuid::Uuid;

/// Correlates a response with its log lines
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
}

/// Shared by every connection
struct AppState {
    router: EndpointRouter,
    uploads: UploadService,
}

/// Upload HTTP server
pub struct UploadServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<AppState>,
}

impl UploadServer {
    /// Bind to the configured address and build the configured store
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let store = store::build_store(config.store.as_ref())?;
        Self::with_store(&config, store).await
    }

    /// Bind with an explicit store; `None` serves the configuration error
    pub async fn with_store(
        config: &Config,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        // Actual address matters for port 0
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        let state = AppState {
            router: EndpointRouter::new(&config.endpoints),
            uploads: UploadService::new(store),
        };
        info!(
            address = %local_addr,
            endpoints = state.router.len(),
            store_configured = state.uploads.is_configured(),
            "Server bound"
        );

        Ok(Self {
            listener,
            local_addr,
            state: Arc::new(state),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the process is stopped
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves. Connections already accepted keep
    /// running to completion.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(address = %self.local_addr, "Accepting connections");

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down server");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(req, state).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!(peer = %peer_addr, error = %e, "Error serving connection");
                }
            });
        }
    }
}

async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string();
    let span = tracing::info_span!("http.request", request_id = %request_id);

    let mut response = dispatch(req, state, method, path).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    Ok(response)
}

async fn dispatch<B>(
    req: Request<B>,
    state: Arc<AppState>,
    method: hyper::Method,
    path: String,
) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match state.router.route(&method, &path) {
        Ok(Route::Health) => text_response(StatusCode::OK, "ok"),
        Ok(Route::Upload(policy)) => {
            info!(method = %method, path = %path, policy = %policy.label, "Handling upload");

            let (parts, body) = req.into_parts();
            let body = TryStreamExt::map_err(body.into_data_stream(), std::io::Error::other);
            let request = UploadRequest::from_stream(parts.headers, body);

            let outcome = state.uploads.handle(&policy, request).await;
            text_response(outcome.status, outcome.body)
        }
        Err(e @ RouterError::NotFound(_)) => {
            info!(method = %method, path = %path, "No endpoint for path");
            text_response(StatusCode::NOT_FOUND, e.to_string())
        }
        Err(e @ RouterError::MethodNotAllowed(_)) => {
            text_response(StatusCode::METHOD_NOT_ALLOWED, e.to_string())
        }
    }
}

/// `text/plain` response
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
