//! HTTP server module
//!
//! Accepts upload and history requests and hands them to the [`Relay`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/upload` | Relay the multipart file part named `file` |
//! | `GET` | `/api/history` | Upload history, most recent first |
//! | `GET` | `/health` | Liveness probe, returns `ok` |
//! | `GET` | `/metrics` | Prometheus metrics (when enabled) |
//!
//! The server is built on `hyper` and `tokio`: one task per connection, so a
//! slow backend call or a dropped client only affects its own request.

use crate::backend::{BackendClient, BackendClientConfig, BackendError, ResponseInterpreter};
use crate::config::{Config, ConfigError};
use crate::history::{SqliteHistory, StoreError};
use crate::location::PublicUrlBuilder;
use crate::metrics;
use crate::relay::{InboundUpload, Relay, RelayOutcome};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Multipart field the caller's file is read from
pub const FILE_FIELD: &str = "file";

/// How long in-flight requests get to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Server error: {0}")]
    RuntimeError(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors in the shape of the inbound request itself
#[derive(Error, Debug)]
enum InboundError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Upload exceeds the limit of {0} bytes")]
    PayloadTooLarge(u64),
}

impl InboundError {
    fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::PayloadTooLarge(_) => "payload_too_large",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

/// State shared by every connection
struct AppState {
    relay: Relay,
    max_upload_bytes: u64,
    metrics_enabled: bool,
}

/// HTTP server for the relay
pub struct Server {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
    history: Option<SqliteHistory>,
}

impl Server {
    /// Build the relay from configuration and bind the listener
    ///
    /// Opens (and if needed creates) the history database before binding.
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let history = SqliteHistory::open(&config.store.path, config.store.max_connections).await?;
        let backend = BackendClient::new(BackendClientConfig::from(&config.relay))?;
        info!(endpoint = %backend.endpoint(), "Backend client configured");

        let relay = Relay::new(
            Arc::new(backend),
            ResponseInterpreter::default(),
            PublicUrlBuilder::new(config.relay.base()?),
            Arc::new(history.clone()),
        );

        let mut server = Self::with_relay(&config, relay).await?;
        server.history = Some(history);
        Ok(server)
    }

    /// Bind the listener around an already assembled relay
    ///
    /// If port 0 is configured the OS picks a free port, see [`Server::local_addr`].
    pub async fn with_relay(config: &Config, relay: Relay) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        // Get actual bound address (important for port 0)
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Server bound to {}", local_addr);

        Ok(Self {
            state: Arc::new(AppState {
                relay,
                max_upload_bytes: config.server.max_upload_bytes,
                metrics_enabled: config.metrics.enabled,
            }),
            listener,
            local_addr,
            history: None,
        })
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run until Ctrl-C
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves
    ///
    /// Each connection is served on its own task. Connection errors are
    /// logged and never stop the accept loop. After `shutdown` resolves no
    /// new connections are accepted and in-flight requests get a grace
    /// period to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!("Starting relay server on {}", self.local_addr);

        let graceful = GracefulShutdown::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let state = Arc::clone(&self.state);
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(req, state).await }
                    });

                    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                    let conn = graceful.watch(conn);

                    tokio::spawn(async move {
                        if let Err(e) = conn.await {
                            warn!("Error serving connection from {}: {}", peer_addr, e);
                        }
                    });
                }
            }
        }

        tokio::select! {
            _ = graceful.shutdown() => info!("All connections closed"),
            _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
                warn!("Shutdown grace period elapsed with connections still open");
            }
        }

        if let Some(history) = self.history {
            history.close().await;
        }

        info!("Shutting down server");
        Ok(())
    }
}

/// Route one request
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    tracing::debug!("Handling {} {}", method, path);

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        (&Method::GET, "/metrics") if state.metrics_enabled => metrics_response(),
        (&Method::POST, "/api/upload") => upload_handler(req, &state).await,
        (&Method::GET, "/api/history") => history_handler(&state).await,
        (_, "/api/upload") => method_not_allowed("POST"),
        (_, "/api/history") => method_not_allowed("GET"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

async fn upload_handler(req: Request<Incoming>, state: &AppState) -> Response<Full<Bytes>> {
    let upload = match read_upload(req, state.max_upload_bytes).await {
        Ok(upload) => upload,
        Err(e) => {
            info!(kind = e.kind(), "Rejected upload request: {}", e);
            metrics::record_error(e.kind());
            return json_response(
                e.status_code(),
                &RelayOutcome::Failure {
                    kind: e.kind().to_string(),
                    detail: e.to_string(),
                },
            );
        }
    };

    let result = state.relay.relay(upload).await;
    let status = match result {
        Ok(_) => StatusCode::OK,
        Err(ref e) => e.status_code(),
    };
    json_response(status, &RelayOutcome::from(&result))
}

async fn history_handler(state: &AppState) -> Response<Full<Bytes>> {
    match state.relay.history().await {
        Ok(entries) => json_response(StatusCode::OK, &entries),
        Err(e) => {
            error!(kind = e.kind(), error = %e, "Failed to list history");
            json_response(
                e.status_code(),
                &RelayOutcome::Failure {
                    kind: e.kind().to_string(),
                    detail: e.client_message(),
                },
            )
        }
    }
}

/// Pull the `file` part out of a multipart request
async fn read_upload<B>(req: Request<B>, limit: u64) -> Result<InboundUpload, InboundError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let boundary = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| multer::parse_boundary(ct).ok())
        .ok_or_else(|| InboundError::InvalidRequest("Expected a multipart/form-data body".into()))?;

    let body = Limited::new(req.into_body(), usize::try_from(limit).unwrap_or(usize::MAX))
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                InboundError::PayloadTooLarge(limit)
            } else {
                InboundError::InvalidRequest(format!("Failed to read body: {}", e))
            }
        })?
        .to_bytes();

    let stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| InboundError::InvalidRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(|mime| mime.to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| InboundError::InvalidRequest(format!("Failed to read file part: {}", e)))?;

        return Ok(InboundUpload {
            filename,
            content_type,
            bytes,
        });
    }

    Err(InboundError::InvalidRequest(format!(
        "Missing multipart field '{}'",
        FILE_FIELD
    )))
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    response(
        status,
        "text/plain; charset=utf-8",
        Bytes::from_static(body.as_bytes()),
    )
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => response(status, "application/json", Bytes::from(body)),
        Err(e) => {
            error!("Failed to encode response: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}

fn metrics_response() -> Response<Full<Bytes>> {
    match metrics::render() {
        Ok((content_type, body)) => {
            let mut resp = response(StatusCode::OK, "text/plain", Bytes::from(body));
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                resp.headers_mut().insert(CONTENT_TYPE, value);
            }
            resp
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics")
        }
    }
}

fn method_not_allowed(allow: &'static str) -> Response<Full<Bytes>> {
    let mut resp = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    resp.headers_mut()
        .insert(ALLOW, HeaderValue::from_static(allow));
    resp
}

fn response(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}
