//! Backend client module
//!
//! Forwards a single file to the tgState upload endpoint.
//!
//! # Wire format
//!
//! - `POST <endpoint>` with a `multipart/form-data` body holding one field
//!   named `image` that carries the filename, bytes and content type
//! - the configured secret travels in a cookie named `p`
//! - `307`/`308` redirects are followed by re-posting the same upload to the
//!   new location, up to 10 hops. The cookie is only sent to the endpoint's
//!   own origin. Any other redirect status is an error
//! - each request is bounded by a timeout
//! - exactly one attempt per call, no retries
//!
//! # Example
//!
//! ```no_run
//! use tgstate_relay::backend::{BackendClient, BackendClientConfig, UploadBackend};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = BackendClient::new(BackendClientConfig {
//!     endpoint: "https://files.example.com/api".to_string(),
//!     secret: Some("s3cret".to_string()),
//!     timeout: std::time::Duration::from_secs(60),
//! })?;
//!
//! let response = client
//!     .send("cat.jpg", Bytes::from_static(b"..."), "image/jpeg")
//!     .await?;
//! println!("status {}", response.status);
//! # Ok(())
//! # }
//! ```

pub mod reply;

pub use reply::{DiagnosticsSink, InterpretError, ResponseInterpreter, TracingSink};

use crate::config::RelayConfig;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, COOKIE, LOCATION};
use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use std::time::Duration;
use thiserror::Error;

/// Multipart field name the backend reads the upload from
pub const UPLOAD_FIELD: &str = "image";

/// Cookie carrying the backend secret
pub const SECRET_COOKIE: &str = "p";

/// Content type used when the caller did not declare a usable one
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Maximum number of redirects followed for one upload
const MAX_REDIRECTS: usize = 10;

/// Backend client errors
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Connection, DNS or timeout failure. The backend was never heard from.
    #[error("Backend unreachable: {message}")]
    Transport { message: String, timed_out: bool },

    #[error("Backend returned HTTP {code}")]
    Status { code: u16 },
}

impl BackendError {
    fn transport(err: reqwest::Error) -> Self {
        Self::Transport {
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

/// Raw reply of a successful (non-error status) backend exchange
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Anything able to forward one upload to the file host
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UploadBackend: Send + Sync {
    /// Send one file and return the raw reply
    async fn send(
        &self,
        filename: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<BackendResponse, BackendError>;
}

/// Backend client configuration
#[derive(Debug, Clone)]
pub struct BackendClientConfig {
    pub endpoint: String,
    pub secret: Option<String>,
    pub timeout: Duration,
}

impl From<&RelayConfig> for BackendClientConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            endpoint: config.endpoint(),
            secret: config.secret().map(str::to_string),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// HTTP client for the tgState upload endpoint
pub struct BackendClient {
    config: BackendClientConfig,
    endpoint: Url,
    http_client: reqwest::Client,
}

impl BackendClient {
    /// Create a new backend client
    pub fn new(config: BackendClientConfig) -> Result<Self, BackendError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            BackendError::ConfigError(format!("Invalid endpoint '{}': {}", config.endpoint, e))
        })?;

        // Redirects are followed in `send`, the streamed form cannot be replayed by reqwest.
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::ConfigError(e.to_string()))?;

        Ok(Self {
            config,
            endpoint,
            http_client,
        })
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Whether the secret cookie may be sent to `target`
    fn shares_origin(&self, target: &Url) -> bool {
        target.origin() == self.endpoint.origin()
    }

    fn upload_part(filename: &str, body: Bytes, declared: &str) -> Part {
        let part = Part::stream_with_length(body.clone(), body.len() as u64)
            .file_name(filename.to_string());

        match part.mime_str(declared) {
            Ok(part) => part,
            Err(e) => {
                tracing::warn!(
                    content_type = %declared,
                    error = %e,
                    "Declared content type is not a valid MIME type, sending as binary"
                );
                Part::stream_with_length(body.clone(), body.len() as u64)
                    .file_name(filename.to_string())
                    .mime_str(FALLBACK_CONTENT_TYPE)
                    .unwrap_or_else(|_| Part::stream(body).file_name(filename.to_string()))
            }
        }
    }
}

#[async_trait]
impl UploadBackend for BackendClient {
    /// Upload one file to the backend
    ///
    /// # Tracing
    ///
    /// Creates a span named `backend.upload` with attributes:
    /// - `backend.endpoint` - Upload endpoint
    /// - `upload.filename` - Caller supplied filename
    /// - `upload.bytes` - Size of the body
    /// - `http.status_code` - HTTP status code (recorded after the call)
    #[tracing::instrument(
        name = "backend.upload",
        skip(self, body),
        fields(
            backend.endpoint = %self.config.endpoint,
            upload.filename = %filename,
            upload.bytes = body.len(),
            http.content_type = %content_type,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn send(
        &self,
        filename: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<BackendResponse, BackendError> {
        let mut target = self.endpoint.clone();
        let mut hops = 0;

        loop {
            let form = Form::new().part(
                UPLOAD_FIELD,
                Self::upload_part(filename, body.clone(), content_type),
            );

            let mut request = self.http_client.post(target.clone()).multipart(form);
            if let Some(ref secret) = self.config.secret {
                if self.shares_origin(&target) {
                    request = request.header(COOKIE, format!("{}={}", SECRET_COOKIE, secret));
                }
            }

            tracing::debug!(target_url = %target, hop = hops, "Sending upload to backend");

            let response = request.send().await.map_err(BackendError::transport)?;
            let status = response.status();
            tracing::Span::current().record("http.status_code", status.as_u16());

            if status.is_redirection() {
                match redirect_target(&target, status, response.headers()) {
                    Some(next) if hops < MAX_REDIRECTS => {
                        tracing::debug!(status = status.as_u16(), location = %next, "Following backend redirect");
                        target = next;
                        hops += 1;
                        continue;
                    }
                    next => {
                        tracing::warn!(
                            status = status.as_u16(),
                            hops,
                            location = ?next.as_ref().map(Url::as_str),
                            "Backend redirect not followed"
                        );
                        return Err(BackendError::Status {
                            code: status.as_u16(),
                        });
                    }
                }
            }

            let payload = response.bytes().await.map_err(BackendError::transport)?;

            if status.is_client_error() || status.is_server_error() {
                tracing::warn!(
                    status = status.as_u16(),
                    body_prefix = %reply::bounded_prefix(&payload),
                    "Backend returned error status"
                );
                return Err(BackendError::Status {
                    code: status.as_u16(),
                });
            }

            tracing::debug!(
                status = status.as_u16(),
                bytes = payload.len(),
                "Backend reply received"
            );

            return Ok(BackendResponse {
                status: status.as_u16(),
                body: payload,
            });
        }
    }
}

/// Location to re-post the upload to, for redirects that keep method and body
fn redirect_target(current: &Url, status: StatusCode, headers: &HeaderMap) -> Option<Url> {
    if status != StatusCode::TEMPORARY_REDIRECT && status != StatusCode::PERMANENT_REDIRECT {
        return None;
    }
    let location = headers.get(LOCATION)?.to_str().ok()?;
    current.join(location).ok()
}
