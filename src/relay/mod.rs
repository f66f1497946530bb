//! Relay orchestrator
//!
//! Drives one upload through the pipeline:
//!
//! ```text
//! Received -> Validated -> Forwarded -> Interpreted -> Normalized -> Persisted -> Completed
//! ```
//!
//! Any stage after `Received` may fail. A failure aborts the relay, nothing
//! is written to history, and the caller gets a single [`RelayError`] with a
//! machine readable kind and a message that never includes raw backend
//! output.

use crate::backend::{
    BackendError, InterpretError, ResponseInterpreter, UploadBackend, FALLBACK_CONTENT_TYPE,
};
use crate::history::{HistoryStore, StoreError};
use crate::location::{self, LocationError, PublicUrlBuilder};
use crate::metrics;
use bytes::Bytes;
use chrono::NaiveDateTime;
use hyper::StatusCode;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Pipeline stages of a single relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayStage {
    Received,
    Validated,
    Forwarded,
    Interpreted,
    Normalized,
    Persisted,
    Completed,
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Forwarded => "forwarded",
            Self::Interpreted => "interpreted",
            Self::Normalized => "normalized",
            Self::Persisted => "persisted",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Interpret(#[from] InterpretError),

    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RelayError {
    /// Stage at which the relay stopped
    pub fn stage(&self) -> RelayStage {
        match self {
            Self::Validation(_) => RelayStage::Validated,
            Self::Backend(_) => RelayStage::Forwarded,
            Self::Interpret(_) => RelayStage::Interpreted,
            Self::Location(_) => RelayStage::Normalized,
            Self::Store(_) => RelayStage::Persisted,
        }
    }

    /// Machine readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Backend(BackendError::Transport { .. }) => "transport_error",
            Self::Backend(BackendError::Status { .. }) => "backend_status_error",
            Self::Backend(BackendError::ConfigError(_)) => "backend_config_error",
            Self::Interpret(e) => e.kind(),
            Self::Location(_) => "invalid_location",
            Self::Store(_) => "store_error",
        }
    }

    /// HTTP status presented to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Backend(BackendError::Transport { .. }) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether retrying the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(BackendError::Transport { .. }))
    }

    /// Message safe to hand to the caller
    pub fn client_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Backend(BackendError::Transport { timed_out: true, .. }) => {
                "Upload backend did not answer in time".to_string()
            }
            Self::Backend(BackendError::Transport { .. }) => {
                "Failed to connect to the upload backend".to_string()
            }
            Self::Backend(BackendError::Status { code }) => {
                format!("Upload backend returned an error: HTTP {}", code)
            }
            Self::Backend(BackendError::ConfigError(_)) => {
                "Upload backend is misconfigured".to_string()
            }
            Self::Interpret(InterpretError::EmptyResponse) => {
                "Upload backend returned an empty response, check the backend endpoint".to_string()
            }
            Self::Interpret(InterpretError::MalformedResponse { .. }) => {
                "Upload backend returned an unreadable response, check the backend endpoint"
                    .to_string()
            }
            Self::Interpret(InterpretError::BackendRejected { message }) => {
                format!("Upload backend rejected the file: {}", message)
            }
            Self::Interpret(InterpretError::NoLocation) => {
                "Upload backend did not return a file link".to_string()
            }
            Self::Location(_) => "Upload backend returned an unusable file link".to_string(),
            Self::Store(_) => "Failed to record the upload".to_string(),
        }
    }
}

/// A file received from a caller
#[derive(Debug, Clone)]
pub struct InboundUpload {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Successful relay result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayReceipt {
    pub filename: String,
    pub url: String,
}

/// Outcome of one relay attempt, as reported to a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RelayOutcome {
    Success { filename: String, url: String },
    Failure { kind: String, detail: String },
}

impl From<&Result<RelayReceipt, RelayError>> for RelayOutcome {
    fn from(result: &Result<RelayReceipt, RelayError>) -> Self {
        match result {
            Ok(receipt) => Self::Success {
                filename: receipt.filename.clone(),
                url: receipt.url.clone(),
            },
            Err(e) => Self::Failure {
                kind: e.kind().to_string(),
                detail: e.client_message(),
            },
        }
    }
}

/// History record as shown to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub filename: String,
    pub url: String,
    pub created_at: NaiveDateTime,
}

/// Whether a MIME type is accepted for relaying
fn is_media_type(mime: &str) -> bool {
    let mime = mime.trim().to_ascii_lowercase();
    mime.starts_with("image/") || mime.starts_with("video/")
}

/// Accept a file when either its extension or its declared type is media
pub fn validate(upload: &InboundUpload) -> Result<(), RelayError> {
    if upload.filename.trim().is_empty() {
        return Err(RelayError::Validation("A file name is required".into()));
    }

    let guessed = mime_guess::from_path(&upload.filename).first();
    let guessed_ok = guessed
        .as_ref()
        .is_some_and(|mime| is_media_type(mime.essence_str()));
    let declared_ok = upload.content_type.as_deref().is_some_and(is_media_type);

    if guessed_ok || declared_ok {
        Ok(())
    } else {
        Err(RelayError::Validation(
            "Only image and video files can be uploaded".into(),
        ))
    }
}

/// Wires the backend, interpreter, normalizer and history together
#[derive(Clone)]
pub struct Relay {
    backend: Arc<dyn UploadBackend>,
    interpreter: ResponseInterpreter,
    urls: PublicUrlBuilder,
    history: Arc<dyn HistoryStore>,
}

impl Relay {
    /// Create a new relay
    pub fn new(
        backend: Arc<dyn UploadBackend>,
        interpreter: ResponseInterpreter,
        urls: PublicUrlBuilder,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            backend,
            interpreter,
            urls,
            history,
        }
    }

    /// Relay one upload and return its public URL
    #[tracing::instrument(
        name = "relay.upload",
        skip(self, upload),
        fields(
            request_id = %uuid::Uuid::new_v4(),
            upload.filename = %upload.filename,
            upload.bytes = upload.bytes.len(),
            relay.stage = tracing::field::Empty
        )
    )]
    pub async fn relay(&self, upload: InboundUpload) -> Result<RelayReceipt, RelayError> {
        let start_time = Instant::now();
        let bytes = upload.bytes.len() as u64;

        let result = self.run(upload).await;
        metrics::record_upload_duration(start_time.elapsed().as_secs_f64());

        match result {
            Ok(ref receipt) => {
                metrics::record_upload_success(bytes);
                tracing::Span::current()
                    .record("relay.stage", tracing::field::display(RelayStage::Completed));
                tracing::info!(url = %receipt.url, "Relay completed");
            }
            Err(ref e) => {
                metrics::record_upload_failure();
                metrics::record_error(e.kind());
                tracing::Span::current().record("relay.stage", tracing::field::display(e.stage()));
                if e.status_code().is_client_error() {
                    tracing::info!(kind = e.kind(), error = %e, "Relay refused");
                } else {
                    tracing::error!(kind = e.kind(), stage = %e.stage(), error = %e, "Relay failed");
                }
            }
        }

        result
    }

    async fn run(&self, upload: InboundUpload) -> Result<RelayReceipt, RelayError> {
        tracing::debug!(stage = %RelayStage::Received, content_type = ?upload.content_type);
        validate(&upload)?;
        tracing::debug!(stage = %RelayStage::Validated, "Upload accepted");

        let response = self
            .backend
            .send(
                &upload.filename,
                upload.bytes,
                upload.content_type.as_deref().unwrap_or(FALLBACK_CONTENT_TYPE),
            )
            .await?;
        tracing::debug!(stage = %RelayStage::Forwarded, status = response.status);

        let location = self.interpreter.interpret(&response.body)?;
        tracing::debug!(stage = %RelayStage::Interpreted, location = %location);

        let canonical = location::normalize(&location);
        let url = self.urls.to_public(&canonical)?;
        tracing::debug!(stage = %RelayStage::Normalized, path = %canonical);

        self.history.append(&upload.filename, &canonical).await?;
        tracing::debug!(stage = %RelayStage::Persisted);

        Ok(RelayReceipt {
            filename: upload.filename,
            url,
        })
    }

    /// Upload history with public URLs, most recent first
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, RelayError> {
        let records = self.history.list_all().await?;

        Ok(records
            .into_iter()
            .map(|record| {
                let url = match self.urls.resolve_stored(&record.url) {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::warn!(stored = %record.url, error = %e, "Stored location kept as is");
                        record.url
                    }
                };
                HistoryEntry {
                    filename: record.filename,
                    url,
                    created_at: record.created_at,
                }
            })
            .collect())
    }
}
