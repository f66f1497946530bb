//! Backend reply interpretation
//!
//! The backend answers a successful exchange with a JSON object:
//!
//! ```json
//! {"code": 1, "message": "https://files.example.com/d/abc123"}
//! ```
//!
//! `code == 1` means the upload was stored and `message` is its location.
//! Any other code is a rejection and `message` explains why.

use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Number of characters of a raw reply kept for diagnostics
pub const DIAGNOSTIC_PREFIX_LEN: usize = 200;

/// Code the backend uses to signal success
const SUCCESS_CODE: f64 = 1.0;

/// Reply interpretation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpretError {
    #[error("Backend returned an empty response")]
    EmptyResponse,

    #[error("Backend returned a malformed response")]
    MalformedResponse { raw_prefix: String },

    #[error("Backend rejected the upload: {message}")]
    BackendRejected { message: String },

    #[error("Backend reported success without a file location")]
    NoLocation,
}

impl InterpretError {
    /// Machine readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyResponse => "empty_response",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::BackendRejected { .. } => "backend_rejected",
            Self::NoLocation => "no_location",
        }
    }
}

/// Receives interpretation failures for server-side diagnostics
pub trait DiagnosticsSink: Send + Sync {
    /// Called once per failed interpretation with a bounded raw prefix
    fn record(&self, failure: &InterpretError, raw_prefix: &str);
}

/// Default sink: one structured log line per failure
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, failure: &InterpretError, raw_prefix: &str) {
        tracing::warn!(
            kind = failure.kind(),
            raw_prefix = %raw_prefix,
            "Backend reply could not be used"
        );
    }
}

/// First [`DIAGNOSTIC_PREFIX_LEN`] characters of a raw body, lossily decoded
pub fn bounded_prefix(raw: &[u8]) -> String {
    // Never decode more bytes than the longest possible prefix.
    let window = &raw[..raw.len().min(DIAGNOSTIC_PREFIX_LEN * 4)];
    String::from_utf8_lossy(window)
        .chars()
        .take(DIAGNOSTIC_PREFIX_LEN)
        .collect()
}

/// Turns a raw backend body into a file location
#[derive(Clone)]
pub struct ResponseInterpreter {
    sink: Arc<dyn DiagnosticsSink>,
}

impl Default for ResponseInterpreter {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl ResponseInterpreter {
    /// Create an interpreter reporting failures to `sink`
    pub fn new(sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self { sink }
    }

    /// Extract the location from a backend body
    pub fn interpret(&self, raw: &[u8]) -> Result<String, InterpretError> {
        let result = parse_reply(raw);
        if let Err(ref failure) = result {
            self.sink.record(failure, &bounded_prefix(raw));
        }
        result
    }
}

fn parse_reply(raw: &[u8]) -> Result<String, InterpretError> {
    if raw.is_empty() {
        return Err(InterpretError::EmptyResponse);
    }

    let reply: Value = serde_json::from_slice(raw).map_err(|_| malformed(raw))?;
    let Value::Object(fields) = reply else {
        return Err(malformed(raw));
    };

    let succeeded = fields
        .get("code")
        .and_then(Value::as_f64)
        .is_some_and(|code| code == SUCCESS_CODE);

    if !succeeded {
        let message = match fields.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "unknown error".to_string(),
            Some(other) => other.to_string(),
        };
        return Err(InterpretError::BackendRejected { message });
    }

    match fields.get("message") {
        Some(Value::String(location)) if !location.trim().is_empty() => Ok(location.clone()),
        _ => Err(InterpretError::NoLocation),
    }
}

fn malformed(raw: &[u8]) -> InterpretError {
    InterpretError::MalformedResponse {
        raw_prefix: bounded_prefix(raw),
    }
}
