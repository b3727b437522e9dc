//! Error types for the query session
//!
//! - `BackendError`: what went wrong talking to the inference endpoint
//! - `ErrorKind` / `ErrorInfo`: what the user gets told
//! - `Rejection`: why a submission or selection was not accepted

use serde::Serialize;

pub const TIMEOUT_MESSAGE: &str = "Request timed out. Please try again.";
pub const BACKEND_UNAVAILABLE_MESSAGE: &str =
    "Error contacting backend. Please make sure the server is running.";

/// Failure of a single call to the inference endpoint
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// User-facing classification of this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Malformed(_) => ErrorKind::MalformedResponse,
            _ => ErrorKind::BackendUnavailable,
        }
    }
}

/// Classification of a failed exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    BackendUnavailable,
    MalformedResponse,
}

impl ErrorKind {
    /// Message shown to the user. Malformed payloads read the same as an
    /// unreachable backend.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => TIMEOUT_MESSAGE,
            ErrorKind::BackendUnavailable | ErrorKind::MalformedResponse => {
                BACKEND_UNAVAILABLE_MESSAGE
            }
        }
    }
}

/// Error surfaced in the session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
        }
    }
}

impl From<&BackendError> for ErrorInfo {
    fn from(err: &BackendError) -> Self {
        ErrorInfo::new(err.kind())
    }
}

/// Why the controller refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("query is empty")]
    EmptyQuery,
    #[error("an exchange is already in flight")]
    Busy,
}
