//! patentqa - terminal client for the patent RAG backend
//!
//! The core is `controller::QueryController`: one in-flight query at a time,
//! a hard timeout per exchange, sanitized answers, and the last ten
//! exchanges kept for replay.

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod history;
pub mod logging;
pub mod orchestrator;
pub mod sanitize;
pub mod session;

pub use client::{HttpBackend, InferenceBackend};
pub use controller::QueryController;
pub use error::{BackendError, ErrorInfo, ErrorKind, Rejection};
pub use history::{EntryId, HistoryCache, HistoryEntry, HISTORY_CAPACITY};
pub use orchestrator::{ExchangeOutcome, Orchestrator, DEFAULT_TIMEOUT};
pub use session::{Phase, SessionState};
