//! Exchange orchestration
//!
//! Runs one query against the backend, racing it against a hard timeout and
//! the exchange's cancellation token, and classifies how it ended.
//! Whichever side loses the race is dropped: a timed-out call is aborted and
//! its token cancelled, a finished call simply never sees the timer fire.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::InferenceBackend;
use crate::error::{ErrorInfo, ErrorKind};
use crate::sanitize::sanitize_response;

/// Hard limit on a single exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// How an exchange ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Sanitized answer text
    Completed(String),
    Failed(ErrorInfo),
    /// Cancelled from outside; the result must not be applied
    Cancelled,
}

/// Executes exchanges against one backend
#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn InferenceBackend>,
    timeout: Duration,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn InferenceBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one exchange. On timeout `cancel` is fired before returning.
    pub async fn run(&self, query: &str, cancel: &CancellationToken) -> ExchangeOutcome {
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("exchange cancelled before completion");
                return ExchangeOutcome::Cancelled;
            }
            res = tokio::time::timeout(self.timeout, self.backend.query(query)) => res,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Err(_) => {
                cancel.cancel();
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "exchange timed out");
                ExchangeOutcome::Failed(ErrorInfo::new(ErrorKind::Timeout))
            }
            Ok(Ok(raw)) => {
                let text = sanitize_response(&raw);
                tracing::info!(elapsed_ms, chars = text.len(), "exchange completed");
                ExchangeOutcome::Completed(text)
            }
            Ok(Err(err)) => {
                tracing::warn!(elapsed_ms, error = %err, "exchange failed");
                ExchangeOutcome::Failed(ErrorInfo::from(&err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Sets its flag when dropped, i.e. when the in-flight call is abandoned
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    enum Script {
        Reply(&'static str),
        Fail(u16),
        Malformed,
        Hang(Arc<AtomicBool>),
    }

    struct ScriptedBackend(Script);

    #[async_trait]
    impl InferenceBackend for ScriptedBackend {
        async fn query(&self, _user_query: &str) -> Result<String, BackendError> {
            match &self.0 {
                Script::Reply(text) => Ok(text.to_string()),
                Script::Fail(status) => Err(BackendError::Status {
                    status: *status,
                    body: String::new(),
                }),
                Script::Malformed => Err(BackendError::Malformed("missing `response` field".into())),
                Script::Hang(dropped) => {
                    let _guard = DropFlag(dropped.clone());
                    std::future::pending().await
                }
            }
        }
    }

    fn orchestrator(script: Script) -> Orchestrator {
        Orchestrator::new(Arc::new(ScriptedBackend(script)), DEFAULT_TIMEOUT)
    }

    #[tokio::test]
    async fn test_success_is_sanitized() {
        let token = CancellationToken::new();
        let outcome = orchestrator(Script::Reply("<inference>A patent is...\n"))
            .run("What is a patent?", &token)
            .await;
        assert_eq!(outcome, ExchangeOutcome::Completed("A patent is...".into()));
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_http_failure_is_backend_unavailable() {
        let token = CancellationToken::new();
        let outcome = orchestrator(Script::Fail(500)).run("q", &token).await;
        assert_eq!(
            outcome,
            ExchangeOutcome::Failed(ErrorInfo::new(ErrorKind::BackendUnavailable))
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_is_classified() {
        let token = CancellationToken::new();
        let outcome = orchestrator(Script::Malformed).run("q", &token).await;
        match outcome {
            ExchangeOutcome::Failed(info) => {
                assert_eq!(info.kind, ErrorKind::MalformedResponse);
                assert_eq!(info.message, ErrorKind::BackendUnavailable.message());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_call_and_fires_token() {
        let dropped = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let outcome = orchestrator(Script::Hang(dropped.clone()))
            .run("q", &token)
            .await;

        assert_eq!(outcome, ExchangeOutcome::Failed(ErrorInfo::new(ErrorKind::Timeout)));
        assert!(token.is_cancelled());
        assert!(dropped.load(Ordering::SeqCst), "in-flight call was not aborted");
        let waited = started.elapsed();
        assert!(waited >= DEFAULT_TIMEOUT && waited < DEFAULT_TIMEOUT + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel_wins() {
        let dropped = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();
        let orch = orchestrator(Script::Hang(dropped.clone()));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        assert_eq!(orch.run("q", &token).await, ExchangeOutcome::Cancelled);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
