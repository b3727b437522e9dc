//! Query session controller
//!
//! Single owner of the session state and the history cache. Front ends call
//! `edit` / `submit` / `select_entry` and render `state()` / `history()`, or
//! watch `subscribe()` for every change.
//!
//! At most one exchange is in flight. Each one carries a cancellation token
//! and a generation number; its result is applied only while that generation
//! is still the registered in-flight exchange, so a late or cancelled
//! exchange can never touch the state or the cache.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::client::InferenceBackend;
use crate::error::Rejection;
use crate::history::{EntryId, HistoryCache, HistoryEntry};
use crate::orchestrator::{ExchangeOutcome, Orchestrator};
use crate::session::SessionState;

struct InFlight {
    generation: u64,
    cancel: CancellationToken,
}

struct Core {
    state: SessionState,
    history: HistoryCache,
    in_flight: Option<InFlight>,
    generation: u64,
}

struct Shared {
    orchestrator: Orchestrator,
    core: Mutex<Core>,
    updates: watch::Sender<SessionState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        // State is only mutated through whole transitions, so a panic
        // elsewhere cannot leave it half-written.
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &SessionState) {
        self.updates.send_replace(state.clone());
    }

    /// Apply a finished exchange if it is still the current one
    fn complete(&self, generation: u64, query: &str, outcome: ExchangeOutcome) {
        let mut core = self.lock();
        if core.in_flight.as_ref().map(|f| f.generation) != Some(generation) {
            tracing::debug!("discarding result of superseded exchange");
            return;
        }
        core.in_flight = None;

        match outcome {
            ExchangeOutcome::Completed(text) => {
                let entry = core.history.record(query, &text);
                tracing::info!(entry = %entry.id, history = core.history.len(), "answer recorded");
                core.state.resolve_success(&entry);
            }
            ExchangeOutcome::Failed(error) => {
                tracing::info!(kind = ?error.kind, "exchange resolved with error");
                core.state.resolve_failure(error);
            }
            ExchangeOutcome::Cancelled => {
                // Only reachable if the token was fired without deregistering.
                tracing::warn!("registered exchange reported cancellation");
                core.state.abandon();
            }
        }
        self.publish(&core.state);
    }
}

/// Handle the front end drives. Dropping it cancels any in-flight exchange.
pub struct QueryController {
    shared: Arc<Shared>,
}

impl QueryController {
    pub fn new(backend: Arc<dyn InferenceBackend>, timeout: Duration) -> Self {
        let state = SessionState::new();
        let (updates, _) = watch::channel(state.clone());
        Self {
            shared: Arc::new(Shared {
                orchestrator: Orchestrator::new(backend, timeout),
                core: Mutex::new(Core {
                    state,
                    history: HistoryCache::new(),
                    in_flight: None,
                    generation: 0,
                }),
                updates,
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.shared.orchestrator.timeout()
    }

    /// Snapshot of the session
    pub fn state(&self) -> SessionState {
        self.shared.lock().state.clone()
    }

    /// Snapshot of the history, most recent last
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.shared.lock().history.to_vec()
    }

    /// Receive every published state
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.updates.subscribe()
    }

    pub fn is_in_flight(&self) -> bool {
        self.shared.lock().in_flight.is_some()
    }

    /// Input text changed
    pub fn edit(&self, text: &str) -> bool {
        let mut core = self.shared.lock();
        let changed = core.state.edit(text);
        if changed {
            self.shared.publish(&core.state);
        }
        changed
    }

    /// Submit `text` as the query.
    ///
    /// Blank text is ignored and a submission during an exchange is refused;
    /// neither changes the state. Otherwise the exchange runs on a spawned
    /// task and the returned handle may simply be dropped.
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, text: &str) -> Result<JoinHandle<()>, Rejection> {
        {
            let core = self.shared.lock();
            if core.in_flight.is_some() || core.state.is_loading {
                return Err(Rejection::Busy);
            }
        }
        if text.trim().is_empty() {
            return Err(Rejection::EmptyQuery);
        }
        self.start(Some(text))
    }

    /// Submit whatever is currently in the input
    pub fn submit_current(&self) -> Result<JoinHandle<()>, Rejection> {
        self.start(None)
    }

    fn start(&self, text: Option<&str>) -> Result<JoinHandle<()>, Rejection> {
        let (query, generation, cancel) = {
            let mut core = self.shared.lock();
            if core.in_flight.is_some() {
                return Err(Rejection::Busy);
            }
            if let Some(text) = text {
                core.state.edit(text);
            }
            let query = core.state.begin_submit()?;

            core.generation += 1;
            let generation = core.generation;
            let cancel = CancellationToken::new();
            core.in_flight = Some(InFlight {
                generation,
                cancel: cancel.clone(),
            });
            self.shared.publish(&core.state);
            (query, generation, cancel)
        };

        tracing::info!(generation, chars = query.len(), "exchange started");

        let shared = Arc::clone(&self.shared);
        let span = tracing::info_span!("exchange", generation);
        let handle = tokio::spawn(
            async move {
                let outcome = shared.orchestrator.run(&query, &cancel).await;
                shared.complete(generation, &query, outcome);
            }
            .instrument(span),
        );
        Ok(handle)
    }

    /// Replay a history entry. No network traffic.
    ///
    /// Returns false if the id is not in the history or an exchange is pending.
    pub fn select_entry(&self, id: EntryId) -> bool {
        let mut guard = self.shared.lock();
        let core = &mut *guard;
        let selected = match core.history.find(id) {
            Some(entry) => core.state.select(entry),
            None => {
                tracing::debug!(entry = %id, "selection of unknown entry ignored");
                false
            }
        };
        if selected {
            self.shared.publish(&core.state);
        }
        selected
    }

    /// Stop the controller, abandoning any in-flight exchange
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for QueryController {
    fn drop(&mut self) {
        let mut core = self.shared.lock();
        if let Some(in_flight) = core.in_flight.take() {
            tracing::debug!(generation = in_flight.generation, "cancelling in-flight exchange");
            in_flight.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, ErrorInfo, ErrorKind};
    use crate::history::HISTORY_CAPACITY;
    use crate::orchestrator::DEFAULT_TIMEOUT;
    use crate::session::Phase;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Clone, Copy)]
    enum Reply {
        Echo,
        Status(u16),
        Hang,
    }

    /// Replies from a script, then echoes. Optionally waits on a gate first.
    struct FakeBackend {
        script: Mutex<VecDeque<Reply>>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        abandoned: Arc<AtomicBool>,
    }

    /// Flags the call as abandoned unless disarmed on the way out
    struct AbandonGuard {
        flag: Arc<AtomicBool>,
        armed: bool,
    }

    impl Drop for AbandonGuard {
        fn drop(&mut self) {
            if self.armed {
                self.flag.store(true, Ordering::SeqCst);
            }
        }
    }

    impl FakeBackend {
        fn scripted(replies: &[Reply]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(replies.iter().copied().collect()),
                calls: AtomicUsize::new(0),
                gate: None,
                abandoned: Arc::new(AtomicBool::new(false)),
            })
        }

        fn echo() -> Arc<Self> {
            Self::scripted(&[])
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                gate: Some(gate),
                abandoned: Arc::new(AtomicBool::new(false)),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn was_abandoned(&self) -> bool {
            self.abandoned.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceBackend for FakeBackend {
        async fn query(&self, user_query: &str) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self.script.lock().unwrap().pop_front().unwrap_or(Reply::Echo);
            let mut guard = AbandonGuard {
                flag: self.abandoned.clone(),
                armed: true,
            };
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let result = match reply {
                Reply::Echo => Ok(format!("<inference>answer to\n\n{}\n", user_query)),
                Reply::Status(status) => Err(BackendError::Status {
                    status,
                    body: "nope".into(),
                }),
                Reply::Hang => std::future::pending().await,
            };
            guard.armed = false;
            result
        }
    }

    fn controller(backend: Arc<FakeBackend>) -> QueryController {
        QueryController::new(backend, DEFAULT_TIMEOUT)
    }

    #[tokio::test]
    async fn test_blank_submit_is_a_no_op() {
        let backend = FakeBackend::echo();
        let ctl = controller(backend.clone());
        let before = ctl.state();

        assert_eq!(ctl.submit("   \t\n").err(), Some(Rejection::EmptyQuery));
        assert_eq!(ctl.submit("").err(), Some(Rejection::EmptyQuery));
        assert_eq!(ctl.submit_current().err(), Some(Rejection::EmptyQuery));

        assert_eq!(ctl.state(), before);
        assert!(!ctl.state().is_loading);
        assert_eq!(backend.calls(), 0);
        assert!(ctl.history().is_empty());
    }

    #[tokio::test]
    async fn test_successful_exchange() {
        let backend = FakeBackend::echo();
        let ctl = controller(backend.clone());

        ctl.submit("  What is a patent?  ").unwrap().await.unwrap();

        let state = ctl.state();
        assert_eq!(state.response_text, "answer to What is a patent?");
        assert_eq!(state.phase, Phase::Resolved);
        assert!(!state.is_loading);
        assert!(state.query_text.is_empty());
        assert!(state.error.is_none());

        let history = ctl.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].query, "What is a patent?");
        assert_eq!(history[0].response, state.response_text);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_submit_current_uses_edited_text() {
        let backend = FakeBackend::echo();
        let ctl = controller(backend);

        assert!(ctl.edit("claims"));
        assert_eq!(ctl.state().phase, Phase::Editing);
        ctl.submit_current().unwrap().await.unwrap();

        assert_eq!(ctl.history()[0].query, "claims");
        assert!(ctl.state().query_text.is_empty());
    }

    #[tokio::test]
    async fn test_pending_while_in_flight() {
        let gate = Arc::new(Notify::new());
        let backend = FakeBackend::gated(gate.clone());
        let ctl = controller(backend);

        let handle = ctl.submit("q").unwrap();
        let state = ctl.state();
        assert!(state.is_loading);
        assert_eq!(state.phase, Phase::Pending);
        assert_eq!(state.query_text, "q");
        assert!(ctl.is_in_flight());
        assert!(!ctl.edit("typing is locked"));

        gate.notify_one();
        handle.await.unwrap();
        assert!(!ctl.state().is_loading);
        assert!(!ctl.is_in_flight());
    }

    #[tokio::test]
    async fn test_rapid_double_submit_runs_once() {
        let gate = Arc::new(Notify::new());
        let backend = FakeBackend::gated(gate.clone());
        let ctl = controller(backend.clone());

        let first = ctl.submit("first").unwrap();
        assert_eq!(ctl.submit("second").err(), Some(Rejection::Busy));
        assert_eq!(ctl.submit_current().err(), Some(Rejection::Busy));

        gate.notify_one();
        first.await.unwrap();

        assert_eq!(backend.calls(), 1);
        let history = ctl.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].query, "first");
    }

    #[tokio::test]
    async fn test_http_failure_sets_error_without_history() {
        let backend = FakeBackend::scripted(&[Reply::Status(503)]);
        let ctl = controller(backend);

        ctl.submit("q").unwrap().await.unwrap();

        let state = ctl.state();
        let error = state.error.expect("error set");
        assert_eq!(error.kind, ErrorKind::BackendUnavailable);
        assert_eq!(
            error.message,
            "Error contacting backend. Please make sure the server is running."
        );
        assert!(state.response_text.is_empty());
        assert!(state.query_text.is_empty());
        assert!(!state.is_loading);
        assert!(ctl.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_sets_error_and_aborts() {
        let backend = FakeBackend::scripted(&[Reply::Hang]);
        let ctl = controller(backend.clone());

        ctl.submit("slow question").unwrap().await.unwrap();

        let state = ctl.state();
        assert_eq!(state.error.map(|e| e.kind), Some(ErrorKind::Timeout));
        assert!(!state.is_loading);
        assert!(ctl.history().is_empty());
        assert!(backend.was_abandoned());
    }

    #[tokio::test]
    async fn test_session_usable_after_failure() {
        let backend = FakeBackend::scripted(&[Reply::Status(500)]);
        let ctl = controller(backend.clone());

        ctl.submit("first try").unwrap().await.unwrap();
        assert!(ctl.state().error.is_some());

        ctl.submit("second try").unwrap().await.unwrap();
        let state = ctl.state();
        assert!(state.error.is_none());
        assert_eq!(state.response_text, "answer to second try");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_history_keeps_last_ten() {
        let ctl = controller(FakeBackend::echo());

        for i in 1..=11 {
            ctl.submit(&format!("q{}", i)).unwrap().await.unwrap();
        }

        let history = ctl.history();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        let queries: Vec<_> = history.iter().map(|e| e.query.clone()).collect();
        let expected: Vec<_> = (2..=11).map(|i| format!("q{}", i)).collect();
        assert_eq!(queries, expected);
    }

    #[tokio::test]
    async fn test_select_entry_replays_and_clears_error() {
        let backend = FakeBackend::scripted(&[Reply::Echo, Reply::Status(500)]);
        let ctl = controller(backend.clone());

        ctl.submit("first").unwrap().await.unwrap();
        let first = ctl.history()[0].clone();
        ctl.submit("second").unwrap().await.unwrap();
        assert!(ctl.state().error.is_some());

        assert!(ctl.select_entry(first.id));
        let state = ctl.state();
        assert_eq!(state.query_text, "first");
        assert_eq!(state.response_text, first.response);
        assert_eq!(state.selected_entry_id, Some(first.id));
        assert_eq!(state.phase, Phase::Resolved);
        assert!(state.error.is_none());
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_select_refused_while_pending() {
        let gate = Arc::new(Notify::new());
        let ctl = controller(FakeBackend::gated(gate.clone()));

        let handle = ctl.submit("one").unwrap();
        gate.notify_one();
        handle.await.unwrap();
        let entry = ctl.history()[0].clone();

        let pending = ctl.submit("two").unwrap();
        assert!(!ctl.select_entry(entry.id));
        assert!(ctl.state().selected_entry_id.is_none());

        gate.notify_one();
        pending.await.unwrap();
        assert!(ctl.select_entry(entry.id));
    }

    #[tokio::test]
    async fn test_select_unknown_entry_is_ignored() {
        let backend = FakeBackend::echo();
        let ctl = controller(backend.clone());
        ctl.submit("q").unwrap().await.unwrap();
        let id = ctl.history()[0].id;
        let other = controller(backend);

        let before = other.state();
        assert!(!other.select_entry(id));
        assert_eq!(other.state(), before);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let gate = Arc::new(Notify::new());
        let ctl = controller(FakeBackend::gated(gate.clone()));
        let mut rx = ctl.subscribe();

        let handle = ctl.submit("q").unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().phase, Phase::Pending);

        gate.notify_one();
        handle.await.unwrap();
        rx.changed().await.unwrap();
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.phase, Phase::Resolved);
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_exchange() {
        let backend = FakeBackend::scripted(&[Reply::Hang]);
        let ctl = controller(backend.clone());

        let handle = ctl.submit("q").unwrap();
        while backend.calls() == 0 {
            tokio::task::yield_now().await;
        }
        ctl.shutdown();

        handle.await.unwrap();
        assert!(backend.was_abandoned());
    }

    #[tokio::test]
    async fn test_deregistered_exchange_result_is_discarded() {
        let gate = Arc::new(Notify::new());
        let backend = FakeBackend::gated(gate.clone());
        let ctl = controller(backend.clone());

        let handle = ctl.submit("late answer").unwrap();
        let detached = ctl.shared.lock().in_flight.take().unwrap();
        let before = ctl.state();
        let mut rx = ctl.subscribe();
        rx.borrow_and_update();

        gate.notify_one();
        handle.await.unwrap();

        assert_eq!(backend.calls(), 1);
        assert!(!detached.cancel.is_cancelled());
        assert!(ctl.history().is_empty());
        let state = ctl.state();
        assert_eq!(state, before);
        assert!(state.response_text.is_empty());
        assert!(state.error.is_none());
        assert!(!rx.has_changed().unwrap());
        assert_eq!(*rx.borrow(), before);
    }

    #[tokio::test]
    async fn test_superseded_generation_cannot_touch_state() {
        let backend = FakeBackend::scripted(&[Reply::Echo, Reply::Hang]);
        let ctl = controller(backend);

        ctl.submit("first").unwrap().await.unwrap();
        let _pending = ctl.submit("second").unwrap();
        let current = ctl.shared.lock().in_flight.as_ref().unwrap().generation;
        let before = ctl.state();

        ctl.shared.complete(
            current - 1,
            "first",
            ExchangeOutcome::Completed("stale answer".into()),
        );
        ctl.shared.complete(
            current - 1,
            "first",
            ExchangeOutcome::Failed(ErrorInfo::new(ErrorKind::Timeout)),
        );

        assert_eq!(ctl.state(), before);
        assert_eq!(ctl.history().len(), 1);
        assert_eq!(ctl.history()[0].query, "first");
        assert!(ctl.is_in_flight());
    }

    #[tokio::test]
    async fn test_cancelled_registered_exchange_leaves_session_usable() {
        let gate = Arc::new(Notify::new());
        let backend = FakeBackend::gated(gate.clone());
        let ctl = controller(backend.clone());

        let handle = ctl.submit("what is a claim?").unwrap();
        ctl.shared
            .lock()
            .in_flight
            .as_ref()
            .unwrap()
            .cancel
            .cancel();
        handle.await.unwrap();

        let state = ctl.state();
        assert!(!state.is_loading);
        assert_eq!(state.phase, Phase::Editing);
        assert_eq!(state.query_text, "what is a claim?");
        assert!(state.response_text.is_empty());
        assert!(state.error.is_none());
        assert!(!ctl.is_in_flight());
        assert!(ctl.history().is_empty());

        gate.notify_one();
        ctl.submit_current().unwrap().await.unwrap();
        assert_eq!(ctl.state().response_text, "answer to what is a claim?");
        assert_eq!(ctl.history().len(), 1);
    }
}
