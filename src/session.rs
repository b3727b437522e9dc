//! Session state machine
//!
//! `SessionState` is the one record a front end renders. It only changes
//! through the transition methods below:
//!
//! ```text
//!   Idle/Editing --submit--> Pending --resolve--> Resolved
//!        ^                                          |  ^
//!        +------------------ edit ------------------+  | select
//!                                                   +--+
//! ```
//!
//! Idle and Editing differ only in whether `query_text` is empty.

use serde::Serialize;

use crate::error::{ErrorInfo, Rejection};
use crate::history::{EntryId, HistoryEntry};

/// Logical lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing typed, nothing shown
    #[default]
    Idle,
    /// User is typing
    Editing,
    /// One exchange in flight
    Pending,
    /// Last exchange (or a replayed entry) is on screen
    Resolved,
}

/// Everything the view needs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    pub query_text: String,
    pub response_text: String,
    pub is_loading: bool,
    pub error: Option<ErrorInfo>,
    pub selected_entry_id: Option<EntryId>,
    pub phase: Phase,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input changed. Ignored while an exchange is pending (input is locked).
    pub fn edit(&mut self, text: &str) -> bool {
        if self.is_loading {
            return false;
        }
        self.query_text = text.to_string();
        self.phase = if text.is_empty() {
            Phase::Idle
        } else {
            Phase::Editing
        };
        true
    }

    /// Enter `Pending`. Returns the trimmed query to send.
    pub fn begin_submit(&mut self) -> Result<String, Rejection> {
        if self.is_loading {
            return Err(Rejection::Busy);
        }
        let query = self.query_text.trim();
        if query.is_empty() {
            return Err(Rejection::EmptyQuery);
        }
        let query = query.to_string();

        self.is_loading = true;
        self.phase = Phase::Pending;
        self.response_text.clear();
        self.error = None;
        self.selected_entry_id = None;
        Ok(query)
    }

    /// Exchange succeeded and was recorded as `entry`
    pub fn resolve_success(&mut self, entry: &HistoryEntry) {
        self.response_text = entry.response.clone();
        self.error = None;
        self.finish();
    }

    /// Exchange failed; no history was written
    pub fn resolve_failure(&mut self, error: ErrorInfo) {
        self.response_text.clear();
        self.error = Some(error);
        self.finish();
    }

    /// Exchange was cancelled without an outcome. Output is left alone and
    /// the query stays in the input so it can be sent again.
    pub fn abandon(&mut self) {
        if !self.is_loading {
            return;
        }
        self.is_loading = false;
        self.phase = if self.query_text.is_empty() {
            Phase::Idle
        } else {
            Phase::Editing
        };
    }

    // The input is cleared whatever the outcome.
    fn finish(&mut self) {
        self.is_loading = false;
        self.query_text.clear();
        self.phase = Phase::Resolved;
    }

    /// Replay a history entry. Refused while pending.
    pub fn select(&mut self, entry: &HistoryEntry) -> bool {
        if self.is_loading {
            return false;
        }
        self.query_text = entry.query.clone();
        self.response_text = entry.response.clone();
        self.error = None;
        self.selected_entry_id = Some(entry.id);
        self.phase = Phase::Resolved;
        true
    }
}
