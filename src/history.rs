//! Recent exchanges
//!
//! Bounded ring of successful exchanges. Oldest entry falls off when the
//! eleventh one arrives; entries are never edited after creation.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// How many exchanges the session keeps around
pub const HISTORY_CAPACITY: usize = 10;

/// Creation-ordered identifier of a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EntryId(u64);

impl EntryId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One successful exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: EntryId,
    pub query: String,
    pub response: String,
    /// Local creation time, display-formatted
    pub timestamp: String,
}

/// FIFO-evicting store of recent exchanges
#[derive(Debug)]
pub struct HistoryCache {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    next_id: u64,
}

impl Default for HistoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryCache {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
            next_id: 1,
        }
    }

    /// Build a new entry stamped with a fresh id and the current local time,
    /// append it, and hand back a copy.
    pub fn record(&mut self, query: &str, response: &str) -> HistoryEntry {
        let entry = HistoryEntry {
            id: EntryId(self.next_id),
            query: query.to_string(),
            response: response.to_string(),
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
        };
        self.next_id += 1;
        self.append(entry.clone());
        entry
    }

    /// Insert at the tail, evicting the oldest entry past capacity.
    /// Ids issued afterwards stay above `entry.id`.
    pub(crate) fn append(&mut self, entry: HistoryEntry) -> &VecDeque<HistoryEntry> {
        self.next_id = self.next_id.max(entry.id.0 + 1);
        self.entries.push_back(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        &self.entries
    }

    pub fn find(&self, id: EntryId) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Snapshot, most recent last
    pub fn to_vec(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}
