//! Bounded error log for background failures.
//!
//! Listener workers run detached from any caller, so their failures are
//! recorded here instead of being returned. The log keeps at most `capacity`
//! entries and evicts the oldest first.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A timestamped error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    /// When the error was recorded.
    pub time: DateTime<Utc>,
    /// Human-readable description.
    pub message: String,
}

struct Inner {
    entries: VecDeque<ErrorEntry>,
    dropped: u64,
}

/// Thread-safe, capacity-bounded error queue.
pub struct ErrorLog {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl ErrorLog {
    /// Create a log holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity.min(64)),
                dropped: 0,
            }),
            capacity,
        }
    }

    /// Record a message stamped with the current time.
    pub fn push(&self, message: impl Into<String>) {
        self.push_entry(ErrorEntry {
            time: Utc::now(),
            message: message.into(),
        });
    }

    /// Record an entry, evicting the oldest one if full.
    pub fn push_entry(&self, entry: ErrorEntry) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
            inner.dropped += 1;
        }
        inner.entries.push_back(entry);
    }

    /// Copy of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<ErrorEntry> {
        self.inner.lock().unwrap().entries.iter().cloned().collect()
    }

    /// Retained messages without timestamps, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    /// Remove and return every retained entry.
    pub fn drain(&self) -> Vec<ErrorEntry> {
        self.inner.lock().unwrap().entries.drain(..).collect()
    }

    /// Number of entries evicted because the log was full.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Whether the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for ErrorLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorLog")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
