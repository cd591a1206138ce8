//! Bounded diagnostic log of recent DNS decisions.

use std::collections::VecDeque;
use std::time::SystemTime;

use parking_lot::Mutex;

/// One recorded DNS decision.
#[derive(Debug, Clone)]
pub struct QueryLogEntry {
    /// Queried domain name.
    pub domain: String,
    /// When the query was seen.
    pub timestamp: SystemTime,
    /// Whether the query was answered with a forged response.
    pub blocked: bool,
}

/// Fixed-capacity ring of recent queries, newest first.
#[derive(Debug)]
pub struct QueryLog {
    entries: Mutex<VecDeque<QueryLogEntry>>,
    capacity: usize,
}

impl QueryLog {
    /// Create a log holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record a decision. The oldest entry is dropped when full.
    pub fn record(&self, domain: impl Into<String>, blocked: bool) {
        let entry = QueryLogEntry {
            domain: domain.into(),
            timestamp: SystemTime::now(),
            blocked,
        };
        let mut entries = self.entries.lock();
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    /// Snapshot of the current entries, newest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueryLogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the log holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for QueryLog {
    fn default() -> Self {
        Self::new(200)
    }
}
