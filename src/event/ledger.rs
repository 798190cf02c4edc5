//! Bounded, ordered history of everything the dispatcher has published.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::Topic;

pub const DEFAULT_CAPACITY: usize = 10_000;
pub const DEFAULT_RECENT_LIMIT: usize = 100;

/// A single ledger record.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: Topic,
    pub payload: Value,
}

/// Capacity-bounded FIFO ledger.
///
/// Once full, each append evicts exactly one oldest entry before inserting
/// the new one.
pub struct EventLedger {
    entries: Mutex<VecDeque<LedgerEntry>>,
    capacity: usize,
}

impl EventLedger {
    /// A zero capacity is bumped to one so the newest entry is always kept.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn append(&self, kind: Topic, payload: Value) {
        let entry = LedgerEntry {
            timestamp: Utc::now(),
            kind,
            payload,
        };
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// The last `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<LedgerEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for EventLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
