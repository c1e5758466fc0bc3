//! Bounded event log
//!
//! Append-only ring buffer of `LogRecord`s. When full, the oldest record is
//! evicted first; records are never reordered or edited once appended.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use types::log::LogRecord;

/// Default number of records kept.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Message of the marker record left behind by `clear`.
pub const CLEARED_MESSAGE: &str = "log cleared";

/// FIFO buffer of log records with a fixed capacity.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    records: VecDeque<LogRecord>,
    capacity: usize,
    total_appended: u64,
    evicted: u64,
}

impl LogBuffer {
    /// Create a buffer holding at most `capacity` records (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
            total_appended: 0,
            evicted: 0,
        }
    }

    /// Append at the tail, returning the record evicted from the head, if any.
    pub fn append(&mut self, record: LogRecord) -> Option<LogRecord> {
        let evicted = if self.records.len() >= self.capacity {
            self.evicted += 1;
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        self.total_appended += 1;
        evicted
    }

    /// Drop every record and leave a single "log cleared" marker.
    pub fn clear(&mut self, now: DateTime<Utc>) {
        self.records.clear();
        self.append(LogRecord::info(now, CLEARED_MESSAGE));
    }

    /// Current records, oldest first.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter()
    }

    /// Newest record.
    pub fn latest(&self) -> Option<&LogRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records ever appended, including the ones since evicted.
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }

    /// Records evicted for capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
