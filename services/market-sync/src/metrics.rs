//! Observability and metrics for the sync engine
//!
//! Counters for both update channels and the event log, plus pull latency.
//! Shared between the runtime task and readers through an `Arc`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core metrics for the sync engine.
pub struct SyncMetrics {
    // Snapshot pulls
    pub pulls_started: AtomicU64,
    pub pulls_succeeded: AtomicU64,
    pub pulls_failed: AtomicU64,
    pub pulls_discarded: AtomicU64,
    pub pull_latency_ms: Mutex<LatencyTracker>,

    // Dataset
    pub entries_applied: AtomicU64,
    pub stale_dropped: AtomicU64,
    pub records_rejected: AtomicU64,

    // Push channel
    pub push_messages: AtomicU64,
    pub reconnect_attempts: AtomicU64,

    // Event log
    pub log_evicted: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            pulls_started: AtomicU64::new(0),
            pulls_succeeded: AtomicU64::new(0),
            pulls_failed: AtomicU64::new(0),
            pulls_discarded: AtomicU64::new(0),
            pull_latency_ms: Mutex::new(LatencyTracker::new(100)),
            entries_applied: AtomicU64::new(0),
            stale_dropped: AtomicU64::new(0),
            records_rejected: AtomicU64::new(0),
            push_messages: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            log_evicted: AtomicU64::new(0),
        }
    }

    pub fn record_pull_started(&self) {
        self.pulls_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pull that completed successfully.
    pub fn record_pull_succeeded(&self, latency_ms: u64) {
        self.pulls_succeeded.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.pull_latency_ms.lock() {
            tracker.record(latency_ms);
        }
    }

    pub fn record_pull_failed(&self) {
        self.pulls_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pull whose result arrived after it was abandoned.
    pub fn record_pull_discarded(&self) {
        self.pulls_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a store mutation.
    pub fn record_applied(&self, accepted: usize, stale: usize) {
        self.entries_applied
            .fetch_add(accepted as u64, Ordering::Relaxed);
        self.stale_dropped.fetch_add(stale as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, count: usize) {
        self.records_rejected
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_push_message(&self) {
        self.push_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_evicted(&self) {
        self.log_evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("pulls_started".to_string(), self.pulls_started.load(Ordering::Relaxed));
        m.insert("pulls_succeeded".to_string(), self.pulls_succeeded.load(Ordering::Relaxed));
        m.insert("pulls_failed".to_string(), self.pulls_failed.load(Ordering::Relaxed));
        m.insert("pulls_discarded".to_string(), self.pulls_discarded.load(Ordering::Relaxed));
        m.insert("entries_applied".to_string(), self.entries_applied.load(Ordering::Relaxed));
        m.insert("stale_dropped".to_string(), self.stale_dropped.load(Ordering::Relaxed));
        m.insert("records_rejected".to_string(), self.records_rejected.load(Ordering::Relaxed));
        m.insert("push_messages".to_string(), self.push_messages.load(Ordering::Relaxed));
        m.insert("reconnect_attempts".to_string(), self.reconnect_attempts.load(Ordering::Relaxed));
        m.insert("log_evicted".to_string(), self.log_evicted.load(Ordering::Relaxed));
        if let Ok(tracker) = self.pull_latency_ms.lock() {
            if let Some(avg) = tracker.average() {
                m.insert("pull_latency_avg_ms".to_string(), avg);
            }
            if let Some(p99) = tracker.percentile(99) {
                m.insert("pull_latency_p99_ms".to_string(), p99);
            }
        }
        m
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    /// Average latency.
    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    /// Number of samples recorded.
    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
