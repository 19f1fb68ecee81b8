//! KPI counters and metrics snapshots.
//!
//! All hot-path counters are relaxed atomics; collectors read the
//! accumulated value and report the delta since the previous
//! collection, so a periodic printer sees per-interval rates.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter with delta-since-last-collect
/// reporting.
#[derive(Default)]
pub struct KpiCounter {
    counter: AtomicU64,
    last_collected: AtomicU64,
}

impl KpiCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments by one.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Increments by `n`.
    pub fn add(&self, n: u64) {
        self.counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Total accumulated value.
    pub fn value(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Value accumulated since the previous call to `collect`.
    pub fn collect(&self) -> u64 {
        let current = self.value();
        let last = self.last_collected.swap(current, Ordering::Relaxed);
        current - last
    }
}

/// Reception window classification metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceivedMessagesMetrics {
    /// Messages inside the reception window.
    pub nof_on_time_messages: u64,
    /// Messages ahead of the reception window.
    pub nof_early_messages: u64,
    /// Messages behind the reception window.
    pub nof_late_messages: u64,
}

/// Message receiver metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageReceiverMetrics {
    /// Messages dropped before reaching a data flow.
    pub nof_dropped_messages: u64,
    /// Messages the sequence id checker flagged as skipped.
    pub nof_skipped_messages: u64,
}

/// Closed reception window metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClosedRxWindowMetrics {
    /// Uplink symbols delivered incomplete.
    pub nof_missed_uplink_symbols: u64,
    /// PRACH contexts delivered incomplete.
    pub nof_missed_prach_contexts: u64,
}
