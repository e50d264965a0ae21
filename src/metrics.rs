//! Per-manager pipeline counters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for lock-free metric updates
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters shared by the executors of one manager
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Messages taken from the inbox
    pub received: Counter,
    /// Messages whose transaction was ended successfully
    pub succeeded: Counter,
    /// Messages whose transaction was ended as failed
    pub failed: Counter,
    /// Messages put to outboxes
    pub forwarded: Counter,
}

/// Point-in-time copy of [`PipelineMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub forwarded: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.get(),
            succeeded: self.succeeded.get(),
            failed: self.failed.get(),
            forwarded: self.forwarded.get(),
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} succeeded={} failed={} forwarded={}",
            self.received, self.succeeded, self.failed, self.forwarded
        )
    }
}
