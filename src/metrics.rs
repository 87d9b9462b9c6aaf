//! Queue metrics: counters, an active-worker gauge, and a latency EMA.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Smoothing factor for the processing-time moving average.
const EMA_ALPHA: f64 = 0.1;

/// Shared metrics sink. One instance outlives queue rebuilds.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    active_workers: AtomicUsize,
    average_processing_ms: Mutex<Option<f64>>,
}

/// Point-in-time copy of the metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub active_workers: usize,
    pub average_processing_time_ms: f64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A job finished successfully after `elapsed`.
    pub fn record_success(&self, elapsed: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let sample = elapsed.as_secs_f64() * 1000.0;
        let mut average = self
            .average_processing_ms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *average = Some(match *average {
            None => sample,
            Some(current) => EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * current,
        });
    }

    /// A failed attempt was scheduled for retry.
    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// A job exhausted its retries.
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::AcqRel);
    }

    pub fn worker_finished(&self) {
        let _ = self
            .active_workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let average = self
            .average_processing_ms
            .lock()
            .map(|avg| avg.unwrap_or(0.0))
            .unwrap_or(0.0);
        MetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Acquire),
            average_processing_time_ms: average,
        }
    }
}
