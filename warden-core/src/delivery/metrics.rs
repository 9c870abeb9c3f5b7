//! Delivery health counters.
//!
//! Counters are lock-free atomics; the EWMA latency and the last-outcome
//! timestamps sit behind one small mutex since they change together.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Latency smoothing factor: `avg = avg·0.9 + sample·0.1`.
const EWMA_ALPHA: f64 = 0.1;

#[derive(Default)]
pub struct DeliveryMetrics {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    inner: Mutex<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    /// Seeded by the first sample, then exponentially weighted.
    ewma_latency_ms: Option<f64>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One record entered delivery (counted once, not per retry).
    pub fn record_attempt(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, latency_ms: f64) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.ewma_latency_ms = Some(match inner.ewma_latency_ms {
            Some(avg) => avg * (1.0 - EWMA_ALPHA) + latency_ms * EWMA_ALPHA,
            None => latency_ms,
        });
        inner.last_success = Some(Utc::now());
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().last_failure = Some(Utc::now());
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, queue_depth: usize) -> MetricsSnapshot {
        let attempted = self.attempted.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let inner = self.inner.lock();
        MetricsSnapshot {
            attempted,
            succeeded,
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            success_rate: if attempted == 0 {
                0.0
            } else {
                succeeded as f64 / attempted as f64
            },
            avg_latency_ms: inner.ewma_latency_ms,
            last_success: inner.last_success,
            last_failure: inner.last_failure,
            queue_depth,
        }
    }
}

/// Point-in-time view for the metrics read surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retries: u64,
    pub success_rate: f64,
    pub avg_latency_ms: Option<f64>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub queue_depth: usize,
}
