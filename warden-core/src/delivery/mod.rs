//! Bounded, retrying delivery queue (result transmitter).
//!
//! Decouples utterance production from a possibly-slow or failing remote
//! sink while bounding memory. Enqueue is synchronous accept/reject
//! (backpressure when full); a single background worker drains the queue
//! in batches and retries each record with exponential backoff before
//! giving up. The queue is memory-only: in-flight records at shutdown are
//! abandoned.

pub mod metrics;
pub mod worker;

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, WardenError};
use crate::events::ResultEvent;
use metrics::{DeliveryMetrics, MetricsSnapshot};

/// Remote transport capability: one HTTP-style call. A 2xx status is
/// success; `Err` means the transport itself failed (timeout, refused).
pub trait RemoteSink: Send + Sync + 'static {
    fn post(&self, payload: &ResultEvent) -> Result<u16>;
}

/// Delivery state of one queued record. `Success` and `Failed` are
/// terminal — the record leaves the queue either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sending,
    Retrying,
    Success,
    Failed,
}

/// One queued event awaiting transport.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub payload: ResultEvent,
    pub status: DeliveryStatus,
    /// Only increases, capped at `DeliveryConfig::max_retries`.
    pub retries: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl DeliveryRecord {
    fn new(payload: ResultEvent) -> Self {
        Self {
            payload,
            status: DeliveryStatus::Pending,
            retries: 0,
            last_error: None,
            enqueued_at: Utc::now(),
        }
    }
}

/// Tuning for the queue and its worker.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Bounded FIFO capacity. Default: 1000.
    pub capacity: usize,
    /// Records drained per worker iteration. Default: 10.
    pub batch_size: usize,
    /// Retries per record after the first attempt. Default: 3.
    pub max_retries: u32,
    /// Backoff base: `delay = base_delay · 2^attempt`. Default: 500 ms.
    pub base_delay: Duration,
    /// Worker sleep when the queue is empty. Default: 20 ms.
    pub poll_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            batch_size: 10,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(20),
        }
    }
}

/// The bounded FIFO queue plus its drain-worker lifecycle.
///
/// `DeliveryQueue` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc` and share freely.
pub struct DeliveryQueue {
    config: DeliveryConfig,
    queue: Arc<Mutex<VecDeque<DeliveryRecord>>>,
    sink: Arc<dyn RemoteSink>,
    running: Arc<AtomicBool>,
    metrics: Arc<DeliveryMetrics>,
}

impl DeliveryQueue {
    pub fn new(config: DeliveryConfig, sink: Arc<dyn RemoteSink>) -> Self {
        Self {
            config,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            sink,
            running: Arc::new(AtomicBool::new(false)),
            metrics: Arc::new(DeliveryMetrics::new()),
        }
    }

    /// Append a record to the queue.
    ///
    /// # Errors
    /// [`WardenError::QueueFull`] when the queue is at capacity — the
    /// record is dropped. Deliberate backpressure, not fatal to the caller.
    pub fn enqueue(&self, payload: ResultEvent) -> Result<()> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.config.capacity {
            warn!(
                device_id = %payload.device_id,
                capacity = self.config.capacity,
                "delivery queue full — record dropped"
            );
            return Err(WardenError::QueueFull);
        }
        debug!(
            device_id = %payload.device_id,
            session_id = %payload.session_id,
            depth = queue.len() + 1,
            "result enqueued"
        );
        queue.push_back(DeliveryRecord::new(payload));
        Ok(())
    }

    /// Spawn the drain worker on the blocking pool.
    ///
    /// # Errors
    /// [`WardenError::AlreadyRunning`] if the worker is already active.
    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(WardenError::AlreadyRunning);
        }

        let ctx = worker::WorkerContext {
            config: self.config.clone(),
            sink: Arc::clone(&self.sink),
            queue: Arc::clone(&self.queue),
            running: Arc::clone(&self.running),
            metrics: Arc::clone(&self.metrics),
        };
        tokio::task::spawn_blocking(move || worker::run(ctx));
        info!("delivery worker spawned");
        Ok(())
    }

    /// Signal the worker to stop. The current in-flight record is
    /// abandoned cleanly; queued records stay queued (and are lost with
    /// the process — the queue is memory-only by design).
    ///
    /// # Errors
    /// [`WardenError::NotRunning`] if the worker is not active.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(WardenError::NotRunning);
        }
        info!("delivery worker stop requested");
        Ok(())
    }

    /// Records awaiting pickup (in-flight batch excluded).
    pub fn depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.depth())
    }
}
