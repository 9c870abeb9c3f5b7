//! Blocking drain-worker loop.
//!
//! ## Per iteration
//!
//! ```text
//! 1. Pop up to `batch_size` records from the queue front
//! 2. For each record: attempt → retry with exponential backoff → terminal
//! 3. Sleep `poll_interval` when the queue is empty
//! ```
//!
//! The loop runs in `spawn_blocking`, keeping the async executor free; it
//! owns the sink call and the backoff sleeps, so no cross-runtime bridging
//! is ever needed. FIFO order is preserved; dropped-on-full and
//! dropped-after-max-retries records leave gaps, never reordering.

use std::sync::atomic::Ordering;
use std::sync::{atomic::AtomicBool, Arc};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{DeliveryConfig, DeliveryRecord, DeliveryStatus, RemoteSink};
use crate::delivery::metrics::DeliveryMetrics;

/// Shutdown-check granularity for backoff sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// All context the worker needs, passed as one struct so the closure
/// stays tidy.
pub struct WorkerContext {
    pub config: DeliveryConfig,
    pub sink: Arc<dyn RemoteSink>,
    pub queue: Arc<Mutex<std::collections::VecDeque<DeliveryRecord>>>,
    pub running: Arc<AtomicBool>,
    pub metrics: Arc<DeliveryMetrics>,
}

/// Run the drain loop until `ctx.running` becomes false.
pub fn run(ctx: WorkerContext) {
    info!("delivery worker started");

    'outer: loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let batch: Vec<DeliveryRecord> = {
            let mut queue = ctx.queue.lock();
            let take = queue.len().min(ctx.config.batch_size);
            queue.drain(..take).collect()
        };

        if batch.is_empty() {
            std::thread::sleep(ctx.config.poll_interval);
            continue;
        }

        debug!(batch = batch.len(), "draining delivery batch");
        for mut record in batch {
            if !ctx.running.load(Ordering::Relaxed) {
                warn!(
                    device_id = %record.payload.device_id,
                    "shutdown mid-batch — remaining records abandoned"
                );
                break 'outer;
            }
            deliver(&ctx, &mut record);
        }
    }

    info!("delivery worker stopped");
}

/// Attempt one record to its terminal state (or abandon on shutdown).
fn deliver(ctx: &WorkerContext, record: &mut DeliveryRecord) {
    ctx.metrics.record_attempt();

    for attempt in 0..=ctx.config.max_retries {
        record.status = if attempt == 0 {
            DeliveryStatus::Sending
        } else {
            DeliveryStatus::Retrying
        };

        let started = Instant::now();
        match ctx.sink.post(&record.payload) {
            Ok(code) if (200..300).contains(&code) => {
                record.status = DeliveryStatus::Success;
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                ctx.metrics.record_success(latency_ms);
                debug!(
                    device_id = %record.payload.device_id,
                    session_id = %record.payload.session_id,
                    latency_ms,
                    retries = record.retries,
                    "result delivered"
                );
                return;
            }
            Ok(code) => {
                record.last_error = Some(format!("sink returned status {code}"));
            }
            Err(e) => {
                record.last_error = Some(e.to_string());
            }
        }

        if attempt < ctx.config.max_retries {
            record.retries += 1;
            ctx.metrics.record_retry();
            let delay = ctx.config.base_delay * (1u32 << attempt.min(16));
            debug!(
                device_id = %record.payload.device_id,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                last_error = record.last_error.as_deref().unwrap_or(""),
                "delivery attempt failed — backing off"
            );
            if !sleep_while_running(&ctx.running, delay) {
                warn!(
                    device_id = %record.payload.device_id,
                    "shutdown during backoff — record abandoned"
                );
                return;
            }
        }
    }

    record.status = DeliveryStatus::Failed;
    ctx.metrics.record_failure();
    warn!(
        device_id = %record.payload.device_id,
        session_id = %record.payload.session_id,
        retries = record.retries,
        last_error = record.last_error.as_deref().unwrap_or(""),
        "delivery failed after retries — record dropped"
    );
}

/// Sleep in slices, bailing early when the running flag drops.
/// Returns false if shutdown interrupted the sleep.
fn sleep_while_running(running: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if !running.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
