//! Buffered and immediate metric delivery.
//!
//! Many producers enqueue, one worker flushes. The buffer is a bounded FIFO:
//! overflow drops the oldest point and counts it, so the buffer can never
//! exceed its capacity no matter how far the platform falls behind.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_client::error::ClientError;
use vigil_client::PlatformClient;
use vigil_common::types::{MetricPoint, MetricValue};

/// Time allowed for the final drain on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bounded FIFO of pending points.
pub struct SendBuffer {
    queue: VecDeque<MetricPoint>,
    capacity: usize,
    dropped: u64,
}

impl SendBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append a point, evicting the oldest when full. Returns true when the
    /// buffer is at capacity afterwards, which signals a flush.
    pub fn push(&mut self, point: MetricPoint) -> bool {
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
        }
        self.queue.push_back(point);
        self.queue.len() >= self.capacity
    }

    pub fn drain_all(&mut self) -> Vec<MetricPoint> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

pub struct MetricsSender {
    client: Arc<PlatformClient>,
    buffer: Mutex<SendBuffer>,
    flush_signal: Notify,
    flush_interval: Duration,
    send_failures: AtomicU64,
}

impl MetricsSender {
    pub fn new(client: Arc<PlatformClient>, buffer_size: usize, flush_interval: Duration) -> Self {
        Self {
            client,
            buffer: Mutex::new(SendBuffer::new(buffer_size.max(1))),
            flush_signal: Notify::new(),
            flush_interval,
            send_failures: AtomicU64::new(0),
        }
    }

    /// Non-blocking append. A full buffer signals the flush worker; the
    /// signal slot holds at most one pending wake.
    pub fn enqueue(&self, point: MetricPoint) {
        let full = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.push(point)
        };
        if full {
            self.flush_signal.notify_one();
        }
    }

    /// Synchronous single-point path, bypassing the buffer. The scheduler
    /// uses this so send failures can be logged against the item.
    pub async fn send_immediate(
        &self,
        item_id: i64,
        value: MetricValue,
    ) -> Result<(), ClientError> {
        self.client.send_metric(item_id, value).await
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .dropped()
    }

    pub fn send_failure_count(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    /// Flush worker: wakes on buffer-full signal, flush timer, or shutdown.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.reset();

        info!(
            flush_interval_secs = self.flush_interval.as_secs(),
            "Metrics sender started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let remaining = self.buffered();
                    if remaining > 0 {
                        debug!(remaining, "Draining metric buffer before shutdown");
                        if tokio::time::timeout(SHUTDOWN_GRACE, self.flush()).await.is_err() {
                            warn!(remaining = self.buffered(), "Metric drain exceeded grace period");
                        }
                    }
                    info!("Metrics sender stopped");
                    return;
                }
                _ = self.flush_signal.notified() => self.flush().await,
                _ = ticker.tick() => self.flush().await,
            }
        }
    }

    /// Swap the buffer for an empty one and transmit point by point. Failed
    /// points are counted and logged, never retried here.
    async fn flush(&self) {
        let points = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.drain_all()
        };
        if points.is_empty() {
            return;
        }

        let total = points.len();
        let mut failed = 0usize;
        for point in points {
            if let Err(e) = self.client.send_metric(point.item_id, point.value).await {
                failed += 1;
                self.send_failures.fetch_add(1, Ordering::Relaxed);
                warn!(item_id = point.item_id, error = %e, "Dropping metric point after send failure");
            }
        }

        debug!(total, failed, "Metric buffer flushed");
    }
}
