//! Priority request queue.
//!
//! Five strict lanes, one per [`Priority`] class. The dispatcher always
//! drains the highest non-empty lane first and preserves FIFO order inside
//! a lane; under sustained high-priority load the lower lanes starve, which
//! is accepted here (the rate limiter's fairness promotion is the pressure
//! valve upstream). Enqueue beyond `max_size` is rejected immediately,
//! never blocked. Each queued item carries a deadline; an item still queued
//! at its deadline is removed and completed with a timeout error. With
//! batching enabled, co-queued read items with the same command token in
//! the same lane are dispatched together through one concurrency slot, and
//! identical parameter sets share one device query.

use roslink_common::protocol::error::{Result, RoslinkError};
use roslink_common::protocol::is_read_command;
use roslink_common::Priority;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::QueueConfig;

/// Executes one dispatched command. Implemented by the orchestrator over
/// the breaker and pool; tests supply stubs.
#[async_trait::async_trait]
pub trait QueueExecutor: Send + Sync {
    async fn execute(&self, command: &str, params: &Value) -> Result<Value>;
}

struct QueuedRequest {
    id: u64,
    command: String,
    params: Value,
    enqueued_at: Instant,
    deadline: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

struct QueueInner {
    lanes: [VecDeque<QueuedRequest>; 5],
    len: usize,
}

impl QueueInner {
    fn remove_by_id(&mut self, id: u64) -> Option<QueuedRequest> {
        for lane in &mut self.lanes {
            if let Some(pos) = lane.iter().position(|r| r.id == id) {
                self.len -= 1;
                return lane.remove(pos);
            }
        }
        None
    }
}

/// Per-lane queue depths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub depth: usize,
    pub lane_depths: [usize; 5],
    pub capacity: usize,
}

/// Bounded priority queue with a background dispatcher.
pub struct RequestQueue {
    config: QueueConfig,
    inner: Mutex<QueueInner>,
    notify: Notify,
    slots: Arc<Semaphore>,
    executor: Arc<dyn QueueExecutor>,
    next_id: AtomicU64,
}

impl RequestQueue {
    pub fn new(config: QueueConfig, executor: Arc<dyn QueueExecutor>) -> Arc<Self> {
        let slots = Arc::new(Semaphore::new(config.max_concurrency));
        Arc::new(Self {
            config,
            inner: Mutex::new(QueueInner {
                lanes: Default::default(),
                len: 0,
            }),
            notify: Notify::new(),
            slots,
            executor,
            next_id: AtomicU64::new(1),
        })
    }

    /// Enqueues one command and returns the channel its result arrives on.
    ///
    /// The returned receiver completes with the device reply, the deadline
    /// timeout, or the executor's error.
    ///
    /// # Errors
    ///
    /// Returns [`RoslinkError::QueueFull`] when the queue already holds
    /// `max_size` items. The check-and-insert is atomic under the queue
    /// lock; the cap is never overshot.
    pub fn enqueue(
        self: &Arc<Self>,
        command: &str,
        params: Value,
        priority: Priority,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Result<Value>>> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;

        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.len >= self.config.max_size {
                return Err(RoslinkError::QueueFull(self.config.max_size));
            }
            inner.lanes[priority.lane()].push_back(QueuedRequest {
                id,
                command: command.to_string(),
                params,
                enqueued_at: Instant::now(),
                deadline,
                tx,
            });
            inner.len += 1;
        }
        self.notify.notify_one();

        // Deadline watchdog. A request still queued when it fires is
        // completed with a timeout; once dispatched the watchdog finds
        // nothing and the in-flight deadline is the caller's to enforce.
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline.into()).await;
            let expired = {
                let mut inner = queue.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.remove_by_id(id)
            };
            if let Some(request) = expired {
                debug!(request_id = id, command = %request.command, "queued request timed out");
                let _ = request
                    .tx
                    .send(Err(RoslinkError::Timeout(timeout.as_millis() as u64)));
            }
        });

        Ok(rx)
    }

    /// Pulls the next dispatch unit: the head of the highest non-empty
    /// lane, plus (when batching) co-queued read items with the same
    /// command token from the same lane.
    fn take_batch(&self) -> Option<Vec<QueuedRequest>> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        // Reborrow through the guard so `lanes` and `len` can be borrowed
        // independently below.
        let inner = &mut *inner;

        for lane_idx in 0..inner.lanes.len() {
            let head = loop {
                match inner.lanes[lane_idx].pop_front() {
                    Some(request) if request.deadline <= now => {
                        inner.len -= 1;
                        let _ = request.tx.send(Err(RoslinkError::Timeout(0)));
                    }
                    Some(request) => {
                        inner.len -= 1;
                        break Some(request);
                    }
                    None => break None,
                }
            };
            let Some(head) = head else { continue };

            let mut batch = vec![head];
            if self.config.batching && is_read_command(&batch[0].command) {
                let command = batch[0].command.clone();
                // Only items that arrived within the batch window of the
                // head are coalesced; later stragglers wait their turn.
                let window_end = batch[0].enqueued_at + self.config.batch_timeout;
                let lane = &mut inner.lanes[lane_idx];
                let mut idx = 0;
                while batch.len() < self.config.batch_size && idx < lane.len() {
                    if lane[idx].command == command && lane[idx].enqueued_at <= window_end {
                        if let Some(request) = lane.remove(idx) {
                            inner.len -= 1;
                            batch.push(request);
                        }
                    } else {
                        idx += 1;
                    }
                }
            }
            return Some(batch);
        }
        None
    }

    /// Runs one dispatch unit. Identical parameter sets within a batch
    /// share a single device query.
    async fn run_batch(executor: Arc<dyn QueueExecutor>, batch: Vec<QueuedRequest>) {
        let mut results: Vec<(String, Result<Value>)> = Vec::new();
        for request in batch {
            let key = request.params.to_string();
            let reply = match results.iter().find(|(k, _)| *k == key) {
                Some((_, Ok(value))) => Ok(value.clone()),
                _ => {
                    let reply = executor.execute(&request.command, &request.params).await;
                    if let Ok(value) = &reply {
                        results.push((key, Ok(value.clone())));
                    }
                    reply
                }
            };
            let _ = request.tx.send(reply);
        }
    }

    /// Spawns the dispatcher task. Call exactly once after construction.
    pub fn spawn_dispatcher(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                // Semaphore is never closed while the queue lives.
                let Ok(permit) = Arc::clone(&queue.slots).acquire_owned().await else {
                    return;
                };
                let batch = loop {
                    if let Some(batch) = queue.take_batch() {
                        break batch;
                    }
                    // Wake on enqueue; the batch window is bounded by how
                    // long items co-reside in the queue, so no extra timer
                    // is needed here.
                    let notified = queue.notify.notified();
                    if let Some(batch) = queue.take_batch() {
                        break batch;
                    }
                    notified.await;
                };
                let executor = Arc::clone(&queue.executor);
                tokio::spawn(async move {
                    Self::run_batch(executor, batch).await;
                    drop(permit);
                });
            }
        })
    }

    /// Completes every queued item with the given error. Used on shutdown.
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<QueuedRequest> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.len = 0;
            inner
                .lanes
                .iter_mut()
                .flat_map(|lane| lane.drain(..))
                .collect()
        };
        for request in drained {
            let _ = request
                .tx
                .send(Err(RoslinkError::Connection(reason.to_string())));
        }
    }

    pub fn status(&self) -> QueueStatus {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut lane_depths = [0usize; 5];
        for (idx, lane) in inner.lanes.iter().enumerate() {
            lane_depths[idx] = lane.len();
        }
        QueueStatus {
            depth: inner.len,
            lane_depths,
            capacity: self.config.max_size,
        }
    }
}
