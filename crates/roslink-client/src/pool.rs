//! Connection pool for device sessions.
//!
//! The pool owns up to `max_size` authenticated sessions. `acquire` hands
//! out exclusive ownership of one connection; `release` returns it, or
//! destroys it when it is broken or has served `max_uses` calls. A
//! background health checker replenishes the pool to `min_size` and
//! recycles worn idle connections.

use roslink_common::protocol::error::{Result, RoslinkError};
use roslink_common::transport::{DeviceSession, DeviceTransport};
use roslink_metrics::{MonitorEvent, MonitorSink};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::collections::VecDeque;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{DeviceConfig, PoolConfig};

/// An exclusively owned, authenticated device session.
///
/// Obtained from [`ConnectionPool::acquire`] and returned with
/// [`ConnectionPool::release`]. While held, no other task can touch the
/// underlying session, so calls need no per-stream locking.
pub struct PooledConnection {
    id: u64,
    session: Box<dyn DeviceSession>,
    use_count: u32,
    created_at: Instant,
    broken: bool,
}

impl PooledConnection {
    /// Runs one command on the underlying session.
    ///
    /// A connection-level failure marks the connection broken so the pool
    /// destroys it on release instead of recycling a dead session.
    pub async fn run(&mut self, command: &str, params: &Value) -> Result<Value> {
        self.use_count += 1;
        match self.session.run_query(command, params).await {
            Ok(value) => Ok(value),
            Err(err) => {
                if matches!(
                    err,
                    RoslinkError::Connection(_) | RoslinkError::Io(_) | RoslinkError::Timeout(_)
                ) {
                    self.broken = true;
                }
                Err(err)
            }
        }
    }

    /// Flags the connection so release destroys it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn is_worn(&self, max_uses: u32) -> bool {
        self.broken || self.use_count >= max_uses
    }
}

// The session trait object has no Debug; render the bookkeeping fields.
impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("use_count", &self.use_count)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub live: usize,
    pub max: usize,
}

struct PoolInner {
    /// Idle connections, reused LIFO.
    idle: Vec<PooledConnection>,
    /// Idle plus checked-out connections.
    live: usize,
    /// Wake-up channels for callers waiting on a full pool, oldest first.
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Pool of authenticated sessions against a single device.
pub struct ConnectionPool {
    transport: Arc<dyn DeviceTransport>,
    device: DeviceConfig,
    config: PoolConfig,
    inner: Mutex<PoolInner>,
    sink: Arc<dyn MonitorSink>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    pub fn new(
        transport: Arc<dyn DeviceTransport>,
        device: DeviceConfig,
        config: PoolConfig,
        sink: Arc<dyn MonitorSink>,
    ) -> Self {
        Self {
            transport,
            device,
            config,
            inner: Mutex::new(PoolInner {
                idle: Vec::new(),
                live: 0,
                waiters: VecDeque::new(),
            }),
            sink,
            next_id: AtomicU64::new(1),
        }
    }

    /// Opens and authenticates a fresh session. The caller must already
    /// hold a live-count reservation.
    async fn open_connection(&self) -> Result<PooledConnection> {
        let mut session = self.transport.connect().await?;
        if let Err(err) = session
            .login(&self.device.username, &self.device.password)
            .await
        {
            let _ = session.close().await;
            return Err(err);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(connection_id = id, "connection established");
        self.sink
            .notify(&MonitorEvent::ConnectionCreated { connection_id: id });
        Ok(PooledConnection {
            id,
            session,
            use_count: 0,
            created_at: Instant::now(),
            broken: false,
        })
    }

    async fn destroy(&self, mut conn: PooledConnection, reason: &str) {
        debug!(connection_id = conn.id, %reason, "destroying connection");
        if let Err(err) = conn.session.close().await {
            warn!(connection_id = conn.id, error = %err, "error closing session");
        }
        let mut inner = self.inner.lock().await;
        inner.live = inner.live.saturating_sub(1);
        Self::wake_one_waiter(&mut inner);
        drop(inner);
        self.sink.notify(&MonitorEvent::ConnectionDestroyed {
            connection_id: conn.id,
            reason: reason.to_string(),
        });
    }

    /// Wakes the oldest waiter whose receiver is still alive.
    fn wake_one_waiter(inner: &mut PoolInner) {
        while let Some(tx) = inner.waiters.pop_front() {
            if tx.send(()).is_ok() {
                return;
            }
        }
    }

    /// Opens connections until `min_size` are live. Called once at startup
    /// and again from the health checker.
    pub async fn warm_up(&self) -> Result<()> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.live >= self.config.min_size {
                    return Ok(());
                }
                inner.live += 1;
            }
            match self.open_connection().await {
                Ok(conn) => {
                    let mut inner = self.inner.lock().await;
                    inner.idle.push(conn);
                    Self::wake_one_waiter(&mut inner);
                }
                Err(err) => {
                    let mut inner = self.inner.lock().await;
                    inner.live = inner.live.saturating_sub(1);
                    return Err(err);
                }
            }
        }
    }

    /// Acquires an exclusive connection.
    ///
    /// Idle connections are reused LIFO; worn ones found on the way are
    /// destroyed. When the pool is below `max_size` a new connection is
    /// opened. When it is full the caller joins a FIFO waiter list and is
    /// woken by the next release or eviction, giving up after
    /// `acquire_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RoslinkError::PoolExhausted`] when no connection became
    /// available within `acquire_timeout`, or any connect/login error while
    /// growing the pool.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let start = Instant::now();
        let deadline = start + self.config.acquire_timeout;

        loop {
            let mut worn: Option<PooledConnection> = None;
            let mut wakeup: Option<oneshot::Receiver<()>> = None;
            {
                let mut inner = self.inner.lock().await;

                while let Some(conn) = inner.idle.pop() {
                    if conn.is_worn(self.config.max_uses) {
                        worn = Some(conn);
                        break;
                    }
                    return Ok(conn);
                }

                if worn.is_none() {
                    if inner.live < self.config.max_size {
                        // Reserve the slot before connecting so concurrent
                        // acquires cannot overshoot max_size.
                        inner.live += 1;
                        drop(inner);
                        return match self.open_connection().await {
                            Ok(conn) => Ok(conn),
                            Err(err) => {
                                let mut inner = self.inner.lock().await;
                                inner.live = inner.live.saturating_sub(1);
                                Self::wake_one_waiter(&mut inner);
                                Err(err)
                            }
                        };
                    }
                    let (tx, rx) = oneshot::channel();
                    inner.waiters.push_back(tx);
                    wakeup = Some(rx);
                }
            }

            if let Some(conn) = worn {
                self.destroy(conn, "recycled at max_uses").await;
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let woken = match wakeup {
                Some(rx) => tokio::time::timeout(remaining, rx).await.is_ok(),
                None => false,
            };
            if !woken && Instant::now() >= deadline {
                return Err(RoslinkError::PoolExhausted {
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }
        }
    }

    /// Returns a connection to the pool, destroying it if it is broken or
    /// has reached its use quota.
    pub async fn release(&self, conn: PooledConnection) {
        if conn.is_worn(self.config.max_uses) {
            let reason = if conn.broken {
                "connection broken"
            } else {
                "recycled at max_uses"
            };
            self.destroy(conn, reason).await;
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.idle.push(conn);
        Self::wake_one_waiter(&mut inner);
    }

    pub async fn status(&self) -> PoolStatus {
        let inner = self.inner.lock().await;
        PoolStatus {
            idle: inner.idle.len(),
            live: inner.live,
            max: self.config.max_size,
        }
    }

    /// One maintenance round: recycle worn idle connections, then
    /// replenish to `min_size`.
    pub async fn maintain(&self) {
        let worn: Vec<PooledConnection> = {
            let mut inner = self.inner.lock().await;
            let max_uses = self.config.max_uses;
            let (worn, kept): (Vec<_>, Vec<_>) = inner
                .idle
                .drain(..)
                .partition(|c| c.is_worn(max_uses));
            inner.idle = kept;
            worn
        };
        for conn in worn {
            self.destroy(conn, "recycled by health check").await;
        }

        if let Err(err) = self.warm_up().await {
            warn!(error = %err, "health check failed to replenish pool");
        }
    }

    /// Spawns the periodic maintenance task.
    pub fn spawn_health_checker(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let interval = pool.config.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it, warm-up already ran.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                pool.maintain().await;
            }
        })
    }

    /// Closes every idle connection. Checked-out connections are destroyed
    /// as they come back through `release`.
    pub async fn close_all(&self) {
        let idle: Vec<PooledConnection> = {
            let mut inner = self.inner.lock().await;
            inner.idle.drain(..).collect()
        };
        let count = idle.len();
        futures::future::join_all(
            idle.into_iter()
                .map(|conn| self.destroy(conn, "pool shutdown")),
        )
        .await;
        info!(closed = count, "connection pool drained");
    }
}
