//! Circuit breaker for the device link.
//!
//! Closed passes traffic and counts consecutive failures. At the threshold
//! the circuit opens and every call fails fast until the reset timeout
//! elapses; the timeout grows exponentially with each consecutive trip, up
//! to a cap. Half-open admits a single probe at a time and closes only
//! after the configured number of consecutive probe successes.

use roslink_common::protocol::error::{Result, RoslinkError};
use roslink_metrics::{MonitorEvent, MonitorSink};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::BreakerConfig;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, requests flow through.
    Closed,
    /// Circuit is tripped, requests fail fast without reaching the device.
    Open,
    /// Testing whether the device has recovered.
    HalfOpen,
}

impl BreakerState {
    fn name(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    /// Consecutive trips without an intervening close; drives backoff.
    trip_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    probe_successes: u32,
}

/// Circuit breaker guarding calls to a single device.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    sink: Arc<dyn MonitorSink>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, sink: Arc<dyn MonitorSink>) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                trip_count: 0,
                opened_at: None,
                probe_in_flight: false,
                probe_successes: 0,
            }),
            sink,
        }
    }

    /// Reset timeout with exponential backoff based on consecutive trips.
    fn current_reset_timeout(&self, trip_count: u32) -> Duration {
        let base_ms = self.config.reset_timeout.as_millis() as f64;
        let multiplier = self
            .config
            .backoff_multiplier
            .powi(trip_count.saturating_sub(1) as i32);
        let backoff_ms = (base_ms * multiplier) as u128;
        let max_ms = self.config.max_reset_timeout.as_millis();
        Duration::from_millis(backoff_ms.min(max_ms) as u64)
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState, reason: &str) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        match to {
            BreakerState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                inner.probe_successes = 0;
            }
            BreakerState::HalfOpen => {
                inner.opened_at = None;
                inner.probe_successes = 0;
            }
            BreakerState::Closed => {
                inner.opened_at = None;
                inner.probe_in_flight = false;
                inner.probe_successes = 0;
                inner.consecutive_failures = 0;
                inner.trip_count = 0;
            }
        }
        warn!(from = from.name(), to = to.name(), %reason, "circuit transition");
        self.sink.notify(&MonitorEvent::CircuitTransition {
            from: from.name().to_string(),
            to: to.name().to_string(),
            reason: reason.to_string(),
        });
    }

    /// Asks the breaker for permission to issue one call.
    ///
    /// # Errors
    ///
    /// Returns [`RoslinkError::CircuitOpen`] while the circuit is open and
    /// the reset timeout has not elapsed, or while a half-open probe is
    /// already in flight.
    pub fn allow(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let timeout = self.current_reset_timeout(inner.trip_count);
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= timeout {
                    self.transition(&mut inner, BreakerState::HalfOpen, "reset timeout elapsed");
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(RoslinkError::CircuitOpen(format!(
                        "retry after {:?}",
                        timeout - elapsed
                    )))
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(RoslinkError::CircuitOpen(
                        "recovery probe already in flight".to_string(),
                    ))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Records a successful call previously admitted by [`allow`](Self::allow).
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.probe_successes += 1;
                if inner.probe_successes >= self.config.probe_successes {
                    self.transition(&mut inner, BreakerState::Closed, "probe quota met");
                }
            }
            // A success landing after the circuit re-opened changes nothing.
            BreakerState::Open => {}
        }
    }

    /// Records a failed call previously admitted by [`allow`](Self::allow).
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.trip_count += 1;
                    self.transition(&mut inner, BreakerState::Open, "failure threshold reached");
                }
            }
            BreakerState::HalfOpen => {
                inner.trip_count += 1;
                self.transition(&mut inner, BreakerState::Open, "probe failed");
            }
            BreakerState::Open => {}
        }
    }

    /// Runs `op` under the breaker, recording the outcome.
    ///
    /// Framework rejections (queue full, rate limited) say nothing about
    /// device health and are not counted against the circuit. Pool
    /// exhaustion and timeouts do count; both mean the device is not
    /// keeping up.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.allow()?;
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if err.is_internal_rejection() {
                    // The probe slot must be returned unused in half-open.
                    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                    inner.probe_in_flight = false;
                } else {
                    self.record_failure();
                }
                Err(err)
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Remaining wait before the next probe is admitted, if the circuit is
    /// open.
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state != BreakerState::Open {
            return None;
        }
        let timeout = self.current_reset_timeout(inner.trip_count);
        let elapsed = inner
            .opened_at
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO);
        Some(timeout.saturating_sub(elapsed))
    }

    #[cfg(test)]
    fn force_open_elapsed(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = inner.opened_at.as_mut() {
            *at = Instant::now() - Duration::from_secs(3600);
        }
    }
}
