//! Token bucket rate limiter with priority preemption.
//!
//! Tokens refill continuously up to `capacity`. Lower priority classes may
//! only draw while the bucket holds a reserve above their threshold, so
//! scarce tokens are preempted by higher classes; a waiter that has waited
//! beyond the fairness bound is promoted one class so no class starves
//! indefinitely. Rejection (bucket dry and waiter queue full) is a distinct
//! non-retryable error and a monitor event.

use roslink_common::protocol::error::{Result, RoslinkError};
use roslink_common::Priority;
use roslink_metrics::{MonitorEvent, MonitorSink};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::LimiterConfig;

/// Polling slice while a caller waits for refill.
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Non-blocking admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitDecision {
    /// A token was consumed; proceed.
    Admitted,
    /// No token available for this class yet; retry after the hint.
    Delayed(Duration),
    /// Bucket dry and waiter queue full; do not retry blindly.
    Rejected,
}

/// Proof of admission, carrying how long the caller waited.
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub waited: Duration,
    /// Class the request was finally admitted under (may differ from the
    /// requested one after fairness promotion).
    pub admitted_as: Priority,
}

struct BucketInner {
    tokens: f64,
    last_refill: Instant,
    waiters: usize,
}

/// Registration in the waiter count. Dropping it releases the slot, so a
/// cancelled `acquire` future cannot leak a waiter.
struct WaiterSlot<'a> {
    limiter: &'a TokenBucketLimiter,
}

impl Drop for WaiterSlot<'_> {
    fn drop(&mut self) {
        let mut inner = self
            .limiter
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        inner.waiters = inner.waiters.saturating_sub(1);
    }
}

/// Priority-aware token bucket.
pub struct TokenBucketLimiter {
    config: LimiterConfig,
    inner: Mutex<BucketInner>,
    sink: Arc<dyn MonitorSink>,
}

impl TokenBucketLimiter {
    pub fn new(config: LimiterConfig, sink: Arc<dyn MonitorSink>) -> Self {
        Self {
            inner: Mutex::new(BucketInner {
                tokens: config.capacity as f64,
                last_refill: Instant::now(),
                waiters: 0,
            }),
            config,
            sink,
        }
    }

    /// Tokens a class must leave in the bucket for higher classes.
    ///
    /// `Critical` has no reserve: it is never held back while any token
    /// exists.
    fn reserve_for(&self, priority: Priority) -> f64 {
        let capacity = self.config.capacity as f64;
        match priority {
            Priority::Critical => 0.0,
            Priority::High => capacity * 0.05,
            Priority::Normal => capacity * 0.10,
            Priority::Low => capacity * 0.15,
            Priority::Background => capacity * 0.25,
        }
    }

    /// Tokens that must be present for this class to draw one. Clamped to
    /// the bucket capacity so a small bucket stays acquirable by every
    /// class.
    fn needed_for(&self, priority: Priority) -> f64 {
        (1.0 + self.reserve_for(priority)).min(self.config.capacity as f64)
    }

    fn refill(&self, inner: &mut BucketInner, now: Instant) {
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        inner.tokens = (inner.tokens + elapsed * self.config.refill_per_second)
            .min(self.config.capacity as f64);
        inner.last_refill = now;
    }

    /// Non-blocking admission check.
    pub fn check(&self, priority: Priority) -> AdmitDecision {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut inner, now);

        let needed = self.needed_for(priority);
        if inner.tokens >= needed {
            inner.tokens -= 1.0;
            return AdmitDecision::Admitted;
        }

        if inner.waiters >= self.config.max_waiters {
            return AdmitDecision::Rejected;
        }

        let missing = needed - inner.tokens;
        let secs = missing / self.config.refill_per_second;
        AdmitDecision::Delayed(Duration::from_secs_f64(secs))
    }

    /// Waits for admission, honoring priority reserves and the fairness
    /// promotion bound.
    ///
    /// # Errors
    ///
    /// Returns [`RoslinkError::RateLimited`] when the bucket is dry and the
    /// waiter queue is full. The error carries a retry-after hint; it is
    /// non-retryable by policy so callers back off deliberately.
    pub async fn acquire(&self, priority: Priority) -> Result<Admission> {
        let start = Instant::now();
        let mut slot: Option<WaiterSlot<'_>> = None;

        let result = loop {
            let waited = start.elapsed();
            let effective = if waited >= self.config.fairness_wait {
                priority.promoted()
            } else {
                priority
            };

            match self.check_as_waiter(effective, slot.is_some()) {
                AdmitDecision::Admitted => {
                    break Ok(Admission {
                        waited,
                        admitted_as: effective,
                    });
                }
                AdmitDecision::Rejected => {
                    self.sink.notify(&MonitorEvent::LimiterRejected { priority });
                    break Err(RoslinkError::RateLimited {
                        retry_after: self.retry_after_hint(effective),
                    });
                }
                AdmitDecision::Delayed(delay) => {
                    if slot.is_none() {
                        slot = Some(WaiterSlot { limiter: self });
                    }
                    tokio::time::sleep(delay.min(WAIT_SLICE)).await;
                }
            }
        };
        drop(slot);

        if let Ok(admission) = &result {
            self.sink.notify(&MonitorEvent::LimiterAdmitted {
                priority,
                waited: admission.waited,
            });
        }

        result
    }

    /// Like [`check`](Self::check), but registers the caller as a waiter on
    /// its first delay so the waiter cap is enforced. The caller must hold
    /// a [`WaiterSlot`] once registered; its drop releases the count.
    fn check_as_waiter(&self, priority: Priority, already_registered: bool) -> AdmitDecision {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut inner, now);

        let needed = self.needed_for(priority);
        if inner.tokens >= needed {
            inner.tokens -= 1.0;
            return AdmitDecision::Admitted;
        }

        if !already_registered {
            if inner.waiters >= self.config.max_waiters {
                return AdmitDecision::Rejected;
            }
            inner.waiters += 1;
        }

        let missing = needed - inner.tokens;
        let secs = missing / self.config.refill_per_second;
        AdmitDecision::Delayed(Duration::from_secs_f64(secs))
    }

    fn retry_after_hint(&self, priority: Priority) -> Duration {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let missing = (self.needed_for(priority) - inner.tokens).max(0.0);
        Duration::from_secs_f64(missing / self.config.refill_per_second)
    }

    /// Current token count, for status reporting.
    pub fn available_tokens(&self) -> f64 {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut inner, now);
        inner.tokens
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use roslink_metrics::{NullSink, RecordingSink};

    fn limiter(capacity: u32, refill: f64) -> TokenBucketLimiter {
        TokenBucketLimiter::new(
            LimiterConfig {
                capacity,
                refill_per_second: refill,
                fairness_wait: Duration::from_secs(5),
                max_waiters: 100,
            },
            Arc::new(NullSink),
        )
    }

    #[test]
    fn test_burst_up_to_capacity() {
        let limiter = limiter(10, 1.0);
        for _ in 0..10 {
            assert_eq!(limiter.check(Priority::Critical), AdmitDecision::Admitted);
        }
        assert!(matches!(
            limiter.check(Priority::Critical),
            AdmitDecision::Delayed(_)
        ));
    }

    #[test]
    fn test_admissions_bounded_over_window() {
        // With zero effective refill, admissions over any window never
        // exceed capacity.
        let limiter = limiter(5, 0.001);
        let mut admitted = 0;
        for _ in 0..50 {
            if limiter.check(Priority::Critical) == AdmitDecision::Admitted {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[test]
    fn test_low_priority_blocked_by_reserve() {
        let limiter = limiter(20, 0.001);
        // Drain down to 4 tokens: below the background reserve (25% of 20
        // = 5) but plenty for critical.
        for _ in 0..16 {
            assert_eq!(limiter.check(Priority::Critical), AdmitDecision::Admitted);
        }
        assert!(matches!(
            limiter.check(Priority::Background),
            AdmitDecision::Delayed(_)
        ));
        // Critical is never held back while tokens exist.
        assert_eq!(limiter.check(Priority::Critical), AdmitDecision::Admitted);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = limiter(1, 20.0);
        assert_eq!(limiter.check(Priority::Normal), AdmitDecision::Admitted);

        let start = Instant::now();
        let admission = limiter.acquire(Priority::Normal).await.unwrap();
        // Needs one token (reserve clamps at capacity) at 20/s from ~0:
        // about 50ms.
        assert!(admission.waited >= Duration::from_millis(20));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_rejection_when_waiters_full() {
        let sink = Arc::new(RecordingSink::new());
        let limiter = TokenBucketLimiter::new(
            LimiterConfig {
                capacity: 1,
                refill_per_second: 0.001,
                fairness_wait: Duration::from_secs(5),
                max_waiters: 0,
            },
            sink.clone(),
        );
        assert_eq!(limiter.check(Priority::Normal), AdmitDecision::Admitted);

        let err = limiter.acquire(Priority::Normal).await.unwrap_err();
        assert!(matches!(err, RoslinkError::RateLimited { .. }));
        assert_eq!(
            sink.count_matching(|e| matches!(e, MonitorEvent::LimiterRejected { .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_cancelled_waiter_frees_slot() {
        let limiter = TokenBucketLimiter::new(
            LimiterConfig {
                capacity: 1,
                refill_per_second: 0.001,
                fairness_wait: Duration::from_secs(5),
                max_waiters: 1,
            },
            Arc::new(NullSink),
        );
        assert_eq!(limiter.check(Priority::Normal), AdmitDecision::Admitted);

        // Drop an acquire mid-wait, after it has registered as a waiter.
        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), limiter.acquire(Priority::Normal))
                .await;
        assert!(cancelled.is_err());

        // The slot is free again: a contended check is delayed, not
        // rejected for a full waiter queue.
        assert!(matches!(
            limiter.check(Priority::Normal),
            AdmitDecision::Delayed(_)
        ));
    }

    #[tokio::test]
    async fn test_fairness_promotion() {
        let limiter = TokenBucketLimiter::new(
            LimiterConfig {
                capacity: 20,
                refill_per_second: 0.0001,
                fairness_wait: Duration::from_millis(30),
                max_waiters: 10,
            },
            Arc::new(NullSink),
        );

        // Hold the bucket just above the low reserve so background is
        // delayed but low is admitted; after the fairness bound the
        // background request is promoted to low and gets through. Refill
        // is effectively zero so the level stays put while we wait.
        {
            let mut inner = limiter.inner.lock().unwrap();
            inner.tokens = 4.5; // background needs 6.0, low needs 4.0
        }

        assert!(matches!(
            limiter.check(Priority::Background),
            AdmitDecision::Delayed(_)
        ));

        let admission = limiter.acquire(Priority::Background).await.unwrap();
        assert_eq!(admission.admitted_as, Priority::Low);
        assert!(admission.waited >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_admission_event_emitted() {
        let sink = Arc::new(RecordingSink::new());
        let limiter = TokenBucketLimiter::new(LimiterConfig::default(), sink.clone());
        limiter.acquire(Priority::High).await.unwrap();
        assert_eq!(
            sink.count_matching(|e| matches!(e, MonitorEvent::LimiterAdmitted { .. })),
            1
        );
    }
}
