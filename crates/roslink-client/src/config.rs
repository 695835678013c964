//! Client configuration.
//!
//! One struct per component, gathered under [`ClientConfig`]. Every field is
//! named and validated; there are no loosely-typed option bags.

use roslink_common::protocol::error::{Result, RoslinkError};
use std::path::PathBuf;
use std::time::Duration;

/// Device endpoint and credentials.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Timeout for connect and per-query IO.
    pub io_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "192.168.88.1".to_string(),
            port: 8728,
            username: "api".to_string(),
            password: String::new(),
            io_timeout: Duration::from_secs(5),
        }
    }
}

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections kept alive after warm-up; the health checker replenishes
    /// to this floor.
    pub min_size: usize,
    /// Hard cap on live connections.
    pub max_size: usize,
    /// How long `acquire` waits for an idle or newly created connection.
    pub acquire_timeout: Duration,
    /// A connection is recycled after this many calls.
    pub max_uses: u32,
    /// Interval between background health probes.
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 5,
            acquire_timeout: Duration::from_secs(10),
            max_uses: 1000,
            health_check_interval: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures within the tracking window before tripping open.
    pub failure_threshold: u32,
    /// Base wait before the first half-open probe.
    pub reset_timeout: Duration,
    /// Cap for the exponential backoff applied to repeated trips.
    pub max_reset_timeout: Duration,
    /// Backoff multiplier per consecutive trip.
    pub backoff_multiplier: f64,
    /// Consecutive probe successes required to close again.
    pub probe_successes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            max_reset_timeout: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            probe_successes: 2,
        }
    }
}

/// Token bucket limiter settings.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Maximum tokens (burst size).
    pub capacity: u32,
    /// Continuous refill rate.
    pub refill_per_second: f64,
    /// A waiter older than this is promoted one priority class so low
    /// lanes cannot starve indefinitely.
    pub fairness_wait: Duration,
    /// Waiters beyond this are rejected outright.
    pub max_waiters: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_per_second: 10.0,
            fairness_wait: Duration::from_secs(5),
            max_waiters: 100,
        }
    }
}

/// Request queue settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Hard cap on queued items across all lanes; enqueue beyond it is
    /// rejected, never blocked.
    pub max_size: usize,
    /// Simultaneously in-flight dispatches.
    pub max_concurrency: usize,
    /// Enables coalescing of same-command read-only items.
    pub batching: bool,
    /// Upper bound on items dispatched together.
    pub batch_size: usize,
    /// Age window within which co-queued read items may be batched. Once an
    /// item is pulled into a batch its queue deadline is disarmed; a slow
    /// batch may exceed the original per-item deadline.
    pub batch_timeout: Duration,
    /// Default per-request deadline when the caller gives none.
    pub default_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 500,
            max_concurrency: 4,
            batching: false,
            batch_size: 10,
            batch_timeout: Duration::from_millis(50),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    /// TTL for slow-changing system info reads.
    pub system_info_ttl: Duration,
    /// TTL for user/session listings.
    pub listing_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            system_info_ttl: Duration::from_secs(60),
            listing_ttl: Duration::from_secs(5),
        }
    }
}

/// Audit log settings.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Directory segments are written to.
    pub directory: PathBuf,
    /// Buffered events before a flush is forced.
    pub buffer_size: usize,
    /// Timer flush interval.
    pub flush_interval: Duration,
    /// Events per segment before rotation.
    pub segment_max_events: usize,
    /// Segments older than this are purged.
    pub retention_days: u32,
    /// Maintains the per-segment digest chain when enabled.
    pub integrity_mode: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("audit"),
            buffer_size: 64,
            flush_interval: Duration::from_secs(10),
            segment_max_events: 10_000,
            retention_days: 90,
            integrity_mode: true,
        }
    }
}

/// Full client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub device: DeviceConfig,
    pub pool: PoolConfig,
    pub breaker: BreakerConfig,
    pub limiter: LimiterConfig,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
    pub audit: AuditConfig,
}

impl ClientConfig {
    /// Rejects inconsistent settings before any component is built.
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_size == 0 {
            return Err(RoslinkError::ValidationFailed(
                "pool.max_size must be at least 1".to_string(),
            ));
        }
        if self.pool.min_size > self.pool.max_size {
            return Err(RoslinkError::ValidationFailed(
                "pool.min_size must not exceed pool.max_size".to_string(),
            ));
        }
        if self.queue.max_concurrency == 0 {
            return Err(RoslinkError::ValidationFailed(
                "queue.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.queue.max_concurrency > self.pool.max_size {
            return Err(RoslinkError::ValidationFailed(
                "queue.max_concurrency must not exceed pool.max_size".to_string(),
            ));
        }
        if self.limiter.capacity == 0 || self.limiter.refill_per_second <= 0.0 {
            return Err(RoslinkError::ValidationFailed(
                "limiter.capacity and limiter.refill_per_second must be positive".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.probe_successes == 0 {
            return Err(RoslinkError::ValidationFailed(
                "breaker thresholds must be at least 1".to_string(),
            ));
        }
        if self.breaker.backoff_multiplier < 1.0 {
            return Err(RoslinkError::ValidationFailed(
                "breaker.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.queue.batching && self.queue.batch_size < 2 {
            return Err(RoslinkError::ValidationFailed(
                "queue.batch_size must be at least 2 when batching is enabled".to_string(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(RoslinkError::ValidationFailed(
                "cache.capacity must be at least 1".to_string(),
            ));
        }
        if self.audit.buffer_size == 0 {
            return Err(RoslinkError::ValidationFailed(
                "audit.buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let mut config = ClientConfig::default();
        config.pool.min_size = 10;
        config.pool.max_size = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_concurrency_above_pool_rejected() {
        let mut config = ClientConfig::default();
        config.queue.max_concurrency = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_refill_rejected() {
        let mut config = ClientConfig::default();
        config.limiter.refill_per_second = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_batching_requires_batch_size() {
        let mut config = ClientConfig::default();
        config.queue.batching = true;
        config.queue.batch_size = 1;
        assert!(config.validate().is_err());
        config.queue.batch_size = 8;
        assert!(config.validate().is_ok());
    }
}
