//! Roslink Client
//!
//! Resilience layer for talking to a RouterOS-style hotspot device over a
//! narrow session transport. Every command issued through
//! [`DeviceClient::execute`] passes input validation, a response cache, a
//! priority-aware token bucket, a circuit breaker, a five-lane priority
//! queue and a bounded connection pool, and is recorded in a hash-chained
//! audit log.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use roslink_client::{ClientConfig, DeviceClient, ExecuteOptions};
//! use roslink_common::Priority;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = ClientConfig::default();
//! config.device.host = "10.0.0.1".to_string();
//! config.device.password = "secret".to_string();
//!
//! let client = DeviceClient::connect(config).await?;
//!
//! let outcome = client
//!     .execute(
//!         "/user/print",
//!         json!({}),
//!         ExecuteOptions {
//!             priority: Priority::High,
//!             ..ExecuteOptions::default()
//!         },
//!     )
//!     .await?;
//! println!("rows: {} (cached: {})", outcome.data, outcome.cache_hit);
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod breaker;
pub mod cache;
pub mod client;
pub mod config;
pub mod limiter;
pub mod pool;
pub mod queue;

pub use audit::{
    AuditEvent, AuditLevel, AuditLog, AuditRecord, AuditReport, IntegrityReport, SearchCriteria,
    SegmentReport,
};
pub use breaker::{BreakerState, CircuitBreaker};
pub use cache::{CacheStats, ResponseCache};
pub use client::{CommandOutcome, ConnectionStatus, DeviceClient, ExecuteOptions, HealthReport};
pub use config::{
    AuditConfig, BreakerConfig, CacheConfig, ClientConfig, DeviceConfig, LimiterConfig,
    PoolConfig, QueueConfig,
};
pub use limiter::{AdmitDecision, Admission, TokenBucketLimiter};
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use queue::{QueueExecutor, QueueStatus, RequestQueue};
