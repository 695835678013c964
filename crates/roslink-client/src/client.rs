//! The `DeviceClient` facade.
//!
//! One entry point, [`DeviceClient::execute`], runs every command through
//! the full pipeline: input validation, cache lookup, rate limiter
//! admission, circuit breaker, priority queue, connection pool, and finally
//! the device session. Successes are cached (reads) and audited; failures
//! are classified and audited before they surface. All other methods are
//! side-effect-free aggregations for monitoring.

use roslink_common::classify::{ClassifiedError, ErrorClassifier, ErrorContext};
use roslink_common::protocol::error::{Result, RoslinkError};
use roslink_common::protocol::{classify_command, CommandClass};
use roslink_common::transport::{DeviceTransport, TcpDeviceTransport, TcpTransportConfig};
use roslink_common::validate::{InputType, InputValidator};
use roslink_common::Priority;
use roslink_metrics::{
    FanoutSink, MonitorEvent, MonitorSink, StatsRegistry, StatsSnapshot, TracingSink,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audit::{AuditLevel, AuditLog, AuditRecord};
use crate::breaker::{BreakerState, CircuitBreaker};
use crate::cache::{fingerprint, CacheStats, ResponseCache};
use crate::config::ClientConfig;
use crate::limiter::TokenBucketLimiter;
use crate::pool::{ConnectionPool, PoolStatus};
use crate::queue::{QueueExecutor, QueueStatus, RequestQueue};

/// Per-call options for [`DeviceClient::execute`].
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub priority: Priority,
    /// Overrides `QueueConfig::default_timeout` when set.
    pub timeout: Option<Duration>,
    /// Allows read results to be served from and written to the cache.
    pub use_cache: bool,
    /// Recorded as the audit actor; defaults to the configured device user.
    pub actor: Option<String>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            timeout: None,
            use_cache: true,
            actor: None,
        }
    }
}

/// Result of a successful [`DeviceClient::execute`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub data: Value,
    /// True when the result came from the response cache; no connection was
    /// touched.
    pub cache_hit: bool,
    pub duration: Duration,
    pub priority: Priority,
}

/// Aggregated component state for external monitoring.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub pool: PoolStatus,
    pub breaker: BreakerState,
    pub queue: QueueStatus,
    pub limiter_tokens: f64,
    pub cache: CacheStats,
}

/// Result of [`DeviceClient::health_check`].
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub healthy: bool,
    pub breaker: BreakerState,
    pub pool: PoolStatus,
    pub queue_depth: usize,
    /// 0-100 score derived from recent classified errors.
    pub error_health_score: u8,
}

/// Queue executor over the connection pool: acquire, run, always release.
struct PoolExecutor {
    pool: Arc<ConnectionPool>,
}

#[async_trait::async_trait]
impl QueueExecutor for PoolExecutor {
    async fn execute(&self, command: &str, params: &Value) -> Result<Value> {
        let mut conn = self.pool.acquire().await?;
        // run() marks the connection broken on transport faults; release
        // evicts broken connections instead of recycling them.
        let result = conn.run(command, params).await;
        self.pool.release(conn).await;
        result
    }
}

/// Resilient client for one hotspot device.
pub struct DeviceClient {
    config: ClientConfig,
    pool: Arc<ConnectionPool>,
    breaker: Arc<CircuitBreaker>,
    limiter: TokenBucketLimiter,
    queue: Arc<RequestQueue>,
    cache: ResponseCache,
    audit: Arc<AuditLog>,
    validator: InputValidator,
    classifier: ErrorClassifier,
    registry: Arc<StatsRegistry>,
    sink: Arc<dyn MonitorSink>,
    started_at: Instant,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceClient {
    /// Connects over TCP using the configured endpoint.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or if the warm-up connections cannot
    /// be established and authenticated.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(TcpDeviceTransport::new(TcpTransportConfig {
            addr: format!("{}:{}", config.device.host, config.device.port),
            io_timeout: config.device.io_timeout,
        }));
        Self::with_transport(config, transport).await
    }

    /// Connects through a caller-supplied transport. Tests use this with
    /// `MockTransport`.
    pub async fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn DeviceTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(StatsRegistry::new());
        let sink: Arc<dyn MonitorSink> = Arc::new(FanoutSink::new(vec![
            registry.clone() as Arc<dyn MonitorSink>,
            Arc::new(TracingSink),
        ]));

        let pool = Arc::new(ConnectionPool::new(
            transport,
            config.device.clone(),
            config.pool.clone(),
            sink.clone(),
        ));
        pool.warm_up().await?;

        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone(), sink.clone()));
        let limiter = TokenBucketLimiter::new(config.limiter.clone(), sink.clone());
        let cache = ResponseCache::new(config.cache.clone());
        let audit = Arc::new(AuditLog::open(config.audit.clone(), sink.clone()).await?);
        let queue = RequestQueue::new(
            config.queue.clone(),
            Arc::new(PoolExecutor { pool: pool.clone() }),
        );

        let tasks = vec![
            queue.spawn_dispatcher(),
            pool.spawn_health_checker(),
            audit.spawn_flusher(),
        ];

        info!(
            host = %config.device.host,
            port = config.device.port,
            "device client ready"
        );
        Ok(Self {
            config,
            pool,
            breaker,
            limiter,
            queue,
            cache,
            audit,
            validator: InputValidator::new(),
            classifier: ErrorClassifier::new(),
            registry,
            sink,
            started_at: Instant::now(),
            tasks: Mutex::new(tasks),
        })
    }

    /// Executes one command through the full resilience pipeline.
    ///
    /// # Errors
    ///
    /// Every failure surfaces as a single [`ClassifiedError`] carrying
    /// kind, severity, retryability and recovery suggestions. Validation
    /// and admission rejections never touch a connection.
    pub async fn execute(
        &self,
        command: &str,
        params: Value,
        options: ExecuteOptions,
    ) -> std::result::Result<CommandOutcome, Box<ClassifiedError>> {
        let started = Instant::now();
        let priority = options.priority;
        let actor = options
            .actor
            .clone()
            .unwrap_or_else(|| self.config.device.username.clone());

        let params = match self.validate_inputs(command, params) {
            Ok(params) => params,
            Err(err) => {
                return Err(self
                    .fail(command, &Value::Null, priority, &actor, started, err, "validator")
                    .await);
            }
        };

        let class = classify_command(command);
        let cacheable = options.use_cache && class != CommandClass::Mutation;
        let key = fingerprint(command, &params);
        if cacheable {
            if let Some(data) = self.cache.get(&key) {
                self.sink.notify(&MonitorEvent::CacheHit { key });
                return Ok(CommandOutcome {
                    data,
                    cache_hit: true,
                    duration: started.elapsed(),
                    priority,
                });
            }
            self.sink.notify(&MonitorEvent::CacheMiss { key: key.clone() });
        }

        if let Err(err) = self.limiter.acquire(priority).await {
            return Err(self
                .fail(command, &params, priority, &actor, started, err, "limiter")
                .await);
        }

        let timeout = options.timeout.unwrap_or(self.config.queue.default_timeout);
        let result = self
            .breaker
            .execute(|| async {
                let rx = self
                    .queue
                    .enqueue(command, params.clone(), priority, timeout)?;
                match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(_)) => Err(RoslinkError::Connection(
                        "request dropped during shutdown".to_string(),
                    )),
                    // The device call keeps running and releases its
                    // connection normally; only this caller stops waiting.
                    Err(_) => Err(RoslinkError::Timeout(timeout.as_millis() as u64)),
                }
            })
            .await;

        match result {
            Ok(data) => {
                if cacheable {
                    if let Some(ttl) = self.cache.ttl_for(class) {
                        self.cache.put(key, data.clone(), ttl);
                    }
                }
                let duration = started.elapsed();
                self.sink.notify(&MonitorEvent::CommandSucceeded {
                    command: command.to_string(),
                    priority,
                    duration,
                });
                self.audit_entry(AuditRecord {
                    level: AuditLevel::Info,
                    category: "command",
                    actor: &actor,
                    action: command,
                    details: &params,
                    outcome: "success",
                    duration,
                })
                .await;
                Ok(CommandOutcome {
                    data,
                    cache_hit: false,
                    duration,
                    priority,
                })
            }
            Err(err) => Err(self
                .fail(command, &params, priority, &actor, started, err, "device")
                .await),
        }
    }

    /// Validates the command token and every string parameter, returning
    /// the sanitized parameter set.
    fn validate_inputs(&self, command: &str, params: Value) -> Result<Value> {
        let report = self.validator.validate(command, InputType::CommandToken);
        if report.blocked {
            self.sink.notify(&MonitorEvent::ValidationBlocked {
                field: "command".to_string(),
            });
            return Err(RoslinkError::BlockedInput(format!(
                "command: {}",
                report.errors.join("; ")
            )));
        }
        if !report.errors.is_empty() {
            return Err(RoslinkError::ValidationFailed(format!(
                "command: {}",
                report.errors.join("; ")
            )));
        }

        let Value::Object(map) = params else {
            return Ok(params);
        };
        let mut sanitized = serde_json::Map::with_capacity(map.len());
        for (field, value) in map {
            match value {
                Value::String(text) => {
                    let report = self.validator.validate(&text, InputType::FreeText);
                    if report.blocked {
                        self.sink.notify(&MonitorEvent::ValidationBlocked {
                            field: field.clone(),
                        });
                        return Err(RoslinkError::BlockedInput(format!(
                            "{field}: {}",
                            report.errors.join("; ")
                        )));
                    }
                    if !report.errors.is_empty() {
                        return Err(RoslinkError::ValidationFailed(format!(
                            "{field}: {}",
                            report.errors.join("; ")
                        )));
                    }
                    sanitized.insert(field, Value::String(report.value));
                }
                other => {
                    sanitized.insert(field, other);
                }
            }
        }
        Ok(Value::Object(sanitized))
    }

    /// Classifies a failure, audits it, emits the monitor event and hands
    /// the classified error back for propagation.
    async fn fail(
        &self,
        command: &str,
        params: &Value,
        priority: Priority,
        actor: &str,
        started: Instant,
        err: RoslinkError,
        component: &str,
    ) -> Box<ClassifiedError> {
        let duration = started.elapsed();
        let classified = self
            .classifier
            .classify_error(err, ErrorContext::new(component, command));

        self.sink.notify(&MonitorEvent::CommandFailed {
            command: command.to_string(),
            priority,
            duration,
            error_kind: classified.kind.to_string(),
        });

        let level = match classified.severity {
            roslink_common::classify::Severity::Critical
            | roslink_common::classify::Severity::High => AuditLevel::Critical,
            _ => AuditLevel::Warning,
        };
        self.audit_entry(AuditRecord {
            level,
            category: "command",
            actor,
            action: command,
            details: params,
            outcome: &classified.kind.to_string(),
            duration,
        })
        .await;

        Box::new(classified)
    }

    /// Records an audit entry; the call itself never fails the command.
    async fn audit_entry(&self, record: AuditRecord<'_>) {
        if let Err(err) = self.audit.record(record).await {
            warn!(error = %err, "failed to record audit entry");
        }
    }

    /// Point-in-time view of every component. Side-effect free.
    pub async fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus {
            pool: self.pool.status().await,
            breaker: self.breaker.state(),
            queue: self.queue.status(),
            limiter_tokens: self.limiter.available_tokens(),
            cache: self.cache.stats(),
        }
    }

    /// Counter snapshot derived from the monitoring event stream.
    pub fn statistics(&self) -> StatsSnapshot {
        self.registry.snapshot()
    }

    /// Aggregated health verdict. Side-effect free; no probe is sent.
    pub async fn health_check(&self) -> HealthReport {
        let pool = self.pool.status().await;
        let breaker = self.breaker.state();
        let score = self.classifier.stats().health_score;
        let queue_depth = self.queue.status().depth;
        HealthReport {
            healthy: breaker == BreakerState::Closed
                && pool.live >= self.config.pool.min_size
                && score >= 50,
            breaker,
            pool,
            queue_depth,
            error_health_score: score,
        }
    }

    /// Handle to the audit log for searching, reporting and verification.
    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Uptime since the client was built.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stops background tasks, fails queued requests, flushes the audit
    /// buffer and closes idle connections.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }
        self.queue.fail_all("client shutting down");
        self.cache.clear();
        if let Err(err) = self.audit.flush().await {
            warn!(error = %err, "audit flush during shutdown failed");
        }
        self.pool.close_all().await;
        info!("device client shut down");
    }
}
