//! Error classification.
//!
//! Maps raw [`RoslinkError`]s to a typed taxonomy with severity, retryability
//! and fixed recovery advice, and folds every classified error into running
//! statistics (counts by kind/severity/component, rolling error rate, and a
//! derived 0-100 health score).
//!
//! Classification is a pure function pipeline over the error variant and its
//! message; the classifier itself only adds bookkeeping.

use crate::protocol::error::RoslinkError;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

static ERROR_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Window over which the rolling error rate is computed.
const ERROR_RATE_WINDOW: Duration = Duration::from_secs(60);

/// Typed error kind, one per taxonomy class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Authentication,
    Command,
    System,
    User,
    Profile,
    PoolExhausted,
    RateLimited,
    CircuitOpen,
    Timeout,
    ValidationFailed,
    BlockedInput,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Command => "command",
            ErrorKind::System => "system",
            ErrorKind::User => "user",
            ErrorKind::Profile => "profile",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::BlockedInput => "blocked_input",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Severity assigned to a classified error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Caller-supplied context attached to a classified error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorContext {
    pub component: String,
    pub operation: String,
    pub retry_count: u32,
}

impl ErrorContext {
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            retry_count: 0,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// A classified error: the original failure enriched with taxonomy data.
///
/// This is the single error value callers of the facade receive. It carries
/// everything needed to decide on a reaction without inspecting raw
/// transport errors: kind, severity, retryability and human-readable
/// recovery suggestions.
#[derive(Debug)]
pub struct ClassifiedError {
    pub id: u64,
    pub timestamp: SystemTime,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retryable: bool,
    pub recovery_suggestions: Vec<&'static str>,
    pub context: ErrorContext,
    pub source: RoslinkError,
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{:?}] {} (retryable: {})",
            self.kind, self.severity, self.source, self.retryable
        )
    }
}

impl std::error::Error for ClassifiedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Classifies an error into its taxonomy kind.
///
/// Framework-internal variants map directly. Device-side `Command` errors
/// are refined by message patterns: the device reports login, user and
/// profile problems through free-text error strings.
pub fn classify(error: &RoslinkError) -> ErrorKind {
    match error {
        RoslinkError::Connection(_) | RoslinkError::Io(_) => ErrorKind::Connection,
        RoslinkError::Authentication(_) => ErrorKind::Authentication,
        RoslinkError::Command(msg) => classify_command_message(msg),
        RoslinkError::System(_) | RoslinkError::JsonSerialization(_) => ErrorKind::System,
        RoslinkError::User(_) => ErrorKind::User,
        RoslinkError::Profile(_) => ErrorKind::Profile,
        RoslinkError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
        RoslinkError::RateLimited { .. } => ErrorKind::RateLimited,
        RoslinkError::CircuitOpen(_) => ErrorKind::CircuitOpen,
        RoslinkError::Timeout(_) => ErrorKind::Timeout,
        RoslinkError::QueueFull(_) => ErrorKind::RateLimited,
        RoslinkError::ValidationFailed(_) => ErrorKind::ValidationFailed,
        RoslinkError::BlockedInput(_) => ErrorKind::BlockedInput,
        RoslinkError::Unknown(_) => ErrorKind::Unknown,
    }
}

fn classify_command_message(msg: &str) -> ErrorKind {
    let lower = msg.to_lowercase();
    if lower.contains("login failure") || lower.contains("invalid user name or password") {
        ErrorKind::Authentication
    } else if lower.contains("profile") {
        ErrorKind::Profile
    } else if lower.contains("user") || lower.contains("already have") {
        ErrorKind::User
    } else if lower.contains("not enough") || lower.contains("resource") {
        ErrorKind::System
    } else {
        ErrorKind::Command
    }
}

/// Second rule set: severity per kind, escalated by repeated retries.
pub fn severity(kind: ErrorKind, retry_count: u32) -> Severity {
    let base = match kind {
        ErrorKind::Connection | ErrorKind::PoolExhausted => Severity::High,
        ErrorKind::Authentication | ErrorKind::BlockedInput => Severity::Critical,
        ErrorKind::System | ErrorKind::CircuitOpen => Severity::High,
        ErrorKind::Timeout => Severity::Medium,
        ErrorKind::Command | ErrorKind::User | ErrorKind::Profile => Severity::Medium,
        ErrorKind::RateLimited => Severity::Low,
        ErrorKind::ValidationFailed => Severity::Low,
        ErrorKind::Unknown => Severity::Medium,
    };

    // A failure that survived several retries is worse than its base class.
    if retry_count >= 3 && base < Severity::High {
        Severity::High
    } else {
        base
    }
}

/// Retryability policy, derived from kind.
///
/// Authentication, not-found style user/profile errors and anything the
/// validator rejected will fail identically on retry. Rate-limit rejections
/// are non-retryable by default: the caller must back off, not hammer.
pub fn is_retryable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Connection
            | ErrorKind::Timeout
            | ErrorKind::PoolExhausted
            | ErrorKind::System
            | ErrorKind::Unknown
    )
}

/// Fixed advisory list per kind.
pub fn recovery_suggestions(kind: ErrorKind) -> Vec<&'static str> {
    match kind {
        ErrorKind::Connection => vec![
            "Check device reachability and port",
            "Verify the control service is enabled on the device",
            "Inspect network path for packet loss",
        ],
        ErrorKind::Authentication => vec![
            "Verify configured username and password",
            "Check that the account is not disabled on the device",
        ],
        ErrorKind::Command => vec![
            "Check the command token and parameter names",
            "Consult the device command reference",
        ],
        ErrorKind::System => vec![
            "Check device resource usage (memory, CPU)",
            "Retry after the device recovers",
        ],
        ErrorKind::User => vec![
            "Verify the user exists on the device",
            "Check for duplicate usernames before creation",
        ],
        ErrorKind::Profile => vec![
            "Verify the profile exists on the device",
            "Check profile name spelling",
        ],
        ErrorKind::PoolExhausted => vec![
            "Increase pool max size or acquire timeout",
            "Reduce concurrent callers",
        ],
        ErrorKind::RateLimited => vec![
            "Back off and respect the retry-after hint",
            "Lower the request rate or raise the bucket capacity",
        ],
        ErrorKind::CircuitOpen => vec![
            "Wait for the breaker reset timeout",
            "Investigate the underlying device failures",
        ],
        ErrorKind::Timeout => vec![
            "Increase the per-request timeout",
            "Check device load",
        ],
        ErrorKind::ValidationFailed => vec!["Fix the reported field errors and resubmit"],
        ErrorKind::BlockedInput => vec![
            "Input matched an attack signature; review the caller",
            "This event was recorded for security audit",
        ],
        ErrorKind::Unknown => vec!["Inspect logs for the raw error"],
    }
}

/// Point-in-time view of classifier statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierStats {
    pub total: u64,
    pub by_kind: HashMap<String, u64>,
    pub by_severity: HashMap<String, u64>,
    pub by_component: HashMap<String, u64>,
    /// Errors per minute over the rolling window.
    pub recent_error_rate: f64,
    /// 0-100; 100 means no recent errors.
    pub health_score: u8,
}

#[derive(Default)]
struct StatsInner {
    total: u64,
    by_kind: HashMap<ErrorKind, u64>,
    by_severity: HashMap<Severity, u64>,
    by_component: HashMap<String, u64>,
    recent: Vec<(Instant, Severity)>,
}

/// Stateful classifier: classification plus running statistics.
///
/// Thread-safe; the facade holds one instance and funnels every failure
/// through it before surfacing the error to the caller.
pub struct ErrorClassifier {
    stats: Mutex<StatsInner>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(StatsInner::default()),
        }
    }

    /// Classifies an error, assigns it a unique id and timestamp, and folds
    /// it into the running statistics.
    ///
    /// # Arguments
    ///
    /// * `error` - the raw failure, consumed and embedded in the result
    /// * `context` - caller-supplied component/operation/retry snapshot
    pub fn classify_error(&self, error: RoslinkError, context: ErrorContext) -> ClassifiedError {
        let kind = classify(&error);
        let severity = severity(kind, context.retry_count);
        let retryable = is_retryable(kind);

        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.total += 1;
            *stats.by_kind.entry(kind).or_insert(0) += 1;
            *stats.by_severity.entry(severity).or_insert(0) += 1;
            *stats
                .by_component
                .entry(context.component.clone())
                .or_insert(0) += 1;
            let now = Instant::now();
            stats.recent.push((now, severity));
            stats
                .recent
                .retain(|(at, _)| now.duration_since(*at) <= ERROR_RATE_WINDOW);
        }

        ClassifiedError {
            id: ERROR_ID_COUNTER.fetch_add(1, Ordering::SeqCst),
            timestamp: SystemTime::now(),
            kind,
            severity,
            retryable,
            recovery_suggestions: recovery_suggestions(kind),
            context,
            source: error,
        }
    }

    /// Returns a snapshot of the running statistics, including the derived
    /// health score.
    pub fn stats(&self) -> ClassifierStats {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        stats
            .recent
            .retain(|(at, _)| now.duration_since(*at) <= ERROR_RATE_WINDOW);

        let rate_per_minute = stats.recent.len() as f64;
        let score = Self::health_score_from(&stats.recent, rate_per_minute);

        ClassifierStats {
            total: stats.total,
            by_kind: stats
                .by_kind
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            by_severity: stats
                .by_severity
                .iter()
                .map(|(k, v)| (format!("{k:?}").to_lowercase(), *v))
                .collect(),
            by_component: stats.by_component.clone(),
            recent_error_rate: rate_per_minute,
            health_score: score,
        }
    }

    /// Health score: start from 100, subtract per recent error weighted by
    /// severity, floor at 0.
    fn health_score_from(recent: &[(Instant, Severity)], rate_per_minute: f64) -> u8 {
        let mut penalty = 0.0f64;
        for (_, sev) in recent {
            penalty += match sev {
                Severity::Critical => 15.0,
                Severity::High => 8.0,
                Severity::Medium => 3.0,
                Severity::Low => 1.0,
                Severity::Info => 0.5,
            };
        }
        // Sustained rate adds pressure beyond individual weights.
        penalty += (rate_per_minute / 10.0).floor();
        (100.0 - penalty).clamp(0.0, 100.0) as u8
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
