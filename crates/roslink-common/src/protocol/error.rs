use std::time::Duration;
use thiserror::Error;

/// Error taxonomy for the roslink framework.
///
/// Variants fall into two groups: failure signals the circuit breaker
/// counts (`Connection`, `Authentication`, `Command`, `System`, `User`,
/// `Profile`, `Timeout`, `PoolExhausted`, `Unknown`) and framework-internal
/// rejections (`RateLimited`, `CircuitOpen`, `QueueFull`,
/// `ValidationFailed`, `BlockedInput`). Internal rejections never touch a
/// connection and are therefore cheap; callers can distinguish them from
/// transport errors to back off correctly.
#[derive(Error, Debug)]
pub enum RoslinkError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Device system error: {0}")]
    System(String),

    #[error("User operation failed: {0}")]
    User(String),

    #[error("Profile operation failed: {0}")]
    Profile(String),

    #[error("Connection pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Circuit breaker is open: {0}")]
    CircuitOpen(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Request queue is full (capacity {0})")]
    QueueFull(usize),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Input blocked by security filter: {0}")]
    BlockedInput(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl RoslinkError {
    /// Returns whether the error was produced by the framework itself,
    /// without a connection having been touched.
    ///
    /// Pool exhaustion is not in this set: a pool that cannot hand out a
    /// connection in time is a device-health signal and counts against the
    /// circuit breaker.
    pub fn is_internal_rejection(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::CircuitOpen(_)
                | Self::QueueFull(_)
                | Self::ValidationFailed(_)
                | Self::BlockedInput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RoslinkError>;
