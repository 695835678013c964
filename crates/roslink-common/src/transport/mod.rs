//! Device transport abstraction.
//!
//! The framework depends on a deliberately narrow surface: open a session,
//! log in, run queries, close. The wire encoding behind that surface is the
//! transport's business; the default [`TcpDeviceTransport`] speaks a
//! length-prefixed JSON framing, and [`mock::MockTransport`] provides a
//! scriptable in-memory stand-in for tests.

pub mod mock;
pub mod tcp;

use crate::protocol::error::Result;
use async_trait::async_trait;
use serde_json::Value;

pub use tcp::{TcpDeviceTransport, TcpTransportConfig};

/// A live control session against the device.
///
/// A session is owned exclusively by one [`PooledConnection`] at a time;
/// it is never shared across concurrent calls.
///
/// [`PooledConnection`]: https://docs.rs/roslink-client
#[async_trait]
pub trait DeviceSession: Send {
    /// Authenticates the session. Must be called once before `run_query`.
    async fn login(&mut self, username: &str, password: &str) -> Result<()>;

    /// Executes one command against the device and returns its result rows.
    async fn run_query(&mut self, command: &str, params: &Value) -> Result<Value>;

    /// Closes the session. Errors on close are reported but the session is
    /// unusable either way.
    async fn close(&mut self) -> Result<()>;
}

/// Factory for [`DeviceSession`]s.
///
/// The connection pool holds one transport and calls `connect` whenever it
/// needs a fresh session (warm-up, replacement after eviction, growth under
/// load).
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn DeviceSession>>;
}
