//! In-memory mock transport for tests.
//!
//! Counts connects and queries, supports scripted replies and failure
//! injection. Used by unit tests throughout the workspace; never enabled
//! in production wiring.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::protocol::error::{Result, RoslinkError};
use crate::transport::{DeviceSession, DeviceTransport};
use async_trait::async_trait;
use serde_json::{json, Value};

type Handler = dyn Fn(&str, &Value) -> Result<Value> + Send + Sync;

struct MockShared {
    connects: AtomicU64,
    queries: AtomicU64,
    fail_connects: AtomicU32,
    fail_queries: AtomicU32,
    reject_login: Mutex<bool>,
    latency: Mutex<Duration>,
    handler: Mutex<Arc<Handler>>,
    query_log: Mutex<Vec<String>>,
}

/// Scriptable [`DeviceTransport`] with shared counters.
///
/// Clones share state, so a test can keep one handle while the component
/// under test owns another.
#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<MockShared>,
}

impl MockTransport {
    /// Creates a mock whose queries all succeed with an empty row list.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MockShared {
                connects: AtomicU64::new(0),
                queries: AtomicU64::new(0),
                fail_connects: AtomicU32::new(0),
                fail_queries: AtomicU32::new(0),
                reject_login: Mutex::new(false),
                latency: Mutex::new(Duration::ZERO),
                handler: Mutex::new(Arc::new(|_, _| Ok(json!([])))),
                query_log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Replaces the reply handler.
    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        *self.shared.handler.lock().unwrap() = Arc::new(handler);
        self
    }

    /// The next `n` connect attempts fail with a connection error.
    pub fn fail_next_connects(&self, n: u32) {
        self.shared.fail_connects.store(n, Ordering::SeqCst);
    }

    /// The next `n` queries fail with a connection error, simulating a
    /// protocol-level failure mid-session.
    pub fn fail_next_queries(&self, n: u32) {
        self.shared.fail_queries.store(n, Ordering::SeqCst);
    }

    /// All logins fail with an authentication error while set.
    pub fn set_reject_login(&self, reject: bool) {
        *self.shared.reject_login.lock().unwrap() = reject;
    }

    /// Adds an artificial delay to every query.
    pub fn set_latency(&self, latency: Duration) {
        *self.shared.latency.lock().unwrap() = latency;
    }

    pub fn connect_count(&self) -> u64 {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> u64 {
        self.shared.queries.load(Ordering::SeqCst)
    }

    /// Commands seen so far, in execution order.
    pub fn query_log(&self) -> Vec<String> {
        self.shared.query_log.lock().unwrap().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    async fn connect(&self) -> Result<Box<dyn DeviceSession>> {
        if decrement_if_positive(&self.shared.fail_connects) {
            return Err(RoslinkError::Connection("mock: connect refused".to_string()));
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            shared: self.shared.clone(),
            logged_in: false,
            closed: false,
        }))
    }
}

struct MockSession {
    shared: Arc<MockShared>,
    logged_in: bool,
    closed: bool,
}

#[async_trait]
impl DeviceSession for MockSession {
    async fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
        if *self.shared.reject_login.lock().unwrap() {
            return Err(RoslinkError::Authentication(
                "mock: login rejected".to_string(),
            ));
        }
        self.logged_in = true;
        Ok(())
    }

    async fn run_query(&mut self, command: &str, params: &Value) -> Result<Value> {
        if self.closed {
            return Err(RoslinkError::Connection("mock: session closed".to_string()));
        }
        if !self.logged_in {
            return Err(RoslinkError::Authentication(
                "mock: not logged in".to_string(),
            ));
        }

        let latency = *self.shared.latency.lock().unwrap();
        if latency > Duration::ZERO {
            tokio::time::sleep(latency).await;
        }

        if decrement_if_positive(&self.shared.fail_queries) {
            return Err(RoslinkError::Connection("mock: stream reset".to_string()));
        }

        self.shared.queries.fetch_add(1, Ordering::SeqCst);
        self.shared
            .query_log
            .lock()
            .unwrap()
            .push(command.to_string());

        let handler = self.shared.handler.lock().unwrap().clone();
        handler(command, params)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Atomically decrements `counter` if positive; returns true when it was.
fn decrement_if_positive(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_roundtrip() {
        let mock = MockTransport::new().with_handler(|command, _| {
            Ok(json!({ "echo": command }))
        });

        let mut session = mock.connect().await.unwrap();
        session.login("admin", "pw").await.unwrap();
        let result = session.run_query("/user/print", &json!({})).await.unwrap();
        assert_eq!(result, json!({"echo": "/user/print"}));

        assert_eq!(mock.connect_count(), 1);
        assert_eq!(mock.query_count(), 1);
        assert_eq!(mock.query_log(), vec!["/user/print".to_string()]);
    }

    #[tokio::test]
    async fn test_query_requires_login() {
        let mock = MockTransport::new();
        let mut session = mock.connect().await.unwrap();
        let err = session.run_query("/user/print", &json!({})).await.unwrap_err();
        assert!(matches!(err, RoslinkError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let mock = MockTransport::new();
        mock.fail_next_connects(1);
        assert!(mock.connect().await.is_err());
        assert!(mock.connect().await.is_ok());

        let mut session = mock.connect().await.unwrap();
        session.login("admin", "pw").await.unwrap();
        mock.fail_next_queries(2);
        assert!(session.run_query("/a/print", &json!({})).await.is_err());
        assert!(session.run_query("/a/print", &json!({})).await.is_err());
        assert!(session.run_query("/a/print", &json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_rejection() {
        let mock = MockTransport::new();
        mock.set_reject_login(true);
        let mut session = mock.connect().await.unwrap();
        assert!(session.login("admin", "pw").await.is_err());
    }
}
