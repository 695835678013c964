//! Default TCP transport.
//!
//! Speaks a simple session protocol over TCP: each message is a 4-byte
//! big-endian length prefix followed by JSON data. Login is the first query
//! on a fresh session.

use std::net::ToSocketAddrs;
use std::time::Duration;

use crate::protocol::error::{Result, RoslinkError};
use crate::protocol::{QueryFrame, ReplyFrame};
use crate::transport::{DeviceSession, DeviceTransport};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Messages larger than this are rejected before allocation.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16 MB

/// Configuration for the TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Device address, host:port.
    pub addr: String,
    /// Timeout applied to connect and to each query round-trip.
    pub io_timeout: Duration,
}

impl TcpTransportConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host.into(), port),
            io_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }
}

/// TCP-backed [`DeviceTransport`].
pub struct TcpDeviceTransport {
    config: TcpTransportConfig,
}

impl TcpDeviceTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DeviceTransport for TcpDeviceTransport {
    async fn connect(&self) -> Result<Box<dyn DeviceSession>> {
        // Resolve and try each address until one succeeds.
        let socket_addrs = self.config.addr.to_socket_addrs().map_err(|e| {
            RoslinkError::Connection(format!("Invalid address '{}': {}", self.config.addr, e))
        })?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            let attempt = TcpStream::connect(&socket_addr);
            match tokio::time::timeout(self.config.io_timeout, attempt).await {
                Ok(Ok(stream)) => {
                    debug!(addr = %socket_addr, "tcp session established");
                    return Ok(Box::new(TcpDeviceSession {
                        stream: Some(stream),
                        io_timeout: self.config.io_timeout,
                    }));
                }
                Ok(Err(e)) => last_err = Some(e.to_string()),
                Err(_) => {
                    last_err = Some(format!(
                        "connect timed out after {}ms",
                        self.config.io_timeout.as_millis()
                    ))
                }
            }
        }

        Err(RoslinkError::Connection(format!(
            "Failed to connect to {}: {}",
            self.config.addr,
            last_err.unwrap_or_else(|| "Unknown error".to_string())
        )))
    }
}

/// One live TCP session.
struct TcpDeviceSession {
    /// `None` after close.
    stream: Option<TcpStream>,
    io_timeout: Duration,
}

impl TcpDeviceSession {
    async fn round_trip(&mut self, frame: &QueryFrame) -> Result<ReplyFrame> {
        let io_timeout = self.io_timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| RoslinkError::Connection("session is closed".to_string()))?;

        let encoded = serde_json::to_vec(frame)?;

        let exchange = async {
            Self::send_message(stream, &encoded).await?;
            Self::receive_message(stream).await
        };
        let reply_data = tokio::time::timeout(io_timeout, exchange)
            .await
            .map_err(|_| RoslinkError::Timeout(io_timeout.as_millis() as u64))??;

        let reply: ReplyFrame = serde_json::from_slice(&reply_data)?;
        Ok(reply)
    }

    /// Wire format: `[4-byte length as u32 big-endian] + [data]`.
    async fn send_message(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
        let len = data.len() as u32;
        stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| map_io_error(e, "writing length prefix"))?;
        stream
            .write_all(data)
            .await
            .map_err(|e| map_io_error(e, "writing data"))?;
        stream
            .flush()
            .await
            .map_err(|e| map_io_error(e, "flushing stream"))?;
        Ok(())
    }

    async fn receive_message(stream: &mut TcpStream) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| map_io_error(e, "reading length prefix"))?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(RoslinkError::Connection(format!(
                "Message too large: {} bytes (max {} bytes)",
                len, MAX_MESSAGE_SIZE
            )));
        }

        let mut buf = vec![0u8; len];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| map_io_error(e, "reading data"))?;
        Ok(buf)
    }
}

#[async_trait]
impl DeviceSession for TcpDeviceSession {
    async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let frame = QueryFrame::new("/login", json!({ "name": username, "password": password }));
        let reply = self.round_trip(&frame).await?;
        if reply.success {
            Ok(())
        } else {
            Err(RoslinkError::Authentication(
                reply.error.unwrap_or_else(|| "login rejected".to_string()),
            ))
        }
    }

    async fn run_query(&mut self, command: &str, params: &Value) -> Result<Value> {
        let frame = QueryFrame::new(command, params.clone());
        let reply = self.round_trip(&frame).await?;
        if reply.success {
            Ok(reply.data.unwrap_or(Value::Null))
        } else {
            Err(RoslinkError::Command(
                reply.error.unwrap_or_else(|| "unknown device error".to_string()),
            ))
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream
                .shutdown()
                .await
                .map_err(|e| map_io_error(e, "closing session"))?;
        }
        Ok(())
    }
}

/// Maps IO errors to taxonomy variants: timeouts stay timeouts, connection
/// loss is a connection error, everything else passes through as IO.
fn map_io_error(err: std::io::Error, context: &str) -> RoslinkError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            RoslinkError::Timeout(0)
        }
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::BrokenPipe => {
            RoslinkError::Connection(format!("{}: connection lost", context))
        }
        _ => RoslinkError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal in-process device: accepts one session, answers /login and
    /// echoes everything else back as data.
    async fn spawn_echo_device() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    loop {
                        let mut len_buf = [0u8; 4];
                        if stream.read_exact(&mut len_buf).await.is_err() {
                            return;
                        }
                        let len = u32::from_be_bytes(len_buf) as usize;
                        let mut buf = vec![0u8; len];
                        if stream.read_exact(&mut buf).await.is_err() {
                            return;
                        }
                        let frame: QueryFrame = serde_json::from_slice(&buf).unwrap();
                        let reply = if frame.command == "/login" {
                            if frame.params["password"] == "secret" {
                                ReplyFrame::success(frame.id, Value::Null)
                            } else {
                                ReplyFrame::failure(frame.id, "login failure: bad password")
                            }
                        } else {
                            ReplyFrame::success(frame.id, frame.params.clone())
                        };
                        let out = serde_json::to_vec(&reply).unwrap();
                        let out_len = (out.len() as u32).to_be_bytes();
                        if stream.write_all(&out_len).await.is_err() {
                            return;
                        }
                        if stream.write_all(&out).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_connect_login_query_close() {
        let addr = spawn_echo_device().await;
        let (host, port) = addr.rsplit_once(':').unwrap();
        let transport =
            TcpDeviceTransport::new(TcpTransportConfig::new(host, port.parse().unwrap()));

        let mut session = transport.connect().await.unwrap();
        session.login("admin", "secret").await.unwrap();

        let result = session
            .run_query("/user/print", &json!({"filter": "active"}))
            .await
            .unwrap();
        assert_eq!(result, json!({"filter": "active"}));

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_login_failure_maps_to_authentication() {
        let addr = spawn_echo_device().await;
        let (host, port) = addr.rsplit_once(':').unwrap();
        let transport =
            TcpDeviceTransport::new(TcpTransportConfig::new(host, port.parse().unwrap()));

        let mut session = transport.connect().await.unwrap();
        let err = session.login("admin", "wrong").await.unwrap_err();
        assert!(matches!(err, RoslinkError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_connect_to_nothing_fails() {
        let transport = TcpDeviceTransport::new(
            TcpTransportConfig::new("127.0.0.1", 1).with_io_timeout(Duration::from_millis(200)),
        );
        let err = transport.connect().await.err().unwrap();
        assert!(matches!(err, RoslinkError::Connection(_)));
    }

    #[tokio::test]
    async fn test_query_after_close_fails() {
        let addr = spawn_echo_device().await;
        let (host, port) = addr.rsplit_once(':').unwrap();
        let transport =
            TcpDeviceTransport::new(TcpTransportConfig::new(host, port.parse().unwrap()));

        let mut session = transport.connect().await.unwrap();
        session.close().await.unwrap();
        let err = session.run_query("/user/print", &json!({})).await.unwrap_err();
        assert!(matches!(err, RoslinkError::Connection(_)));
    }
}
