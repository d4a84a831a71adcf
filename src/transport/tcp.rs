//! TCP base layer: persistent-reconnect client connection, translated from
//! `Source/IO/Protocol.h`/`Protocol.cpp`'s `Protocol::TCP`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{error, info};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{RECONNECT_SECS, Transport};
use crate::error::{Error, Result};

/// TCP client transport, the base of every layered stack.
pub struct TcpTransport {
    host: String,
    port: u16,
    persistent: bool,
    keep_alive: bool,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    last_disconnect: Option<Instant>,
}

impl TcpTransport {
    /// A transport targeting `host:port`. `persistent` mirrors
    /// `Protocol::TCP`'s `PERSISTENT` option: when true, `connect` after a
    /// failure schedules a retry rather than returning an error forever.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            persistent: true,
            keep_alive: true,
            connect_timeout: Duration::from_secs(5),
            stream: None,
            last_disconnect: None,
        }
    }

    /// Disable automatic reconnect-on-failure (`PERSISTENT false`).
    #[must_use]
    pub fn non_persistent(mut self) -> Self {
        self.persistent = false;
        self
    }

    /// Disable TCP keepalive (`KEEP_ALIVE false`).
    #[must_use]
    pub fn without_keepalive(mut self) -> Self {
        self.keep_alive = false;
        self
    }

    fn ready_to_retry(&self) -> bool {
        match self.last_disconnect {
            None => true,
            Some(t) => t.elapsed() >= Duration::from_secs(RECONNECT_SECS),
        }
    }

    /// The host this transport dials, for layers above it (TLS) that need
    /// to open their own socket against the same target.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port this transport dials.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        if !self.ready_to_retry() {
            return Err(Error::WouldBlock);
        }

        let addr = format!("{}:{}", self.host, self.port);
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                if self.keep_alive {
                    let sock = SockRef::from(&stream);
                    let ka = TcpKeepalive::new().with_time(Duration::from_secs(60));
                    if let Err(e) = sock.set_tcp_keepalive(&ka) {
                        error!("TCP ({}:{}): failed to set keepalive: {e}", self.host, self.port);
                    }
                }
                info!("TCP: connected to {addr}");
                self.stream = Some(stream);
                self.last_disconnect = None;
                Ok(())
            }
            Ok(Err(e)) => {
                self.last_disconnect = Some(Instant::now());
                if self.persistent {
                    error!("TCP ({addr}): connect failed: {e}. Reconnecting.");
                    Err(Error::WouldBlock)
                } else {
                    Err(Error::Io(e))
                }
            }
            Err(_) => {
                self.last_disconnect = Some(Instant::now());
                Err(Error::WouldBlock)
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            self.last_disconnect = Some(Instant::now());
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::IoClosed("not connected".into()));
        };
        match stream.write_all(data).await {
            Ok(()) => Ok(data.len()),
            Err(e) => {
                self.disconnect().await;
                Err(Error::Io(e))
            }
        }
    }

    async fn read(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::IoClosed("not connected".into()));
        };
        let mut tmp = [0u8; 4096];
        match stream.read(&mut tmp).await {
            Ok(0) => {
                self.disconnect().await;
                Err(Error::IoClosed(format!("{}:{} closed by peer", self.host, self.port)))
            }
            Ok(n) => {
                buf.extend_from_slice(&tmp[..n]);
                Ok(n)
            }
            Err(e) => {
                self.disconnect().await;
                Err(Error::Io(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_and_echoes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"hello").await.unwrap();
        });

        let mut t = TcpTransport::new("127.0.0.1", addr.port());
        t.connect().await.unwrap();
        assert!(t.is_connected());

        let mut buf = Vec::new();
        let n = t.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_retryable_not_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut t = TcpTransport::new("127.0.0.1", addr.port());
        let err = t.connect().await.unwrap_err();
        assert!(matches!(err, Error::WouldBlock));
    }
}
