//! TCP listener output streamer: accepts any number of client connections
//! and broadcasts every rendered message to all of them, translated from
//! `Source/IO/Network.cpp`'s server-mode output.
//!
//! Grounded on spec.md \S4.6: "Accepts multiple client connections.
//! Broadcasts every accepted message to all connected clients. Culls a
//! client on write failure. Configurable per-client write timeout."

use std::sync::Arc;

use log::{info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, timeout};

use super::{ChannelReceiver, MessageFormat, render};
use crate::frame::Tag;
use crate::message::Message;

struct Client {
    stream: TcpStream,
}

/// TCP-listener streamer: one bind address, broadcast to every connected
/// client.
pub struct TcpListenerStreamer {
    bind: String,
    port: u16,
    client_timeout: Duration,
    format: MessageFormat,
    station_id: i32,
}

impl TcpListenerStreamer {
    /// New streamer listening on `bind:port`.
    #[must_use]
    pub fn new(bind: impl Into<String>, port: u16, format: MessageFormat) -> Self {
        Self {
            bind: bind.into(),
            port,
            client_timeout: Duration::from_secs(30),
            format,
            station_id: 0,
        }
    }

    /// Override the per-client write timeout (default 30s).
    #[must_use]
    pub fn with_client_timeout(mut self, d: Duration) -> Self {
        self.client_timeout = d;
        self
    }

    /// Stamp this station's id into every rendered message.
    #[must_use]
    pub fn with_station_id(mut self, station_id: i32) -> Self {
        self.station_id = station_id;
        self
    }

    /// Wire this streamer into a [`crate::stream::Connection`], returning
    /// the `Receiver` half to subscribe and spawning the accept+send-loop
    /// tasks.
    #[must_use]
    pub fn spawn(self) -> ChannelReceiver {
        let (recv, rx) = ChannelReceiver::new();
        tokio::spawn(self.run(rx));
        recv
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<(Message, Tag)>) {
        let addr = format!("{}:{}", self.bind, self.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!("tcp-listener streamer ({addr}): bind failed: {e}");
                return;
            }
        };

        let clients: Arc<Mutex<Vec<Client>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_clients = clients.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        info!("tcp-listener streamer: client connected from {peer}");
                        accept_clients.lock().await.push(Client { stream });
                    }
                    Err(e) => {
                        warn!("tcp-listener streamer: accept failed: {e}");
                    }
                }
            }
        });

        while let Some((msg, tag)) = rx.recv().await {
            let Some(rendered) = render(self.format, &msg, &tag, self.station_id) else {
                continue;
            };
            let bytes = rendered.as_bytes();

            let mut guard = clients.lock().await;
            let mut keep = Vec::with_capacity(guard.len());
            for mut client in guard.drain(..) {
                let ok = timeout(self.client_timeout, client.stream.write_all(bytes))
                    .await
                    .map(|r| r.is_ok())
                    .unwrap_or(false);
                if ok {
                    keep.push(client);
                } else {
                    info!("tcp-listener streamer: culling client after write failure");
                }
            }
            *guard = keep;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn broadcasts_to_connected_client() {
        let streamer = TcpListenerStreamer::new("127.0.0.1", 0, MessageFormat::Nmea);
        let bind = "127.0.0.1".to_string();
        let listener = TcpListener::bind(format!("{bind}:0")).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let streamer = TcpListenerStreamer { port, ..streamer };
        let recv = streamer.spawn();

        // give the accept task a moment to start listening
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut msg = Message::new();
        msg.set_uint(0, 6, 1).unwrap();
        msg.set_length_bits(168);
        let tag = Tag::default();
        msg.build_nmea(&tag, Some(1));
        crate::stream::Receiver::accept(&recv, &msg, &tag).unwrap();

        let mut buf = [0u8; 256];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("!AIVDM"));
    }
}
