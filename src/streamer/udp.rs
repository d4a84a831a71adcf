//! UDP output streamer: a single fire-and-forget datagram socket, translated
//! from `Source/IO/Network.cpp`'s UDP counter/sender (no protocol stack
//! involved - UDP never layers TLS/WebSocket/MQTT).
//!
//! Grounded on spec.md \S4.6: "holds a single non-blocking datagram socket.
//! Supports broadcast flag. Periodic socket recreation (`reset_minutes`)
//! guards against NAT timeouts."

use std::time::Duration;

use log::warn;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::{ChannelReceiver, MessageFormat, render};
use crate::error::Result;
use crate::frame::Tag;
use crate::message::Message;

/// UDP destination and framing.
pub struct UdpStreamer {
    host: String,
    port: u16,
    broadcast: bool,
    reset_interval: Duration,
    format: MessageFormat,
    station_id: i32,
}

impl UdpStreamer {
    /// New streamer targeting `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, format: MessageFormat) -> Self {
        Self {
            host: host.into(),
            port,
            broadcast: false,
            reset_interval: Duration::from_secs(30 * 60),
            format,
            station_id: 0,
        }
    }

    /// Send to the broadcast address.
    #[must_use]
    pub fn with_broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// Override the socket-recreation interval (default 30 minutes).
    #[must_use]
    pub fn with_reset_interval(mut self, d: Duration) -> Self {
        self.reset_interval = d;
        self
    }

    /// Stamp this station's id into every rendered message.
    #[must_use]
    pub fn with_station_id(mut self, station_id: i32) -> Self {
        self.station_id = station_id;
        self
    }

    /// Wire this streamer into a [`crate::stream::Connection`], returning
    /// the `Receiver` half to subscribe and spawning the send-loop task.
    #[must_use]
    pub fn spawn(self) -> ChannelReceiver {
        let (recv, rx) = ChannelReceiver::new();
        tokio::spawn(self.run(rx));
        recv
    }

    async fn bind(&self) -> Result<UdpSocket> {
        let sock = UdpSocket::bind("0.0.0.0:0").await?;
        if self.broadcast {
            sock.set_broadcast(true)?;
        }
        sock.connect((self.host.as_str(), self.port)).await?;
        Ok(sock)
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<(Message, Tag)>) {
        let mut socket = match self.bind().await {
            Ok(s) => s,
            Err(e) => {
                warn!("udp streamer ({}:{}): bind failed: {e}", self.host, self.port);
                return;
            }
        };
        let mut last_reset = tokio::time::Instant::now();

        while let Some((msg, tag)) = rx.recv().await {
            if last_reset.elapsed() >= self.reset_interval {
                match self.bind().await {
                    Ok(s) => socket = s,
                    Err(e) => warn!("udp streamer ({}:{}): recreate failed: {e}", self.host, self.port),
                }
                last_reset = tokio::time::Instant::now();
            }

            let Some(rendered) = render(self.format, &msg, &tag, self.station_id) else {
                continue;
            };
            if let Err(e) = socket.send(rendered.as_bytes()).await {
                warn!("udp streamer ({}:{}): send failed: {e}", self.host, self.port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_a_rendered_datagram() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let streamer = UdpStreamer::new("127.0.0.1", addr.port(), MessageFormat::Nmea);
        let recv = streamer.spawn();

        let mut msg = Message::new();
        msg.set_uint(0, 6, 1).unwrap();
        msg.set_length_bits(168);
        let tag = Tag::default();
        msg.build_nmea(&tag, Some(1));
        crate::stream::Receiver::accept(&recv, &msg, &tag).unwrap();

        let mut buf = [0u8; 256];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("!AIVDM"));
    }
}
