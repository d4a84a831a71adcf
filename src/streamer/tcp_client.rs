//! Persistent TCP (or TCP+TLS) client output streamer, translated from
//! `Source/IO/Output.cpp`'s network output over a `Protocol::ProtocolBase`
//! chain.
//!
//! Grounded on spec.md \S4.6: "On send failure with `persistent=false`,
//! requests process shutdown; with `persistent=true`, buffers one block and
//! retries the connection."

use log::{error, warn};
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};

use super::{ChannelReceiver, MessageFormat, render};
use crate::frame::Tag;
use crate::message::Message;
use crate::transport::Transport;

/// TCP-client streamer: formats each message and writes it to a persistent
/// outbound connection, reconnecting on failure.
pub struct TcpClientStreamer {
    transport: Box<dyn Transport>,
    format: MessageFormat,
    station_id: i32,
    persistent: bool,
    /// Set when a non-persistent send failure should bring the daemon down,
    /// per spec.md \S4.6. `None` means "log and drop", matching a persistent
    /// streamer's own internal retry instead of a process-wide shutdown.
    shutdown: Option<mpsc::UnboundedSender<()>>,
}

impl TcpClientStreamer {
    /// New streamer writing through `transport` (already configured as
    /// TCP or TCP+TLS).
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, format: MessageFormat) -> Self {
        Self {
            transport,
            format,
            station_id: 0,
            persistent: true,
            shutdown: None,
        }
    }

    /// Request process shutdown (rather than silent drop) on send failure
    /// when this streamer is non-persistent.
    #[must_use]
    pub fn non_persistent(mut self, shutdown: mpsc::UnboundedSender<()>) -> Self {
        self.persistent = false;
        self.shutdown = Some(shutdown);
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

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<(Message, Tag)>) {
        let mut pending: Option<(Message, Tag)> = None;
        loop {
            let next = match pending.take() {
                Some(p) => Some(p),
                None => rx.recv().await,
            };
            let Some((msg, tag)) = next else {
                return;
            };

            let Some(rendered) = render(self.format, &msg, &tag, self.station_id) else {
                continue;
            };

            if !self.transport.is_connected() && self.transport.connect().await.is_err() {
                pending = Some((msg, tag));
                sleep(Duration::from_secs(crate::transport::RECONNECT_SECS)).await;
                continue;
            }

            if let Err(e) = self.transport.send(rendered.as_bytes()).await {
                warn!("tcp-client streamer: send failed: {e}");
                self.transport.disconnect().await;
                if self.persistent {
                    pending = Some((msg, tag));
                } else {
                    error!("tcp-client streamer: non-persistent send failed, requesting shutdown");
                    if let Some(tx) = &self.shutdown {
                        let _ = tx.send(());
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tcp::TcpTransport;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn delivers_rendered_message_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut tmp = [0u8; 256];
            let n = sock.read(&mut tmp).await.unwrap();
            buf.extend_from_slice(&tmp[..n]);
            buf
        });

        let transport = Box::new(TcpTransport::new("127.0.0.1", addr.port()));
        let streamer = TcpClientStreamer::new(transport, MessageFormat::Nmea);
        let recv = streamer.spawn();

        let mut msg = Message::new();
        msg.set_uint(0, 6, 1).unwrap();
        msg.set_length_bits(168);
        let tag = Tag::default();
        msg.build_nmea(&tag, Some(1));
        crate::stream::Receiver::accept(&recv, &msg, &tag).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), server).await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&received).starts_with("!AIVDM"));
    }
}
