//! Layered byte transport: TCP, optionally wrapped in TLS, optionally
//! wrapped in a WebSocket framing layer, optionally wrapped in MQTT publish
//! framing - each layer only knows how to talk to the one beneath it,
//! mirroring `Source/IO/Protocol.h`'s `ProtocolBase` chain (`prev`/`next`
//! pointers delegating `connect`/`read`/`send` down the stack and
//! `onConnect`/`onDisconnect` callbacks up it).
//!
//! Where the original chain is built from raw blocking sockets with a
//! hand-rolled non-blocking state machine, this one is built on `tokio`
//! (already part of the crate's async stack for the HTTP server) - each
//! layer is an `async fn`, and the "non-blocking poll" shape becomes a
//! plain `.await`.

pub mod mqtt;
pub mod tcp;
pub mod tls;
pub mod websocket;

use async_trait::async_trait;

use crate::error::Result;

/// One layer of the transport stack. Implementations that wrap an inner
/// transport (TLS over TCP, WebSocket over TLS, MQTT over WebSocket)
/// delegate `read`/`send` to the inner layer after applying their own
/// framing, and call `inner.connect().await` before layering their own
/// handshake on top - exactly the `ProtocolBase::connect` "delegate to
/// prev, then do your own thing" pattern.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish (or re-establish) the connection, including this layer's
    /// own handshake once the inner layer is connected.
    async fn connect(&mut self) -> Result<()>;

    /// Tear down the connection. Implementations should be safe to call
    /// when already disconnected.
    async fn disconnect(&mut self);

    /// True if this layer (and everything beneath it) is ready to
    /// `send`/`read`.
    fn is_connected(&self) -> bool;

    /// Send `data` as one message at this layer (a TCP layer ignores
    /// message boundaries; a WebSocket layer sends one frame; an MQTT
    /// layer sends one PUBLISH). Returns the number of *payload* bytes
    /// accepted, mirroring `ProtocolBase::send`'s "length sent, or <0 on
    /// error" contract minus the sentinel (errors are `Result::Err` here).
    async fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Read the next complete message's payload into `buf`, returning the
    /// number of bytes written (0 on a clean/expected "nothing yet").
    async fn read(&mut self, buf: &mut Vec<u8>) -> Result<usize>;
}

/// How long a persistent layer waits before attempting to reconnect after
/// losing its connection, per `Protocol::TCP::RECONNECT_TIME`.
pub const RECONNECT_SECS: u64 = 10;

/// Maximum frame/message payload size accepted by the WebSocket layer,
/// per `Protocol::WebSocket::MAX_PACKET_SIZE`.
pub const MAX_FRAME_BYTES: usize = 16384;

/// Build the layered transport chain a [`crate::config::TransportConfig`]
/// describes - the daemon-wiring counterpart of the scheme-based chain
/// [`crate::streamer::mqtt_streamer::MqttStreamer::new`] builds from a URL,
/// generalized to cover plain TCP/TLS/WebSocket inputs and outputs too.
#[must_use]
pub fn build(cfg: &crate::config::TransportConfig) -> Box<dyn Transport> {
    use crate::config::TransportConfig;
    use mqtt::MqttTransport;
    use tcp::TcpTransport;
    use tls::TlsTransport;
    use websocket::WebSocketTransport;

    match cfg {
        TransportConfig::Tcp(t) => {
            let mut tcp = TcpTransport::new(t.host.clone(), t.port);
            if !t.persistent {
                tcp = tcp.non_persistent();
            }
            if !t.keep_alive {
                tcp = tcp.without_keepalive();
            }
            Box::new(tcp)
        }
        TransportConfig::Tls(t) => {
            let mut tcp = TcpTransport::new(t.tcp.host.clone(), t.tcp.port);
            if !t.tcp.persistent {
                tcp = tcp.non_persistent();
            }
            if !t.tcp.keep_alive {
                tcp = tcp.without_keepalive();
            }
            let server_name = t.server_name.clone().unwrap_or_else(|| t.tcp.host.clone());
            if t.insecure {
                Box::new(TlsTransport::new_insecure(server_name, tcp))
            } else {
                Box::new(TlsTransport::new(server_name, tcp))
            }
        }
        TransportConfig::WebSocket(w) => {
            let inner = build(&w.transport);
            let host = transport_host(&w.transport);
            Box::new(WebSocketTransport::new(inner, host, w.path.clone()))
        }
        TransportConfig::Mqtt(m) => {
            let inner = build(&m.transport);
            let mut mqtt = MqttTransport::new(inner, m.client_id.clone());
            if let Some(pass) = &m.password {
                mqtt = mqtt.with_credentials(m.username.clone().unwrap_or_default(), pass.clone());
            }
            if m.qos1 {
                mqtt = mqtt.with_qos1();
            }
            Box::new(mqtt)
        }
    }
}

fn transport_host(cfg: &crate::config::TransportConfig) -> String {
    use crate::config::TransportConfig;
    match cfg {
        TransportConfig::Tcp(t) => t.host.clone(),
        TransportConfig::Tls(t) => t.server_name.clone().unwrap_or_else(|| t.tcp.host.clone()),
        TransportConfig::WebSocket(w) => transport_host(&w.transport),
        TransportConfig::Mqtt(m) => transport_host(&m.transport),
    }
}
