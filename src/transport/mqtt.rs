//! Minimal MQTT 3.1.1 publisher over an inner transport, translated from
//! `Source/IO/Protocol.h`'s `Protocol::MQTT` (`PacketType`, `topic`
//! defaulting to `"ais/data"`, `qos`, `packet_id`, `username`/`password`/
//! `client_id`, `connectPacket`/`subscribePacket`/`readPacket`).
//!
//! Only what an AIS feeder needs is implemented: CONNECT/CONNACK on
//! connect, PUBLISH (QoS 0 or 1) to send, PINGREQ/PINGRESP to keep the
//! session alive. SUBSCRIBE is unused - this layer only publishes.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::Transport;
use crate::error::{Error, Result};

#[repr(u8)]
#[derive(Clone, Copy)]
enum PacketType {
    Connect = 1 << 4,
    Connack = 2 << 4,
    Publish = 3 << 4,
    Puback = 4 << 4,
    Pingreq = 12 << 4,
    Pingresp = 13 << 4,
    Disconnect = 14 << 4,
}

const KEEPALIVE_SECS: u16 = 60;

/// MQTT publisher layer wrapping a lower [`Transport`] (typically TCP or
/// TLS, optionally itself wrapping WebSocket for MQTT-over-WS brokers).
pub struct MqttTransport {
    inner: Box<dyn Transport>,
    client_id: String,
    username: Option<String>,
    password: Option<String>,
    /// Default publish topic, per `Protocol::MQTT::topic = "ais/data"`.
    pub topic: String,
    qos: u8,
    packet_id: u16,
    connected: bool,
    last_ping: Option<Instant>,
    recv: Vec<u8>,
}

impl MqttTransport {
    /// Wrap `inner`, publishing to the default `"ais/data"` topic at QoS 0.
    #[must_use]
    pub fn new(inner: Box<dyn Transport>, client_id: impl Into<String>) -> Self {
        Self {
            inner,
            client_id: client_id.into(),
            username: None,
            password: None,
            topic: "ais/data".to_string(),
            qos: 0,
            packet_id: 1,
            connected: false,
            last_ping: None,
            recv: Vec::new(),
        }
    }

    /// Set broker credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Publish at QoS 1 (wait for PUBACK) instead of the default QoS 0.
    #[must_use]
    pub fn with_qos1(mut self) -> Self {
        self.qos = 1;
        self
    }

    /// Override the default publish topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    fn next_packet_id(&mut self) -> u16 {
        let id = self.packet_id;
        self.packet_id = self.packet_id.wrapping_add(1).max(1);
        id
    }

    fn build_connect(&self) -> Vec<u8> {
        let mut flags: u8 = 0x02; // clean session
        let mut payload = Vec::new();
        push_string(&mut payload, &self.client_id);

        if let (Some(u), Some(p)) = (&self.username, &self.password) {
            flags |= 0x80 | 0x40;
            push_string(&mut payload, u);
            push_string(&mut payload, p);
        }

        let mut variable_header = Vec::new();
        push_string(&mut variable_header, "MQTT");
        variable_header.push(4); // protocol level 3.1.1
        variable_header.push(flags);
        variable_header.extend_from_slice(&KEEPALIVE_SECS.to_be_bytes());

        let mut body = variable_header;
        body.extend_from_slice(&payload);
        frame(PacketType::Connect, 0, &body)
    }

    fn build_publish(&mut self, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        push_string(&mut body, &self.topic);
        let flags = if self.qos > 0 {
            let id = self.next_packet_id();
            body.extend_from_slice(&id.to_be_bytes());
            self.qos << 1
        } else {
            0
        };
        body.extend_from_slice(data);
        frame(PacketType::Publish, flags, &body)
    }

    async fn read_packet(&mut self) -> Result<(u8, Vec<u8>)> {
        loop {
            if let Some((header_byte, remaining_len, consumed)) = try_parse_remaining_length(&self.recv) {
                if self.recv.len() >= consumed + remaining_len {
                    let body = self.recv[consumed..consumed + remaining_len].to_vec();
                    self.recv.drain(..consumed + remaining_len);
                    return Ok((header_byte, body));
                }
            }
            let mut chunk = Vec::new();
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::IoClosed("MQTT: peer closed".into()));
            }
            self.recv.extend_from_slice(&chunk);
        }
    }

    async fn perform_handshake(&mut self) -> Result<()> {
        let connect = self.build_connect();
        self.inner.send(&connect).await?;

        let (header_byte, body) = self.read_packet().await?;
        if header_byte & 0xF0 != PacketType::Connack as u8 {
            return Err(Error::Protocol(format!(
                "MQTT: expected CONNACK, got packet type {:#x}",
                header_byte & 0xF0
            )));
        }
        if body.len() < 2 || body[1] != 0 {
            return Err(Error::Protocol(format!(
                "MQTT: broker rejected CONNECT, return code {}",
                body.get(1).copied().unwrap_or(0xFF)
            )));
        }
        self.connected = true;
        self.last_ping = Some(Instant::now());
        Ok(())
    }
}

fn push_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn push_remaining_length(buf: &mut Vec<u8>, mut length: usize) {
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if length == 0 {
            break;
        }
    }
}

fn frame(kind: PacketType, flags: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![kind as u8 | flags];
    push_remaining_length(&mut out, body.len());
    out.extend_from_slice(body);
    out
}

/// Returns `(fixed_header_byte, remaining_length, bytes_consumed_by_header)`
/// once a complete variable-length header is available, translated from
/// `Protocol::MQTT::readRemainingLength`.
fn try_parse_remaining_length(buf: &[u8]) -> Option<(u8, usize, usize)> {
    if buf.is_empty() {
        return None;
    }
    let header_byte = buf[0];
    let mut multiplier = 1usize;
    let mut value = 0usize;
    let mut pos = 1;
    loop {
        if pos >= buf.len() {
            return None;
        }
        let byte = buf[pos];
        value += (byte & 0x7F) as usize * multiplier;
        pos += 1;
        if byte & 0x80 == 0 {
            break;
        }
        multiplier *= 128;
        if multiplier > 128 * 128 * 128 {
            return None;
        }
    }
    Some((header_byte, value, pos))
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        if !self.inner.is_connected() {
            self.inner.connect().await?;
        }
        self.perform_handshake().await
    }

    async fn disconnect(&mut self) {
        if self.connected {
            let pkt = frame(PacketType::Disconnect, 0, &[]);
            let _ = self.inner.send(&pkt).await;
        }
        self.connected = false;
        self.recv.clear();
        self.inner.disconnect().await;
    }

    fn is_connected(&self) -> bool {
        self.connected && self.inner.is_connected()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        if !self.connected {
            return Err(Error::IoClosed("MQTT not connected".into()));
        }
        if let Some(last) = self.last_ping {
            if last.elapsed() >= Duration::from_secs(KEEPALIVE_SECS as u64 / 2) {
                let ping = frame(PacketType::Pingreq, 0, &[]);
                self.inner.send(&ping).await?;
                self.last_ping = Some(Instant::now());
            }
        }

        let qos = self.qos;
        let publish = self.build_publish(data);
        self.inner.send(&publish).await?;

        if qos > 0 {
            let (header_byte, _body) = self.read_packet().await?;
            if header_byte & 0xF0 != PacketType::Puback as u8 {
                return Err(Error::Protocol(format!(
                    "MQTT: expected PUBACK, got packet type {:#x}",
                    header_byte & 0xF0
                )));
            }
        }
        Ok(data.len())
    }

    async fn read(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let (header_byte, body) = self.read_packet().await?;
        match header_byte & 0xF0 {
            x if x == PacketType::Publish as u8 => {
                // Skip the topic name field; an MQTT publisher has no use
                // for inbound PUBLISH payloads beyond keeping the session
                // alive, so this just surfaces the raw bytes after it.
                if body.len() < 2 {
                    return Ok(0);
                }
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let payload = &body[2 + topic_len..];
                buf.extend_from_slice(payload);
                Ok(payload.len())
            }
            x if x == PacketType::Pingresp as u8 => Ok(0),
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_length_roundtrips_small_and_large() {
        let mut buf = vec![0x30u8];
        push_remaining_length(&mut buf, 2);
        buf.extend_from_slice(b"hi");
        let (header, len, consumed) = try_parse_remaining_length(&buf).unwrap();
        assert_eq!(header, 0x30);
        assert_eq!(len, 2);
        assert_eq!(&buf[consumed..consumed + len], b"hi");

        let mut buf = vec![0x30u8];
        push_remaining_length(&mut buf, 200);
        let (_, len, consumed) = try_parse_remaining_length(&buf).unwrap();
        assert_eq!(len, 200);
        assert_eq!(consumed, 3);
    }

    #[test]
    fn connect_packet_carries_client_id_and_clean_session_flag() {
        let t = MqttTransport::new(Box::new(super::super::tcp::TcpTransport::new("h", 1)), "feeder-1");
        let pkt = t.build_connect();
        assert_eq!(pkt[0], PacketType::Connect as u8);
        // Connect flags byte is right after the "MQTT" string (2 len + 4
        // chars) + protocol level byte.
        let flags_pos = 1 + 1 + 2 + 4 + 1;
        assert_eq!(pkt[flags_pos] & 0x02, 0x02);
    }
}
