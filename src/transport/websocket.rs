//! RFC 6455 WebSocket framing over an inner transport, translated from
//! `Source/IO/Protocol.h`'s `Protocol::WebSocket` (`OPCODE`, handshake,
//! `getFrames`/`populateData`, `sha1Hash`).

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use sha1::{Digest, Sha1};

use super::{MAX_FRAME_BYTES, Transport};
use crate::error::{Error, Result};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }
}

/// WebSocket client layer wrapping any lower [`Transport`] (plain TCP or
/// TLS). Frames sent to the server are masked per RFC 6455 \S5.3; frames
/// received from the server are expected unmasked.
pub struct WebSocketTransport {
    inner: Box<dyn Transport>,
    host: String,
    path: String,
    binary: bool,
    handshake_done: bool,
    raw: Vec<u8>,
}

impl WebSocketTransport {
    /// Wrap `inner`, which must already resolve to `host`, performing the
    /// handshake against `path` (default `"/"` in the original).
    #[must_use]
    pub fn new(inner: Box<dyn Transport>, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            inner,
            host: host.into(),
            path: path.into(),
            binary: true,
            handshake_done: false,
            raw: Vec::new(),
        }
    }

    /// Send frames with the TEXT opcode instead of BINARY (for JSON-over-WS
    /// peers such as aiscatcher.org's feed protocol).
    #[must_use]
    pub fn as_text(mut self) -> Self {
        self.binary = false;
        self
    }

    async fn handshake(&mut self) -> Result<()> {
        let mut key_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut key_bytes);
        let key = BASE64.encode(key_bytes);

        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: {host}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n\r\n",
            path = self.path,
            host = self.host,
        );
        self.inner.send(request.as_bytes()).await?;

        let mut response = Vec::new();
        loop {
            if let Some(pos) = find_header_end(&response) {
                let header = String::from_utf8_lossy(&response[..pos]).to_string();
                let tail = response[pos + 4..].to_vec();
                self.raw = tail;
                return self.verify_handshake(&header, &key);
            }
            let mut chunk = Vec::new();
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Protocol("WebSocket handshake: peer closed".into()));
            }
            response.extend_from_slice(&chunk);
            if response.len() > MAX_FRAME_BYTES {
                return Err(Error::Oversize {
                    limit: MAX_FRAME_BYTES,
                    actual: response.len(),
                });
            }
        }
    }

    fn verify_handshake(&mut self, header: &str, key: &str) -> Result<()> {
        let mut lines = header.split("\r\n");
        let status = lines
            .next()
            .ok_or_else(|| Error::Protocol("WebSocket handshake: empty response".into()))?;
        if !status.contains("101") {
            return Err(Error::Protocol(format!(
                "WebSocket handshake rejected: {status}"
            )));
        }

        let expect = accept_key(key);
        let accept_ok = header
            .lines()
            .any(|l| l.to_ascii_lowercase().starts_with("sec-websocket-accept:") && l.ends_with(&expect));
        if !accept_ok {
            return Err(Error::Protocol(
                "WebSocket handshake: Sec-WebSocket-Accept mismatch".into(),
            ));
        }
        self.handshake_done = true;
        Ok(())
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

fn encode_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 14);
    frame.push(0x80 | opcode.to_u8());

    let mut mask_key = [0u8; 4];
    rand::rng().fill_bytes(&mut mask_key);

    let len = payload.len();
    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(&mask_key);
    for (i, b) in payload.iter().enumerate() {
        frame.push(b ^ mask_key[i % 4]);
    }
    frame
}

/// A parsed frame header plus where its payload starts, or `None` if `buf`
/// doesn't yet hold a complete header.
struct FrameHeader {
    opcode: Opcode,
    fin: bool,
    masked: bool,
    payload_len: usize,
    header_len: usize,
}

fn parse_frame_header(buf: &[u8]) -> Result<Option<FrameHeader>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let fin = buf[0] & 0x80 != 0;
    let opcode = Opcode::from_u8(buf[0] & 0x0F)
        .ok_or_else(|| Error::Protocol(format!("WebSocket: unknown opcode {:#x}", buf[0] & 0x0F)))?;
    let masked = buf[1] & 0x80 != 0;
    let len_field = buf[1] & 0x7F;

    let (payload_len, mut pos) = match len_field {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(b) as usize, 10)
        }
        n => (n as usize, 2),
    };
    if masked {
        pos += 4;
    }
    if payload_len > MAX_FRAME_BYTES {
        return Err(Error::Oversize {
            limit: MAX_FRAME_BYTES,
            actual: payload_len,
        });
    }
    if buf.len() < pos + payload_len {
        return Ok(None);
    }
    Ok(Some(FrameHeader {
        opcode,
        fin,
        masked,
        payload_len,
        header_len: pos,
    }))
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&mut self) -> Result<()> {
        if !self.inner.is_connected() {
            self.inner.connect().await?;
        }
        if !self.handshake_done {
            self.handshake().await?;
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.handshake_done = false;
        self.raw.clear();
        self.inner.disconnect().await;
    }

    fn is_connected(&self) -> bool {
        self.handshake_done && self.inner.is_connected()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        if data.len() > MAX_FRAME_BYTES {
            return Err(Error::Oversize {
                limit: MAX_FRAME_BYTES,
                actual: data.len(),
            });
        }
        let opcode = if self.binary { Opcode::Binary } else { Opcode::Text };
        let frame = encode_frame(opcode, data);
        self.inner.send(&frame).await?;
        Ok(data.len())
    }

    async fn read(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        loop {
            if let Some(header) = parse_frame_header(&self.raw)? {
                let mask_offset = header.header_len - if header.masked { 4 } else { 0 };
                let payload_start = header.header_len;
                let payload_end = payload_start + header.payload_len;
                let mut payload = self.raw[payload_start..payload_end].to_vec();
                if header.masked {
                    let mask = [
                        self.raw[mask_offset],
                        self.raw[mask_offset + 1],
                        self.raw[mask_offset + 2],
                        self.raw[mask_offset + 3],
                    ];
                    for (i, b) in payload.iter_mut().enumerate() {
                        *b ^= mask[i % 4];
                    }
                }
                self.raw.drain(..payload_end);

                match header.opcode {
                    Opcode::Close => {
                        self.disconnect().await;
                        return Err(Error::IoClosed("WebSocket peer sent Close".into()));
                    }
                    Opcode::Ping => {
                        self.inner.send(&encode_frame(Opcode::Pong, &payload)).await?;
                        continue;
                    }
                    Opcode::Pong | Opcode::Continuation => continue,
                    Opcode::Text | Opcode::Binary => {
                        if !header.fin {
                            return Err(Error::Protocol(
                                "WebSocket: fragmented messages are not supported".into(),
                            ));
                        }
                        buf.extend_from_slice(&payload);
                        return Ok(payload.len());
                    }
                }
            }

            let mut chunk = Vec::new();
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return Ok(0);
            }
            self.raw.extend_from_slice(&chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // The example key/accept pair from RFC 6455 \S1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn encode_frame_masks_payload_and_sets_fin_opcode() {
        let frame = encode_frame(Opcode::Binary, b"hi");
        assert_eq!(frame[0], 0x82); // FIN=1, opcode=BINARY
        assert_eq!(frame[1] & 0x80, 0x80); // MASK bit set
        assert_eq!(frame[1] & 0x7F, 2); // payload len
    }

    #[test]
    fn parse_frame_header_reports_incomplete_on_short_buffer() {
        assert!(parse_frame_header(&[0x82]).unwrap().is_none());
    }

    #[test]
    fn parse_frame_header_rejects_oversize_payload() {
        let mut buf = vec![0x82, 127];
        buf.extend_from_slice(&(MAX_FRAME_BYTES as u64 + 1).to_be_bytes());
        assert!(parse_frame_header(&buf).is_err());
    }
}
