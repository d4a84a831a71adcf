//! Cross-module scenarios from spec.md \S8's end-to-end table: behavior that
//! only shows up once the reassembler, vessel database, and transport layer
//! are wired together, as opposed to any one module in isolation.

use std::sync::Arc;

use aisd::nmea::{Config as ReassemblerConfig, Reassembler};
use aisd::stream::ALL_GROUPS;
use aisd::transport::Transport;
use aisd::transport::tcp::TcpTransport;
use aisd::transport::websocket::WebSocketTransport;
use aisd::vessel::persist::SnapshotHandle;

const SENTENCE: &[u8] = b"!AIVDM,1,1,,A,13aEOK?P00PD2wVMdLDRhgvL289?,0*26\r\n";

/// Scenario #4: two peers push the identical sentence to a shared upstream
/// aggregator within the dedup window. Each peer connection gets its own
/// reassembler (mirroring two independent inbound feeds in `main.rs`), but
/// both feed into the same vessel database, which must see the message once.
#[test]
fn scenario_4_dedup_across_two_peer_feeds() {
    let snapshot = Arc::new(SnapshotHandle::new(0, 16));

    let mut feed_a = Reassembler::new(ReassemblerConfig::default());
    let mut feed_b = Reassembler::new(ReassemblerConfig::default());
    feed_a.subscribe_messages(ALL_GROUPS, snapshot.clone());
    feed_b.subscribe_messages(ALL_GROUPS, snapshot.clone());

    feed_a.feed_bytes(SENTENCE);
    feed_b.feed_bytes(SENTENCE);

    snapshot.with_snapshot(|snap| {
        assert_eq!(snap.counter.count(), 1, "second peer's identical sentence must be deduped");
        assert_eq!(snap.db.len(), 1);
        snap.db.with_vessel(244_670_316, |v| assert_eq!(v.message_count, 1)).unwrap();
    });
}

/// Scenario #6: the WebSocket peer sends a Close frame right after the
/// handshake. `read()` must surface it as an error and `is_connected()` must
/// flip to false, so a persistent streamer's reconnect loop notices and
/// retries rather than spinning on a dead socket.
#[tokio::test]
async fn scenario_6_websocket_close_frame_disconnects_client() {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use sha1::{Digest, Sha1};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn extract_key(req: &str) -> String {
        const NEEDLE: &str = "sec-websocket-key:";
        for line in req.lines() {
            let lower = line.to_ascii_lowercase();
            if let Some(pos) = lower.find(NEEDLE) {
                return line[pos + NEEDLE.len()..].trim().to_string();
            }
        }
        panic!("client must send Sec-WebSocket-Key");
    }

    fn accept_key(client_key: &str) -> String {
        const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
        let mut hasher = Sha1::new();
        hasher.update(client_key.as_bytes());
        hasher.update(GUID.as_bytes());
        BASE64.encode(hasher.finalize())
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut req = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = sock.read(&mut chunk).await.unwrap();
            req.extend_from_slice(&chunk[..n]);
            if req.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        let key = extract_key(&String::from_utf8_lossy(&req));
        let accept = accept_key(&key);
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
        );
        sock.write_all(response.as_bytes()).await.unwrap();
        sock.write_all(&[0x88, 0x00]).await.unwrap();
    });

    let tcp = TcpTransport::new("127.0.0.1", addr.port());
    let mut ws = WebSocketTransport::new(Box::new(tcp), "127.0.0.1", "/");
    ws.connect().await.unwrap();
    assert!(ws.is_connected());

    let mut buf = Vec::new();
    let result = ws.read(&mut buf).await;
    assert!(result.is_err(), "a Close frame must surface as an error, not a quiet empty read");
    assert!(!ws.is_connected(), "is_connected() must report false right after the peer's Close");

    server.await.unwrap();
}
