//! Output streamers: each wraps an async channel as a [`Receiver`] so a
//! [`crate::stream::Connection`] can fan messages out to it from whatever
//! thread produced them, while the streamer's own socket/timer work runs on
//! its own task - the same "one thread owns one block's output" shape as
//! the teacher's `tee.rs` fan-out, generalized from a synchronous copy into
//! an async queue feeding a `tokio` task.
//!
//! [`render`] turns a `(Message, Tag)` pair into the wire representation
//! named by [`MessageFormat`], shared by every streamer so each one only
//! has to own its own transport/socket handling.

pub mod http_post;
pub mod mqtt_streamer;
pub mod tcp_client;
pub mod tcp_listener;
pub mod udp;

use tokio::sync::mpsc;

pub use crate::config::MessageFormat;
use crate::error::{Error, Result};
use crate::frame::{Tag, UNDEFINED};
use crate::message::Message;
use crate::stream::Receiver;

/// Sending half of a streamer's inbound queue, implementing [`Receiver`] so
/// it can be wired directly into a [`crate::stream::Connection`].
pub struct ChannelReceiver {
    tx: mpsc::UnboundedSender<(Message, Tag)>,
}

impl ChannelReceiver {
    /// New channel pair: the `Receiver<Message>` half to subscribe with
    /// [`crate::stream::Connection::connect`], the [`mpsc::UnboundedReceiver`]
    /// half to drive a streamer's own send loop from.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Message, Tag)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Receiver<Message> for ChannelReceiver {
    fn accept(&self, msg: &Message, tag: &Tag) -> Result<()> {
        self.tx
            .send((msg.clone(), tag.clone()))
            .map_err(|_| Error::IoClosed("streamer channel closed".into()))
    }
}

/// One rendered message, ready to hand to a streamer's transport.
#[derive(Clone, Debug)]
pub enum Rendered {
    /// Text formats: NMEA variants and every JSON variant.
    Text(String),
    /// The custom `0xAC`-framed binary encoding.
    Binary(Vec<u8>),
}

impl Rendered {
    /// Borrow the rendered bytes regardless of which variant this is.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Rendered::Text(s) => s.as_bytes(),
            Rendered::Binary(b) => b,
        }
    }
}

/// Render `msg`/`tag` per `format`, or `None` for [`MessageFormat::Silent`]
/// (accept-and-discard).
#[must_use]
pub fn render(format: MessageFormat, msg: &Message, tag: &Tag, station_id: i32) -> Option<Rendered> {
    match format {
        MessageFormat::Nmea => Some(Rendered::Text(msg.nmea_lines.join("\r\n"))),
        MessageFormat::NmeaTag => Some(Rendered::Text(tag_block_wrap(msg, station_id))),
        MessageFormat::BinaryNmea => Some(Rendered::Binary(msg.get_binary_nmea(tag, true))),
        MessageFormat::JsonNmea => Some(Rendered::Text(msg.to_peer_json(tag, 0, "aisd", 1))),
        MessageFormat::JsonSparse => Some(Rendered::Text(sparse_json(msg, tag))),
        MessageFormat::JsonFull => Some(Rendered::Text(msg.to_peer_json(tag, 0, "aisd", 1))),
        MessageFormat::CommunityHub => Some(Rendered::Text(community_hub_envelope(station_id, std::slice::from_ref(&(msg.clone(), tag.clone()))))),
        MessageFormat::Silent => None,
    }
}

/// Wrap each of `msg`'s NMEA sentences in its own IEC 61162-450 tag block,
/// per spec.md \S6 (`\s:<station>,c:<ts>[,g:<seq>-<total>-<gid>]*XX\`).
fn tag_block_wrap(msg: &Message, station_id: i32) -> String {
    let secs = msg.rxtime_us / 1_000_000;
    let total = msg.nmea_lines.len();
    msg.nmea_lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let mut body = format!("s:s{station_id},c:{secs}");
            if total > 1 {
                body.push_str(&format!(",g:{}-{}-1", i + 1, total));
            }
            let sum = crate::nmea::sentence::checksum(body.as_bytes());
            format!("\\{body}*{sum:02X}\\{line}")
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Minimal JSON_SPARSE rendering: only the fields a consumer can get from
/// the message/tag pair without re-decoding AIS payload semantics (decoding
/// every field to human-readable JSON is out of scope per SPEC_FULL.md
/// \S4; richer per-message views belong to the HTTP vessel endpoints,
/// which read the already-decoded [`crate::vessel::Vessel`] instead).
fn sparse_json(msg: &Message, tag: &Tag) -> String {
    serde_json::json!({
        "mmsi": msg.mmsi(),
        "type": msg.kind(),
        "channel": (msg.channel as char).to_string(),
        "rxuxtime": msg.rxtime_us / 1_000_000,
        "signalpower": if tag.level == UNDEFINED { serde_json::Value::Null } else { serde_json::json!(tag.level) },
    })
    .to_string()
}

/// Community-hub container envelope shared by the AISCATCHER/AIRFRAMES
/// container formats (spec.md \S4.6): one object wrapping a batch of
/// already-rendered peer-JSON messages.
#[must_use]
pub fn community_hub_envelope(station_id: i32, batch: &[(Message, Tag)]) -> String {
    let msgs: Vec<serde_json::Value> = batch
        .iter()
        .map(|(m, t)| serde_json::from_str(&m.to_peer_json(t, 0, "aisd", 1)).unwrap_or(serde_json::Value::Null))
        .collect();
    serde_json::json!({
        "protocol": "jsonaiscatcher",
        "encodetime": chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        "stationid": station_id,
        "receiver": {},
        "device": "aisd",
        "msgs": msgs,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Message, Tag) {
        let mut m = Message::new();
        m.set_uint(0, 6, 1).unwrap();
        m.set_uint(8, 30, 123_456_789).unwrap();
        m.set_length_bits(168);
        let tag = Tag::default();
        m.build_nmea(&tag, Some(1));
        (m, tag)
    }

    #[test]
    fn silent_format_renders_nothing() {
        let (m, t) = sample();
        assert!(render(MessageFormat::Silent, &m, &t, 0).is_none());
    }

    #[test]
    fn nmea_tag_wraps_every_sentence() {
        let (m, t) = sample();
        let Some(Rendered::Text(out)) = render(MessageFormat::NmeaTag, &m, &t, 7) else {
            panic!("expected text");
        };
        assert!(out.starts_with("\\s:s7,c:"));
        assert!(out.contains("!AIVDM"));
    }

    #[test]
    fn binary_nmea_round_trips_through_decoder() {
        let (m, t) = sample();
        let Some(Rendered::Binary(bytes)) = render(MessageFormat::BinaryNmea, &m, &t, 0) else {
            panic!("expected binary");
        };
        let (decoded, _tag) = crate::nmea::binary::decode(&bytes, 0, -1).unwrap();
        assert_eq!(decoded.mmsi(), m.mmsi());
    }

    #[test]
    fn community_hub_wraps_a_batch() {
        let (m, t) = sample();
        let json = community_hub_envelope(3, &[(m, t)]);
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["stationid"], 3);
        assert_eq!(v["msgs"].as_array().unwrap().len(), 1);
    }
}
