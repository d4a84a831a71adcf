//! The NMEA reassembler: the byte-stream state machine that turns a raw
//! feed (possibly interleaved fragments from several channels, possibly
//! wrapped in NMEA-4.0 tag blocks or the custom binary framing) into
//! complete [`Message`]/[`Gps`] frames.
//!
//! Translated from `Source/Marine/NMEA.cpp`: the `IDLE -> JSON | NMEA |
//! BINARY | TAG_BLOCK` branch selection in `Receive`, fragment queueing in
//! `search`/`clean`/`submitAIS`, and the GPS/binary/tag-block helpers now
//! split out into [`gps`], [`binary`] and [`tagblock`].

pub mod binary;
pub mod gps;
pub mod sentence;
pub mod tagblock;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;

use crate::frame::{Tag, TagError};
use crate::message::Message;
use crate::stream::{Connection, Receiver};

const LINE_LIMIT: usize = 1024;
const FRAGMENT_TTL: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Json,
    Nmea,
    Binary,
    TagBlock,
}

struct Pending {
    frag: sentence::Fragment,
    received: Instant,
}

/// Configuration a [`Reassembler`] is built with.
#[derive(Clone, Debug)]
pub struct Config {
    /// This receiver's own MMSI, or -1 if unset (used to tell VDO from VDM).
    pub own_mmsi: i32,
    /// Default station id attached when no tag block overrides it.
    pub station: i32,
    /// Drop sentences/tag-blocks whose checksum does not match, instead of
    /// just flagging [`TagError::NMEA_CHECKSUM_BAD`].
    pub crc_check: bool,
    /// Rebuild NMEA sentences from the decoded payload rather than echoing
    /// the fragments verbatim.
    pub regenerate: bool,
    /// Process VDO (own-station) sentences in addition to VDM.
    pub accept_vdo: bool,
    /// Parse GPS fixes from GGA/RMC/GLL sentences.
    pub include_gps: bool,
    /// Log a warning on drop/reject (matches the source's `warnings` flag).
    pub warnings: bool,
    /// Receiving station position, if known; enables per-message
    /// distance/bearing enrichment for position reports.
    pub station_lat: Option<f32>,
    /// Receiving station longitude.
    pub station_lon: Option<f32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            own_mmsi: -1,
            station: 0,
            crc_check: false,
            regenerate: true,
            accept_vdo: true,
            include_gps: true,
            warnings: true,
            station_lat: None,
            station_lon: None,
        }
    }
}

/// Byte-stream parser producing complete AIS [`Message`]s and [`Gps`] fixes.
/// One instance per upstream feed; not `Sync` - feed bytes from a single
/// thread, same as the teacher's blocks process one stream each.
pub struct Reassembler {
    config: Config,
    state: State,
    line: Vec<u8>,
    prev: u8,
    brace_depth: u32,
    queue: VecDeque<Pending>,
    /// Output connection for assembled AIS messages.
    pub messages: Connection<Message>,
    /// Output connection for GPS fixes.
    pub gps: Connection<crate::frame::Gps>,
}

impl Reassembler {
    /// New reassembler with the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: State::Idle,
            line: Vec::new(),
            prev: 0,
            brace_depth: 0,
            queue: VecDeque::new(),
            messages: Connection::default(),
            gps: Connection::default(),
        }
    }

    /// Wire a receiver for assembled messages, filtered by `groups_in`.
    pub fn subscribe_messages(&self, groups_in: u64, r: Arc<dyn Receiver<Message>>) {
        self.messages.connect(groups_in, r);
    }

    /// Wire a receiver for GPS fixes, filtered by `groups_in`.
    pub fn subscribe_gps(&self, groups_in: u64, r: Arc<dyn Receiver<crate::frame::Gps>>) {
        self.gps.connect(groups_in, r);
    }

    fn reset(&mut self, c: u8) {
        self.state = State::Idle;
        self.line.clear();
        self.prev = c;
    }

    /// Feed one byte of the upstream stream through the state machine.
    pub fn feed(&mut self, c: u8) {
        if self.state == State::Idle {
            match c {
                b'{' if matches!(self.prev, b'\n' | b'\r' | b'}') => {
                    self.line.clear();
                    self.line.push(c);
                    self.state = State::Json;
                    self.brace_depth = 1;
                }
                b'\\' if matches!(self.prev, b'\n' | b'\r') => {
                    self.line.clear();
                    self.line.push(c);
                    self.state = State::TagBlock;
                }
                b'$' | b'!' => {
                    self.line.clear();
                    self.line.push(c);
                    self.state = State::Nmea;
                }
                0xAC => {
                    self.line.clear();
                    self.line.push(c);
                    self.state = State::Binary;
                }
                _ => {}
            }
            self.prev = c;
            return;
        }

        let newline = if self.state == State::Binary {
            c == b'\n'
        } else {
            matches!(c, b'\r' | b'\n' | b'\t' | 0)
        };
        if !newline {
            self.line.push(c);
        }
        self.prev = c;

        match self.state {
            State::Json => self.feed_json(c, newline),
            State::Nmea => self.feed_nmea(newline),
            State::Binary => self.feed_binary(c),
            State::TagBlock => self.feed_tag_block(newline),
            State::Idle => unreachable!(),
        }

        if self.line.len() > LINE_LIMIT {
            self.reset(c);
        }
    }

    /// Feed a whole byte slice.
    pub fn feed_bytes(&mut self, data: &[u8]) {
        for &b in data {
            self.feed(b);
        }
    }

    fn feed_json(&mut self, c: u8, newline: bool) {
        match c {
            b'{' => self.brace_depth += 1,
            b'}' => {
                self.brace_depth -= 1;
                if self.brace_depth == 0 {
                    // JSON ingestion of the AIS-Catcher peer format is out
                    // of scope here (handled upstream by a dedicated peer
                    // listener); the reassembler only needs to recognize
                    // and skip it so binary/NMEA framing on the same feed
                    // stays in sync.
                    self.reset(b'}');
                    return;
                }
            }
            _ => {
                if newline {
                    if self.config.warnings {
                        warn!("nmea: newline in incomplete JSON input");
                    }
                    self.reset(c);
                }
            }
        }
    }

    fn feed_nmea(&mut self, newline: bool) {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        if sentence::is_complete(&line, newline) {
            self.process_nmea_line(&line, 0, None, None);
            self.reset(b'\n');
        }
    }

    fn feed_binary(&mut self, c: u8) {
        if c == b'\n' {
            match binary::decode(&self.line, self.config.station, self.config.own_mmsi) {
                Ok((msg, tag)) => {
                    if msg.validate() {
                        self.messages.send(&msg, &tag);
                    } else if self.config.warnings {
                        warn!(
                            "nmea: invalid binary-framed message of type {} and length {}",
                            msg.kind(),
                            msg.length_bits()
                        );
                    }
                }
                Err(e) => {
                    if self.config.warnings {
                        warn!("nmea: error processing binary packet: {e}");
                    }
                }
            }
            self.reset(b'\n');
        }
    }

    fn feed_tag_block(&mut self, newline: bool) {
        let line = String::from_utf8_lossy(&self.line).into_owned();
        let nmea_part = line
            .get(1..)
            .and_then(|rest| rest.find('\\').map(|i| &rest[i + 1..]))
            .unwrap_or("");
        if sentence::is_complete(nmea_part, newline) {
            match tagblock::parse(&line, self.config.crc_check) {
                Ok((tb, nmea)) => {
                    self.process_nmea_line(nmea, tb.group_id, tb.rxtime_us, tb.station);
                }
                Err(e) => {
                    if self.config.warnings {
                        warn!("nmea: {e}");
                    }
                }
            }
            self.reset(b'\n');
        }
    }

    fn process_nmea_line(&mut self, s: &str, group_id: u32, t: Option<i64>, station: Option<i32>) {
        if s.len() <= 5 {
            return;
        }
        let kind = &s[3..6.min(s.len())];
        match kind {
            "VDM" => self.process_ais(s, group_id, t, station),
            "VDO" if self.config.accept_vdo => self.process_ais(s, group_id, t, station),
            "GGA" if self.config.include_gps => self.process_gps(gps::parse_gga(s)),
            "RMC" if self.config.include_gps => self.process_gps(gps::parse_rmc(s)),
            "GLL" if self.config.include_gps => self.process_gps(gps::parse_gll(s)),
            _ => {}
        }
    }

    fn process_gps(&mut self, parsed: crate::error::Result<crate::frame::Gps>) {
        match parsed {
            Ok(gps) => self.gps.send(&gps, &Tag::default()),
            Err(e) => {
                if self.config.warnings {
                    warn!("nmea: {e}");
                }
            }
        }
    }

    fn process_ais(&mut self, s: &str, group_id: u32, t: Option<i64>, station: Option<i32>) {
        let frag = match sentence::parse(s, group_id) {
            Ok(f) => f,
            Err(e) => {
                if self.config.warnings {
                    warn!("nmea: {e}");
                }
                return;
            }
        };

        let mut error_bits = TagError::empty();
        if !frag.checksum_ok() {
            if self.config.warnings {
                warn!("nmea: incorrect checksum [{}]", frag.sentence);
            }
            if self.config.crc_check {
                return;
            }
            error_bits |= TagError::NMEA_CHECKSUM_BAD;
        }

        let station = station.unwrap_or(self.config.station);

        if frag.count == 1 {
            let mut tag = Tag::default();
            tag.error = error_bits.bits();
            let mut msg = Message::new();
            if let Some(t) = t {
                msg.rxtime_us = t;
            }
            msg.channel = frag.channel;
            msg.station_id = station;
            msg.own_mmsi = self.config.own_mmsi;
            append_fragment(&mut msg, &frag);
            if msg.validate() {
                self.enrich_station_distance(&msg, &mut tag);
                if self.config.regenerate {
                    msg.build_nmea(&tag, None);
                } else {
                    msg.nmea_lines.push(frag.sentence.clone());
                }
                self.messages.send(&msg, &tag);
            } else if self.config.warnings && msg.length_bits() > 0 {
                warn!(
                    "nmea: invalid message of type {} and length {}",
                    msg.kind(),
                    msg.length_bits()
                );
            }
            return;
        }

        let result = self.search(&frag);
        if frag.number as i32 != result + 1 || result == -1 {
            self.clean(frag.channel, frag.talker_id, frag.group_id);
            if frag.number != 1 {
                return;
            }
        }

        let group_id = frag.group_id;
        let channel = frag.channel;
        let talker_id = frag.talker_id;
        let count = frag.count;
        let seq_id = frag.seq_id;
        let is_last = frag.number == frag.count;
        self.queue.push_back(Pending {
            frag,
            received: Instant::now(),
        });
        if !is_last {
            return;
        }

        let mut tag = Tag::default();
        let mut msg = Message::new();
        if let Some(t) = t {
            msg.rxtime_us = t;
        }
        msg.channel = channel;
        msg.station_id = station;
        msg.own_mmsi = self.config.own_mmsi;

        for p in &self.queue {
            let matched = (group_id != 0 && p.frag.group_id == group_id)
                || (group_id == 0 && p.frag.channel == channel && p.frag.talker_id == talker_id);
            if matched && p.frag.count == count && p.frag.seq_id == seq_id {
                if !p.frag.checksum_ok() {
                    tag.error |= TagError::NMEA_CHECKSUM_BAD.bits();
                }
                append_fragment(&mut msg, &p.frag);
                if !self.config.regenerate {
                    msg.nmea_lines.push(p.frag.sentence.clone());
                }
            }
        }

        if msg.validate() {
            self.enrich_station_distance(&msg, &mut tag);
            if self.config.regenerate {
                msg.build_nmea(&tag, Some(seq_id));
            }
            self.messages.send(&msg, &tag);
        } else if self.config.warnings {
            warn!("nmea: invalid message of type {} and length {}", msg.kind(), msg.length_bits());
        }

        self.clean(channel, talker_id, group_id);
    }

    /// Return `0` if no pending assembly matches, `-1` if one matches but
    /// is inconsistent (different `count`/`seq_id`), else the last fragment
    /// number received for it.
    fn search(&self, frag: &sentence::Fragment) -> i32 {
        for p in self.queue.iter().rev() {
            let matched = (frag.group_id != 0 && p.frag.group_id == frag.group_id)
                || (frag.group_id == 0 && p.frag.channel == frag.channel && p.frag.talker_id == frag.talker_id);
            if matched {
                if p.frag.count != frag.count || p.frag.seq_id != frag.seq_id {
                    return -1;
                }
                return i32::from(p.frag.number);
            }
        }
        0
    }

    fn clean(&mut self, channel: u8, talker_id: [u8; 2], group_id: u32) {
        let now = Instant::now();
        self.queue.retain(|p| {
            let matched = (group_id != 0 && p.frag.group_id == group_id)
                || (group_id == 0 && p.frag.channel == channel && p.frag.talker_id == talker_id);
            !matched && now.duration_since(p.received) < FRAGMENT_TTL
        });
    }
}

impl Reassembler {
    /// If this message carries a position and the station's own position is
    /// configured, fill `tag.lat`/`tag.lon` with the decoded fix and
    /// `tag.distance`/`tag.angle` with its great-circle distance/bearing
    /// from the station, per spec.md \S4.7.
    fn enrich_station_distance(&self, msg: &Message, tag: &mut Tag) {
        let (Some(station_lat), Some(station_lon)) = (self.config.station_lat, self.config.station_lon) else {
            return;
        };
        let Some((lat, lon)) = crate::vessel::vessel::decode_position(msg) else {
            return;
        };
        tag.lat = lat;
        tag.lon = lon;
        tag.station_lat = station_lat;
        tag.station_lon = station_lon;
        let (distance, angle) = crate::frame::great_circle(station_lat, station_lon, lat, lon);
        tag.distance = distance;
        tag.angle = angle;
    }
}

fn append_fragment(msg: &mut Message, frag: &sentence::Fragment) {
    for &c in &frag.payload {
        let _ = msg.append_letter(c);
    }
    if frag.count == frag.number {
        let new_len = msg.length_bits().saturating_sub(u16::from(frag.fillbits));
        msg.set_length_bits(new_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Sink(AtomicUsize);
    impl Receiver<Message> for Sink {
        fn accept(&self, _frame: &Message, _tag: &Tag) -> crate::error::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn scenario_single_fragment() {
        let mut r = Reassembler::new(Config::default());
        let sink = Arc::new(Sink(AtomicUsize::new(0)));
        r.subscribe_messages(u64::MAX, sink.clone());
        r.feed_bytes(b"!AIVDM,1,1,,A,13aEOK?P00PD2wVMdLDRhgvL289?,0*26\r\n");
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scenario_multi_fragment_assembles_once() {
        let mut r = Reassembler::new(Config::default());
        let sink = Arc::new(Sink(AtomicUsize::new(0)));
        r.subscribe_messages(u64::MAX, sink.clone());
        r.feed_bytes(b"!AIVDM,2,1,3,B,55P5TL01VIaAL@7WKO@mBplU@<PDhh000000001S;AJ::4A80?4i@E53,0*3E\r\n");
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);
        r.feed_bytes(b"!AIVDM,2,2,3,B,1@0000000000000,2*55\r\n");
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_length_binary_frame_is_dropped_by_validation() {
        // spec.md \S8 boundary behavior: length_bits=0 decodes to kind() ==
        // 0, which validation rejects, so it must never reach a subscriber.
        let mut r = Reassembler::new(Config::default());
        let sink = Arc::new(Sink(AtomicUsize::new(0)));
        r.subscribe_messages(u64::MAX, sink.clone());
        let framed = Message::new().get_binary_nmea(&Tag::default(), false);
        r.feed_bytes(&framed);
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn scenario_tag_block_sets_station_and_time() {
        let mut r = Reassembler::new(Config::default());
        let sink = Arc::new(Sink(AtomicUsize::new(0)));
        r.subscribe_messages(u64::MAX, sink.clone());
        r.feed_bytes(b"\\s:r003669945,c:1681812049*41\\!AIVDM,1,1,,B,13P88o?P00PD@PJMdH3@0?vH28K4,0*4D\r\n");
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn line_overflow_resets_to_idle() {
        let mut r = Reassembler::new(Config::default());
        r.feed_bytes(b"!");
        r.feed_bytes(&vec![b'A'; 2000]);
        assert_eq!(r.state, State::Idle);
    }

    struct CapturingSink(std::sync::Mutex<Option<Tag>>);
    impl Receiver<Message> for CapturingSink {
        fn accept(&self, _frame: &Message, tag: &Tag) -> crate::error::Result<()> {
            *self.0.lock().unwrap() = Some(tag.clone());
            Ok(())
        }
    }

    #[test]
    fn station_position_enriches_distance_and_bearing() {
        let mut cfg = Config::default();
        cfg.station_lat = Some(59.0);
        cfg.station_lon = Some(18.0);
        let mut r = Reassembler::new(cfg);
        let sink = Arc::new(CapturingSink(std::sync::Mutex::new(None)));
        r.subscribe_messages(u64::MAX, sink.clone());
        r.feed_bytes(b"!AIVDM,1,1,,A,13aEOK?P00PD2wVMdLDRhgvL289?,0*26\r\n");

        let tag = sink.0.lock().unwrap().clone().expect("message delivered");
        assert_ne!(tag.distance, crate::frame::UNDEFINED);
        assert_ne!(tag.lat, crate::frame::UNDEFINED);
    }

    #[test]
    fn without_station_position_tag_distance_stays_undefined() {
        let mut r = Reassembler::new(Config::default());
        let sink = Arc::new(CapturingSink(std::sync::Mutex::new(None)));
        r.subscribe_messages(u64::MAX, sink.clone());
        r.feed_bytes(b"!AIVDM,1,1,,A,13aEOK?P00PD2wVMdLDRhgvL289?,0*26\r\n");

        let tag = sink.0.lock().unwrap().clone().expect("message delivered");
        assert_eq!(tag.distance, crate::frame::UNDEFINED);
    }
}
