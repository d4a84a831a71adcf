//! The AIS [`Message`]: a bit-packed, immutable-after-build payload carrier
//! plus its NMEA/binary/JSON serializations.
//!
//! Bit accessors and the NMEA/binary builders are straight translations of
//! `Source/Marine/Message.cpp`'s `getUint`/`setUint`/`getLetter`/`setLetter`/
//! `buildNMEA`/`getBinaryNMEA`, into `Result`-returning, bounds-checked Rust.

use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{TimeZone, Utc};

use crate::crc::crc16_ibm;
use crate::error::{Error, Result};
use crate::frame::{Tag, UNDEFINED};

/// Bytes backing [`Message::data`]. One spare byte past the 128-byte AIS
/// payload so [`Message::get_letter`] can safely peek the following byte at
/// the very end of a full-length message, as the original's `data[129]`
/// does.
const DATA_BYTES: usize = 129;
const MAX_AIS_BYTES: usize = 128;
/// Maximum bit length of an AIS payload.
pub const MAX_AIS_BITS: usize = MAX_AIS_BYTES * 8;
const MAX_NMEA_CHARS: usize = 56;

/// Minimum valid bit length per AIS message type (`type` 1..=27, 1-indexed).
pub const MIN_LENGTH: [u16; 27] = [
    149, 149, 149, 168, 418, 88, 72, 56, 168, 70, 168, 72, 40, 40, 88, 92, 80, 168, 312, 70, 271,
    145, 154, 160, 72, 60, 96,
];

/// Process-wide multi-sentence group id, cycling 1..=9 across every message
/// built with more than one NMEA sentence.
static NEXT_GROUP_ID: AtomicU8 = AtomicU8::new(1);

fn next_group_id() -> u8 {
    NEXT_GROUP_ID
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
            Some(if id >= 9 { 1 } else { id + 1 })
        })
        .unwrap_or(1)
}

/// One decoded (or about-to-be-encoded) AIS message: bit-packed payload,
/// receive time, originating channel/station, and the NMEA sentence(s) it
/// was assembled from or will be rebuilt into.
#[derive(Clone, Debug)]
pub struct Message {
    data: [u8; DATA_BYTES],
    length_bits: u16,
    /// Microseconds since the Unix epoch.
    pub rxtime_us: i64,
    /// Originating channel, `'A'..'D'` or `'?'` if unknown.
    pub channel: u8,
    /// Receiving station id, or 0 if none.
    pub station_id: i32,
    /// This receiver's own MMSI, or -1 if not configured. Used to tell
    /// AIVDO (own-station) sentences from AIVDM (other-station) ones.
    pub own_mmsi: i32,
    /// Raw or rebuilt NMEA sentence(s) this message was carried in.
    pub nmea_lines: Vec<String>,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            data: [0u8; DATA_BYTES],
            length_bits: 0,
            rxtime_us: 0,
            channel: b'?',
            station_id: 0,
            own_mmsi: -1,
            nmea_lines: Vec::new(),
        }
    }
}

impl Message {
    /// New empty message stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        let mut m = Self::default();
        m.stamp();
        m
    }

    /// Stamp `rxtime_us` with the current wall-clock time.
    pub fn stamp(&mut self) {
        self.rxtime_us = Utc::now().timestamp_micros();
    }

    /// Bit length of the packed payload.
    #[must_use]
    pub fn length_bits(&self) -> u16 {
        self.length_bits
    }

    /// Force the bit length (used when a reassembler has already validated
    /// sextet count and fill bits for a just-decoded payload).
    pub fn set_length_bits(&mut self, len: u16) {
        self.length_bits = len.min(MAX_AIS_BITS as u16);
    }

    /// Raw payload bytes, `ceil(length_bits/8)` of them meaningful.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length_bits.div_ceil(8) as usize]
    }

    /// AIS message type, `data[0] >> 2`.
    #[must_use]
    pub fn kind(&self) -> u8 {
        self.data[0] >> 2
    }

    /// AIS repeat indicator, `data[0] & 3`.
    #[must_use]
    pub fn repeat(&self) -> u8 {
        self.data[0] & 3
    }

    /// MMSI, bits 8..38.
    #[must_use]
    pub fn mmsi(&self) -> u32 {
        self.get_uint(8, 30)
    }

    /// True if the decoded payload satisfies the per-type minimum length,
    /// per spec.md \S8 invariant 1. A zero-length message (`length_bits ==
    /// 0`, as a degenerate binary frame produces) decodes to `kind() == 0`,
    /// outside `1..=27`, so it's rejected by the same general check rather
    /// than needing a special case.
    #[must_use]
    pub fn validate(&self) -> bool {
        let t = self.kind();
        if !(1..=27).contains(&t) {
            return false;
        }
        self.length_bits >= MIN_LENGTH[(t - 1) as usize]
    }

    /// Read `len` (<=32) bits starting at bit offset `start`, MSB-first.
    #[must_use]
    pub fn get_uint(&self, start: usize, len: usize) -> u32 {
        let mut x = start >> 3;
        let y = start & 7;
        let mut u = u32::from(self.data[x]) & (0xFFu32 >> y);
        let mut remaining = len as i32 - 8 + y as i32;
        if remaining <= 0 {
            return u >> ((-remaining) as u32);
        }
        while remaining >= 8 {
            x += 1;
            u <<= 8;
            u |= u32::from(self.data.get(x).copied().unwrap_or(0));
            remaining -= 8;
        }
        if remaining > 0 {
            x += 1;
            u <<= remaining as u32;
            u |= u32::from(self.data.get(x).copied().unwrap_or(0)) >> (8 - remaining) as u32;
        }
        u
    }

    /// Read `len` (<=32) bits as a two's-complement signed integer.
    #[must_use]
    pub fn get_int(&self, start: usize, len: usize) -> i32 {
        let u = self.get_uint(start, len);
        if u & (1 << (len - 1)) != 0 {
            (u | (!0u32 << len)) as i32
        } else {
            u as i32
        }
    }

    /// Write `val`'s low `len` bits starting at bit offset `start`,
    /// widening `length_bits` if this extends the payload.
    pub fn set_uint(&mut self, start: usize, len: usize, val: u32) -> Result<()> {
        if start + len >= MAX_AIS_BITS {
            return Err(Error::Oversize {
                limit: MAX_AIS_BITS,
                actual: start + len,
            });
        }
        let mut x = start >> 3;
        let y = start & 7;
        let mut remaining = len as i32;

        if 8 - y as i32 >= remaining {
            let shift = (8 - y as i32 - remaining) as u32;
            let bitmask = (0xFFu32 >> (8 - remaining) as u32) << shift;
            self.data[x] =
                ((u32::from(self.data[x]) & !bitmask) | ((val << shift) & bitmask)) as u8;
            self.length_bits = self.length_bits.max((start + len) as u16);
            return Ok(());
        }

        let bitmask0 = 0xFFu32 >> y;
        self.data[x] = ((u32::from(self.data[x]) & !bitmask0)
            | ((val >> (remaining - 8 + y as i32) as u32) & bitmask0)) as u8;
        remaining -= 8 - y as i32;
        x += 1;

        while remaining >= 8 {
            self.data[x] = ((val >> (remaining - 8) as u32) & 0xFF) as u8;
            x += 1;
            remaining -= 8;
        }

        if remaining > 0 {
            let shift = (8 - remaining) as u32;
            let bitmask = 0xFFu32 << shift;
            self.data[x] =
                ((u32::from(self.data[x]) & !bitmask) | ((val << shift) & bitmask)) as u8;
        }
        self.length_bits = self.length_bits.max((start + len) as u16);
        Ok(())
    }

    /// Write `val` as a two's-complement signed field.
    pub fn set_int(&mut self, start: usize, len: usize, val: i32) -> Result<()> {
        self.set_uint(start, len, val as u32)
    }

    /// Decode a 6-bit-per-character AIS text field (`@`-terminated,
    /// trailing padding trimmed by the caller).
    #[must_use]
    pub fn get_text(&self, start: usize, len: usize) -> String {
        let end = start + len;
        let mut s = String::new();
        let mut pos = start;
        while pos < end {
            let c = self.get_uint(pos, 6);
            if c == 0 {
                break;
            }
            let c = if c & 32 == 0 { c | 64 } else { c };
            if let Some(ch) = char::from_u32(c) {
                s.push(ch);
            }
            pos += 6;
        }
        s
    }

    /// One AIS-alphabet sextet at payload position `pos` (6-bit units),
    /// zero-padded past `length_bits`, rendered to its printable character.
    #[must_use]
    pub fn get_letter(&self, pos: usize) -> u8 {
        let x = (pos * 6) >> 3;
        let y = (pos * 6) & 7;
        let w = (u16::from(self.data[x]) << 8) | u16::from(self.data.get(x + 1).copied().unwrap_or(0));
        let mask: u16 = (1 << 6) - 1;
        let mut l = (w >> (16 - 6 - y)) & mask;
        let overrun = (pos * 6 + 6) as i32 - i32::from(self.length_bits);
        if overrun > 0 {
            l &= 0xFFu16 << overrun;
        }
        sextet_to_char(l as u8)
    }

    /// Set the sextet at payload position `pos` from its AIS-alphabet
    /// character, extending `length_bits`.
    pub fn set_letter(&mut self, pos: usize, c: u8) -> Result<()> {
        let x = (pos * 6) >> 3;
        let y = (pos * 6) & 7;
        let newlen = ((pos + 1) * 6).max(self.length_bits as usize);
        if newlen >= MAX_AIS_BITS {
            return Err(Error::Oversize {
                limit: MAX_AIS_BITS,
                actual: newlen,
            });
        }
        self.length_bits = newlen as u16;
        let c = char_to_sextet(c);
        match y {
            0 => self.data[x] = (self.data[x] & 0b0000_0011) | (c << 2),
            2 => self.data[x] = (self.data[x] & 0b1100_0000) | c,
            4 => {
                self.data[x] = (self.data[x] & 0b1111_0000) | (c >> 2);
                self.data[x + 1] = (self.data[x + 1] & 0b0011_1111) | ((c & 3) << 6);
            }
            6 => {
                self.data[x] = (self.data[x] & 0b1111_1100) | (c >> 4);
                self.data[x + 1] = (self.data[x + 1] & 0b0000_1111) | ((c & 15) << 4);
            }
            _ => {}
        }
        Ok(())
    }

    /// Append one more sextet past the current payload length.
    pub fn append_letter(&mut self, c: u8) -> Result<()> {
        let pos = self.length_bits as usize / 6;
        self.set_letter(pos, c)
    }

    /// Duplicate-suppression key: 30 bits MMSI, 1 bit channel, 5 bits type,
    /// 28 bits FNV-1a over the payload bytes.
    #[must_use]
    pub fn get_hash(&self) -> u64 {
        let mut hash: u64 = u64::from(self.mmsi() & 0x3FFF_FFFF);
        hash |= u64::from(self.channel == b'B') << 30;
        hash |= u64::from(u32::from(self.kind()) & 0x1F) << 31;

        let mut data_hash: u32 = 0x811C_9DC5;
        for &b in self.payload() {
            data_hash ^= u32::from(b);
            data_hash = data_hash.wrapping_mul(0x0100_0193);
        }
        hash |= u64::from(data_hash & 0x0FFF_FFFF) << 36;
        hash
    }

    /// Rebuild `nmea_lines` from the current payload. `id`, if given,
    /// reseeds the process-wide multi-sentence group-id counter (used only
    /// by tests that need deterministic output).
    pub fn build_nmea(&mut self, tag: &Tag, id: Option<u8>) {
        if let Some(id) = id {
            NEXT_GROUP_ID.store(id.clamp(1, 9), Ordering::Relaxed);
        }

        let n_letters = self.length_bits.div_ceil(6) as usize;
        let n_letters = n_letters.max(0);
        let n_sentences = if n_letters == 0 {
            1
        } else {
            n_letters.div_ceil(MAX_NMEA_CHARS)
        };

        let talker = if self.own_mmsi >= 0 && self.own_mmsi as u32 == self.mmsi() {
            "AIVDO"
        } else {
            "AIVDM"
        };

        let group_id = if n_sentences > 1 {
            Some(next_group_id())
        } else {
            None
        };

        let mut lines = Vec::with_capacity(n_sentences);
        let mut emitted = 0usize;
        for s in 0..n_sentences {
            let mut body = String::new();
            body.push_str(talker);
            body.push(',');
            body.push_str(&n_sentences.to_string());
            body.push(',');
            body.push_str(&(s + 1).to_string());
            body.push(',');
            if let Some(g) = group_id {
                body.push_str(&g.to_string());
            }
            body.push(',');
            if self.channel != b'?' {
                body.push(self.channel as char);
            }
            body.push(',');

            let mut n_here = 0;
            while emitted < n_letters && n_here < MAX_NMEA_CHARS {
                body.push(self.get_letter(emitted) as char);
                emitted += 1;
                n_here += 1;
            }
            body.push(',');
            let fill = if s == n_sentences - 1 {
                n_letters * 6 - self.length_bits as usize
            } else {
                0
            };
            body.push_str(&fill.to_string());

            let checksum = nmea_checksum(body.as_bytes());
            let line = format!("!{body}*{checksum:02X}");
            lines.push(line);
        }
        self.nmea_lines = lines;
        let _ = tag;
    }

    /// Custom binary framing encoder (spec.md \S6): `0xAC` header, escaped
    /// payload, optional trailing CRC16-IBM, unescaped `0x0A` terminator.
    #[must_use]
    pub fn get_binary_nmea(&self, tag: &Tag, crc: bool) -> Vec<u8> {
        let mut packet = Vec::new();
        let mut push_escaped = |out: &mut Vec<u8>, byte: u8| match byte {
            0x0A => out.extend_from_slice(&[0xAD, 0xAE]),
            0x0D => out.extend_from_slice(&[0xAD, 0xAF]),
            0xAD => out.extend_from_slice(&[0xAD, 0xAD]),
            b => out.push(b),
        };

        push_escaped(&mut packet, 0xAC);
        push_escaped(&mut packet, 0x00);

        let has_signal = tag.level != UNDEFINED && tag.ppm != UNDEFINED;
        let mut flags = 0u8;
        if has_signal {
            flags |= 0x01;
        }
        if crc {
            flags |= 0x02;
        }
        push_escaped(&mut packet, flags);

        for i in (0..8).rev() {
            push_escaped(&mut packet, ((self.rxtime_us >> (i * 8)) & 0xFF) as u8);
        }

        if has_signal {
            let signal_tenths = (tag.level * 10.0) as i16;
            push_escaped(&mut packet, (signal_tenths >> 8) as u8);
            push_escaped(&mut packet, signal_tenths as u8);
            let ppm_tenths = (tag.ppm * 10.0) as i8;
            push_escaped(&mut packet, ppm_tenths as u8);
        }

        push_escaped(&mut packet, self.channel);
        push_escaped(&mut packet, (self.length_bits >> 8) as u8);
        push_escaped(&mut packet, (self.length_bits & 0xFF) as u8);

        for &b in self.payload() {
            push_escaped(&mut packet, b);
        }

        if crc {
            let crc_value = crc16_ibm(&packet);
            push_escaped(&mut packet, (crc_value >> 8) as u8);
            push_escaped(&mut packet, (crc_value & 0xFF) as u8);
        }

        packet.push(b'\n');
        packet
    }

    /// AIS-Catcher peer JSON line (spec.md \S6).
    #[must_use]
    pub fn to_peer_json(&self, tag: &Tag, driver: i32, hardware: &str, version: i32) -> String {
        let rxtime = Utc
            .timestamp_micros(self.rxtime_us)
            .single()
            .unwrap_or_else(Utc::now);

        let mut obj = serde_json::json!({
            "class": "AIS",
            "device": "AIS-catcher",
            "version": version,
            "driver": driver,
            "hardware": hardware,
            "channel": (self.channel as char).to_string(),
            "repeat": self.repeat(),
            "rxtime": rxtime.format("%Y%m%d%H%M%S").to_string(),
            "rxuxtime": self.rxtime_us / 1_000_000,
            "signalpower": if tag.level == UNDEFINED { serde_json::Value::Null } else { serde_json::json!(tag.level) },
            "ppm": if tag.ppm == UNDEFINED { serde_json::Value::Null } else { serde_json::json!(tag.ppm) },
            "nmea": self.nmea_lines,
        });
        if self.station_id != 0 {
            obj["station_id"] = serde_json::json!(self.station_id);
        }
        if self.length_bits > 0 {
            obj["mmsi"] = serde_json::json!(self.mmsi());
            obj["type"] = serde_json::json!(self.kind());
        }
        if tag.ipv4 != 0 {
            obj["ipv4"] = serde_json::json!(tag.ipv4);
        }
        obj.to_string()
    }
}

fn nmea_checksum(s: &[u8]) -> u8 {
    s.iter().fold(0u8, |acc, &b| acc ^ b)
}

fn sextet_to_char(l: u8) -> u8 {
    if l < 40 { l + 48 } else { l + 56 }
}

fn char_to_sextet(c: u8) -> u8 {
    (if c >= 96 { c - 56 } else { c - 48 }) & 0b0011_1111
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_roundtrip() {
        let mut m = Message::new();
        m.set_uint(0, 6, 1).unwrap();
        m.set_uint(6, 2, 3).unwrap();
        m.set_uint(8, 30, 244_670_316).unwrap();
        assert_eq!(m.kind(), 1);
        assert_eq!(m.repeat(), 3);
        assert_eq!(m.mmsi(), 244_670_316);
    }

    #[test]
    fn signed_field_sign_extends() {
        let mut m = Message::new();
        m.set_int(38, 12, -100).unwrap();
        assert_eq!(m.get_int(38, 12), -100);
    }

    #[test]
    fn validate_rejects_short_type1() {
        let mut m = Message::new();
        m.set_uint(0, 6, 1).unwrap();
        m.set_length_bits(100);
        assert!(!m.validate());
    }

    #[test]
    fn empty_message_is_rejected() {
        // spec.md \S8 boundary behavior: a zero-length binary frame decodes
        // to kind() == 0, outside 1..=27, so validation rejects it.
        let m = Message::new();
        assert!(!m.validate());
    }

    #[test]
    fn nmea_checksum_matches_xor() {
        let body = b"AIVDM,1,1,,A,13aEOK?P00PD2wVMdLDRhgvL289?,0";
        let c = nmea_checksum(body);
        let line = format!("!{}*{:02X}", std::str::from_utf8(body).unwrap(), c);
        let star = line.rfind('*').unwrap();
        let recomputed = nmea_checksum(line[1..star].as_bytes());
        assert_eq!(recomputed, c);
    }

    #[test]
    fn hash_is_stable_for_same_payload() {
        let mut a = Message::new();
        a.set_uint(0, 6, 1).unwrap();
        a.set_uint(8, 30, 244_670_316).unwrap();
        a.channel = b'A';
        let mut b = a.clone();
        b.rxtime_us += 1000;
        assert_eq!(a.get_hash(), b.get_hash());
    }

    #[test]
    fn letter_roundtrip_through_payload() {
        let mut m = Message::new();
        for (i, &ch) in b"13aEOK".iter().enumerate() {
            m.set_letter(i, ch).unwrap();
        }
        for (i, &expected) in b"13aEOK".iter().enumerate() {
            assert_eq!(m.get_letter(i), expected);
        }
    }

    #[test]
    fn binary_framing_escapes_newline_in_payload() {
        let mut m = Message::new();
        m.set_uint(0, 8, 0x0A).unwrap();
        m.channel = b'A';
        let tag = Tag::default();
        let framed = m.get_binary_nmea(&tag, false);
        assert_eq!(framed[0], 0xAC);
        assert_eq!(*framed.last().unwrap(), b'\n');
        assert!(framed.windows(2).any(|w| w == [0xAD, 0xAE]));
    }
}
