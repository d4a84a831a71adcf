//! A single tracked vessel, per spec.md \S3's `Vessel (DB entry)` shape.

use crate::frame::UNDEFINED;
use crate::message::Message;

/// Path/NMEA-echo ring capacity, matching spec.md's `ring<16 strings>`.
pub const NMEA_HISTORY_LEN: usize = 16;
/// Position track ring capacity.
pub const PATH_LEN: usize = 64;
/// Minimum position delta (degrees) before a point is appended to the path.
pub const PATH_MIN_DELTA: f32 = 0.0005;

/// One `(time, lat, lon)` sample in a vessel's position track.
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct PathPoint {
    /// Receive time, microseconds since the epoch.
    pub time_us: i64,
    /// Latitude, degrees.
    pub lat: f32,
    /// Longitude, degrees.
    pub lon: f32,
}

/// A fixed-capacity ring that silently overwrites its oldest entry once full.
#[derive(Clone, Debug)]
pub struct Ring<T, const N: usize> {
    items: Vec<T>,
    head: usize,
    len: usize,
}

impl<T: Clone + Default, const N: usize> Default for Ring<T, N> {
    fn default() -> Self {
        Self {
            items: vec![T::default(); N],
            head: 0,
            len: 0,
        }
    }
}

impl<T: Clone, const N: usize> Ring<T, N> {
    /// Push a new entry, evicting the oldest if the ring is full.
    pub fn push(&mut self, value: T) {
        if self.items.len() < N {
            self.items.push(value);
        } else {
            self.items[self.head] = value;
        }
        self.head = (self.head + 1) % N;
        self.len = (self.len + 1).min(N);
    }

    /// Entries oldest-first.
    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let start = if self.items.len() < N { 0 } else { self.head };
        self.items.iter().cycle().skip(start).take(self.len)
    }

    /// Number of entries currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no entries have been pushed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Bitmask of AIS message types (1..=27) seen for this vessel, bit `k-1` for
/// type `k`, per spec.md's `msg_history: [26 bitfield of types seen]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TypeHistory(pub u32);

impl TypeHistory {
    /// Record that a message of the given AIS type was received.
    pub fn record(&mut self, kind: u8) {
        if (1..=27).contains(&kind) {
            self.0 |= 1 << (kind - 1);
        }
    }

    /// True if `kind` has ever been seen for this vessel.
    #[must_use]
    pub fn has(&self, kind: u8) -> bool {
        (1..=27).contains(&kind) && self.0 & (1 << (kind - 1)) != 0
    }
}

/// One tracked vessel: identity, last-known kinematics, voyage/identification
/// fields, and the rolling NMEA/position history rings.
#[derive(Clone, Debug)]
pub struct Vessel {
    /// 9-digit MMSI; the database's hash/content-address key.
    pub mmsi: u32,
    /// Time of the first message ever associated with this MMSI, microseconds.
    pub first_seen_us: i64,
    /// Time of the most recent message, microseconds.
    pub last_seen_us: i64,
    /// Latitude, degrees, or [`UNDEFINED`].
    pub lat: f32,
    /// Longitude, degrees, or [`UNDEFINED`].
    pub lon: f32,
    /// Course over ground, degrees, or [`UNDEFINED`].
    pub cog: f32,
    /// Speed over ground, knots, or [`UNDEFINED`].
    pub sog: f32,
    /// True heading, degrees, or [`UNDEFINED`].
    pub heading: f32,
    /// Navigational status code (type 1/2/3), or `u8::MAX` if unknown.
    pub nav_status: u8,
    /// Ship/cargo type code (type 5/24), 0 if unknown.
    pub ship_type: u8,
    /// Vessel name, up to 20 characters.
    pub name: String,
    /// Call sign, up to 7 characters.
    pub callsign: String,
    /// Destination, up to 20 characters.
    pub destination: String,
    /// Message types seen for this vessel.
    pub msg_history: TypeHistory,
    /// Last `nmea_history_len` raw sentences echoed for this vessel.
    pub nmea_history: Ring<String, NMEA_HISTORY_LEN>,
    /// Position track, sampled on meaningful movement.
    pub path: Ring<PathPoint, PATH_LEN>,
    /// Total number of messages folded into this vessel.
    pub message_count: u64,
    /// OR of every routing group this vessel's messages arrived on.
    pub group_mask: u64,
    /// Distance from the receiving station at the last position fix, km.
    pub distance: f32,
    /// Bearing from the receiving station at the last position fix, degrees.
    pub angle: f32,
}

impl Default for Vessel {
    fn default() -> Self {
        Self {
            mmsi: 0,
            first_seen_us: 0,
            last_seen_us: 0,
            lat: UNDEFINED,
            lon: UNDEFINED,
            cog: UNDEFINED,
            sog: UNDEFINED,
            heading: UNDEFINED,
            nav_status: u8::MAX,
            ship_type: 0,
            name: String::new(),
            callsign: String::new(),
            destination: String::new(),
            msg_history: TypeHistory::default(),
            nmea_history: Ring::default(),
            path: Ring::default(),
            message_count: 0,
            group_mask: 0,
            distance: UNDEFINED,
            angle: UNDEFINED,
        }
    }
}

impl Vessel {
    /// Start a fresh entry for `mmsi`, stamped at `now_us`.
    #[must_use]
    pub fn new(mmsi: u32, now_us: i64) -> Self {
        Self {
            mmsi,
            first_seen_us: now_us,
            last_seen_us: now_us,
            ..Self::default()
        }
    }

    /// Reset every field to its "unknown" state but keep `mmsi` and
    /// `first_seen_us`/rings untouched - used when a slot is recycled by the
    /// LRU for a different MMSI (see [`crate::vessel::db::VesselDb::create`]).
    pub fn recycle(&mut self, mmsi: u32, now_us: i64) {
        *self = Self::new(mmsi, now_us);
    }

    /// Append a position sample to the path ring if it moved by at least
    /// [`PATH_MIN_DELTA`] degrees from the last recorded point, per spec.md
    /// \S4.7 step 5.
    pub fn record_position(&mut self, lat: f32, lon: f32, time_us: i64) {
        let moved = match self.path.iter().last() {
            Some(last) => (last.lat - lat).abs() >= PATH_MIN_DELTA || (last.lon - lon).abs() >= PATH_MIN_DELTA,
            None => true,
        };
        if moved {
            self.path.push(PathPoint { time_us, lat, lon });
        }
    }

    /// Fold a decoded [`Message`] and its [`crate::frame::Tag`] into this
    /// vessel's state. Only fields the message type actually carries are
    /// touched; everything else is left as last known.
    pub fn apply(&mut self, msg: &Message, tag: &crate::frame::Tag) {
        self.last_seen_us = msg.rxtime_us;
        self.message_count += 1;
        self.group_mask |= tag.group;
        self.msg_history.record(msg.kind());

        match msg.kind() {
            1..=3 => self.apply_position_report(msg),
            5 => self.apply_static_and_voyage(msg),
            18 | 19 => self.apply_class_b_position(msg),
            24 => self.apply_static_part(msg),
            _ => {}
        }

        if tag.lat != UNDEFINED && tag.lon != UNDEFINED {
            self.record_position(tag.lat, tag.lon, msg.rxtime_us);
        }
        if tag.distance != UNDEFINED {
            self.distance = tag.distance;
            self.angle = tag.angle;
        }
    }

    fn apply_position_report(&mut self, msg: &Message) {
        if let Some((lat, lon)) = decode_position(msg) {
            self.lat = lat;
            self.lon = lon;
        }
        self.cog = decode_scaled(msg.get_uint(116, 12), 3600, 10.0);
        self.sog = decode_scaled(msg.get_uint(50, 10), 1023, 10.0);
        self.heading = decode_scaled(msg.get_uint(128, 9), 511, 1.0);
        let ns = msg.get_uint(38, 4) as u8;
        if ns != 15 {
            self.nav_status = ns;
        }
    }

    fn apply_class_b_position(&mut self, msg: &Message) {
        if let Some((lat, lon)) = decode_position(msg) {
            self.lat = lat;
            self.lon = lon;
        }
        self.sog = decode_scaled(msg.get_uint(46, 10), 1023, 10.0);
        self.cog = decode_scaled(msg.get_uint(112, 12), 3600, 10.0);
        self.heading = decode_scaled(msg.get_uint(124, 9), 511, 1.0);
    }

    fn apply_static_and_voyage(&mut self, msg: &Message) {
        self.callsign = msg.get_text(70, 42).trim_end().to_string();
        self.name = msg.get_text(112, 120).trim_end().to_string();
        self.ship_type = msg.get_uint(232, 8) as u8;
        self.destination = msg.get_text(302, 120).trim_end().to_string();
    }

    fn apply_static_part(&mut self, msg: &Message) {
        // Part A carries the name, part B the type/callsign; both share type 24.
        if msg.get_uint(38, 2) == 0 {
            self.name = msg.get_text(40, 120).trim_end().to_string();
        } else {
            self.ship_type = msg.get_uint(40, 8) as u8;
            self.callsign = msg.get_text(90, 42).trim_end().to_string();
        }
    }

}

/// Decode a scaled unsigned field, treating `sentinel` as "not available".
fn decode_scaled(raw: u32, sentinel: u32, scale: f32) -> f32 {
    if raw == sentinel {
        UNDEFINED
    } else {
        raw as f32 / scale
    }
}

/// Decode a type 1/2/3/18/19 position report's lat/lon, in degrees, or
/// `None` if the message carries no position field or the fix is marked
/// unavailable. Shared by the position appliers above and by
/// [`crate::nmea::Reassembler`]'s station-distance tag enrichment, since
/// both need the same raw bit layout.
#[must_use]
pub fn decode_position(msg: &Message) -> Option<(f32, f32)> {
    let (lat_raw, lon_raw) = match msg.kind() {
        1..=3 => (msg.get_int(89, 27), msg.get_int(61, 28)),
        18 | 19 => (msg.get_int(85, 27), msg.get_int(57, 28)),
        _ => return None,
    };
    const LAT_UNDEFINED_RAW: i32 = 91 * 600_000;
    const LON_UNDEFINED_RAW: i32 = 181 * 600_000;
    if lat_raw == LAT_UNDEFINED_RAW || lon_raw == LON_UNDEFINED_RAW {
        return None;
    }
    Some((lat_raw as f32 / 600_000.0, lon_raw as f32 / 600_000.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_history_tracks_seen_kinds() {
        let mut h = TypeHistory::default();
        h.record(1);
        h.record(5);
        assert!(h.has(1));
        assert!(h.has(5));
        assert!(!h.has(2));
    }

    #[test]
    fn ring_overwrites_oldest_when_full() {
        let mut r: Ring<u32, 3> = Ring::default();
        r.push(1);
        r.push(2);
        r.push(3);
        r.push(4);
        let vals: Vec<u32> = r.iter().copied().collect();
        assert_eq!(vals, vec![2, 3, 4]);
    }

    #[test]
    fn record_position_requires_minimum_delta() {
        let mut v = Vessel::new(123_456_789, 0);
        v.record_position(51.0, 4.0, 1);
        v.record_position(51.0, 4.0, 2);
        assert_eq!(v.path.len(), 1);
        v.record_position(51.01, 4.0, 3);
        assert_eq!(v.path.len(), 2);
    }
}
