//! Frame types carried across [`crate::stream::Connection`]s, and the
//! out-of-band [`Tag`] metadata that rides alongside every frame.

use std::fmt;

/// Sentinel for "value not supplied" on the float fields of [`Tag`], mirroring
/// the `UNDEFINED` sentinel used throughout the original telemetry tag.
pub const UNDEFINED: f32 = f32::MIN;

/// Mean earth radius, km, used for [`great_circle`].
const EARTH_RADIUS_KM: f32 = 6371.0;

/// Great-circle distance (km) and initial bearing (degrees, 0..360) from
/// `(lat1, lon1)` to `(lat2, lon2)`, per spec.md \S4.7's "distance/bearing
/// from the receiving station" enrichment. Haversine distance, standard
/// forward-azimuth bearing.
#[must_use]
pub fn great_circle(lat1: f32, lon1: f32, lat2: f32, lon2: f32) -> (f32, f32) {
    let (lat1r, lat2r) = (lat1.to_radians(), lat2.to_radians());
    let (dlat, dlon) = ((lat2 - lat1).to_radians(), (lon2 - lon1).to_radians());

    let a = (dlat / 2.0).sin().powi(2) + lat1r.cos() * lat2r.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    let distance = EARTH_RADIUS_KM * c;

    let y = dlon.sin() * lat2r.cos();
    let x = lat1r.cos() * lat2r.sin() - lat1r.sin() * lat2r.cos() * dlon.cos();
    let bearing = (y.atan2(x).to_degrees() + 360.0) % 360.0;

    (distance, bearing)
}

/// Sample format carried by a [`Raw`] frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RawFormat {
    /// Unsigned 8-bit I/Q.
    Cu8,
    /// Signed 8-bit I/Q.
    Cs8,
    /// Signed 16-bit I/Q.
    Cs16,
    /// 32-bit float I/Q.
    Cf32,
    /// Plain text (already-decoded NMEA/JSON feed).
    Txt,
    /// BEAST binary framing (out of scope for demodulation, passed through).
    Beast,
    /// Basestation CSV framing.
    Basestation,
    /// Raw 1090MHz Mode-S frame.
    Raw1090,
    /// NMEA 2000 frame.
    N2k,
    /// 32-bit float, 4x oversampled.
    F32Fs4,
}

/// Raw bytes from a device or upstream feed, tagged with their format.
#[derive(Clone, Debug)]
pub struct Raw {
    /// Sample/byte format.
    pub format: RawFormat,
    /// Payload.
    pub data: Vec<u8>,
}

impl Raw {
    /// Number of bytes in the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A GPS fix carried alongside the AIS stream (own-ship position), as
/// decoded from an NMEA GGA/RMC sentence.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct Gps {
    /// Latitude, degrees.
    pub lat: f32,
    /// Longitude, degrees.
    pub lon: f32,
    /// Rebuilt NMEA sentence, if regeneration is enabled.
    pub source_nmea: String,
    /// JSON mirror of the fix.
    pub source_json: String,
}

bitflags::bitflags! {
    /// Bits set in [`Tag::error`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TagError: u32 {
        /// NMEA `*XX` checksum did not match.
        const NMEA_CHECKSUM_BAD = 0x01;
        /// Binary framing CRC16 did not match.
        const CRC_BAD = 0x02;
        /// Declared length was out of range for the message type.
        const LENGTH_INVALID = 0x04;
    }
}

/// Per-message metadata riding out-of-band with every frame: signal level,
/// ppm, position, hardware/driver identifiers, station id, sample offsets,
/// and accumulated error flags.
#[derive(Clone, Debug)]
pub struct Tag {
    /// DTM bitfield describing which optional fields are populated.
    pub mode: u8,
    /// Signal level in dB, or [`UNDEFINED`].
    pub level: f32,
    /// Measured oscillator ppm error, or [`UNDEFINED`].
    pub ppm: f32,
    /// Station (or vessel, once resolved) latitude.
    pub lat: f32,
    /// Station (or vessel, once resolved) longitude.
    pub lon: f32,
    /// Great-circle distance from the station, km.
    pub distance: f32,
    /// Bearing from the station, degrees.
    pub angle: f32,
    /// Estimated speed, if derivable from the transport (rare).
    pub speed: f32,
    /// Vessel name, if already known (enrichment convenience).
    pub shipname: String,
    /// Vessel class, if already known.
    pub shipclass: u8,
    /// Receiving station latitude.
    pub station_lat: f32,
    /// Receiving station longitude.
    pub station_lon: f32,
    /// Hardware identifier string.
    pub hardware: String,
    /// Driver identifier.
    pub driver: i32,
    /// Driver/software version.
    pub version: i32,
    /// Sample offset at which this message started.
    pub sample_start: u64,
    /// Sample length consumed by this message.
    pub sample_len: u64,
    /// Source IPv4 address, packed, if fed over the network.
    pub ipv4: u32,
    /// Routing group mask.
    pub group: u64,
    /// Previous signal level, used for delta-based diagnostics.
    pub previous_signal: i64,
    /// Accumulated [`TagError`] bits.
    pub error: u32,
}

impl Default for Tag {
    fn default() -> Self {
        Self {
            mode: 0,
            level: UNDEFINED,
            ppm: UNDEFINED,
            lat: UNDEFINED,
            lon: UNDEFINED,
            distance: UNDEFINED,
            angle: UNDEFINED,
            speed: UNDEFINED,
            shipname: String::new(),
            shipclass: 0,
            station_lat: UNDEFINED,
            station_lon: UNDEFINED,
            hardware: String::new(),
            driver: 0,
            version: 0,
            sample_start: 0,
            sample_len: 0,
            ipv4: 0,
            group: u64::MAX,
            previous_signal: 0,
            error: 0,
        }
    }
}

impl Tag {
    /// True if `lat`/`lon` are meaningfully set (not [`UNDEFINED`]).
    #[must_use]
    pub fn has_position(&self) -> bool {
        self.station_lat != UNDEFINED && self.station_lon != UNDEFINED
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag(group={:#x}, error={:#x})", self.group, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_error_bits() {
        let mut e = TagError::empty();
        e.insert(TagError::NMEA_CHECKSUM_BAD);
        assert!(e.contains(TagError::NMEA_CHECKSUM_BAD));
        assert!(!e.contains(TagError::CRC_BAD));
    }

    #[test]
    fn default_tag_has_undefined_position() {
        let t = Tag::default();
        assert!(!t.has_position());
    }
}
