//! Rolling message-count and radar-range statistics, translated from
//! `Source/Tracking/Statistics.h`'s `MessageStatistics`.

use std::io::{self, Read, Write};

use crate::frame::{Tag, UNDEFINED};
use crate::message::Message;

const MAGIC: i32 = 0x4f82b;
const VERSION: i32 = 2;
/// Number of angular buckets the radar-range arrays are split into.
pub const RADAR_BUCKETS: usize = 18;

/// Per-interval message/vessel/range counters, matching one cell of a
/// [`crate::vessel::history::History`] ring.
#[derive(Clone, Debug)]
pub struct MessageStatistics {
    count: i32,
    excluded: i32,
    vessels: i32,
    msg: [i32; 27],
    channel: [i32; 4],
    level_min: f32,
    level_max: f32,
    ppm_sum: f32,
    distance: f32,
    radar_a: [f32; RADAR_BUCKETS],
    radar_b: [f32; RADAR_BUCKETS],
    long_range_cutoff: f32,
}

impl Default for MessageStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStatistics {
    /// A freshly cleared set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            count: 0,
            excluded: 0,
            vessels: 0,
            msg: [0; 27],
            channel: [0; 4],
            level_min: 1e6,
            level_max: -1e6,
            ppm_sum: 0.0,
            distance: 0.0,
            radar_a: [0.0; RADAR_BUCKETS],
            radar_b: [0.0; RADAR_BUCKETS],
            long_range_cutoff: 2500.0,
        }
    }

    /// Messages counted this interval.
    #[must_use]
    pub fn count(&self) -> i32 {
        self.count
    }

    /// Set the maximum distance (km) a position fix counts toward the radar
    /// histograms; fixes beyond this are treated as unreliable range data.
    pub fn set_cutoff(&mut self, cutoff_km: f32) {
        self.long_range_cutoff = cutoff_km;
    }

    /// Reset the per-interval vessel-seen counter (the original comment on
    /// `History::Load` notes the live DB isn't persisted, so a reloaded
    /// history slot cannot claim to know which vessels were new).
    pub fn clear_vessels(&mut self) {
        self.vessels = 0;
    }

    /// Fold one decoded message into this interval's counters.
    pub fn add(&mut self, msg: &Message, tag: &Tag, new_vessel: bool) {
        let kind = msg.kind();
        if !(1..=27).contains(&kind) {
            return;
        }

        self.count += 1;
        if new_vessel {
            self.vessels += 1;
        }
        self.msg[(kind - 1) as usize] += 1;
        if (b'A'..=b'D').contains(&msg.channel) {
            self.channel[(msg.channel - b'A') as usize] += 1;
        }

        if tag.level == UNDEFINED || tag.ppm == UNDEFINED {
            self.excluded += 1;
        } else {
            self.level_min = self.level_min.min(tag.level);
            self.level_max = self.level_max.max(tag.level);
            self.ppm_sum += tag.ppm;
        }

        // Aids to navigation (type 21) don't carry a meaningful range.
        if kind == 21 {
            return;
        }
        let validated = tag.distance != UNDEFINED && tag.angle != UNDEFINED;
        if !validated || tag.distance > self.long_range_cutoff || msg.repeat() > 0 {
            return;
        }
        if tag.distance > self.distance {
            self.distance = tag.distance;
        }

        if !(0.0..360.0).contains(&tag.angle) {
            return;
        }
        let bucket = (tag.angle / (360.0 / RADAR_BUCKETS as f32)) as usize % RADAR_BUCKETS;
        if matches!(kind, 18 | 19 | 24) {
            if tag.distance > self.radar_b[bucket] {
                self.radar_b[bucket] = tag.distance;
            }
        } else if kind <= 3 || kind == 5 || kind == 27 {
            if tag.distance > self.radar_a[bucket] {
                self.radar_a[bucket] = tag.distance;
            }
        }
    }

    /// Render as the `{"count":...,"vessels":...,...}` object the HTTP
    /// server's history endpoints serve. `empty` renders every field as its
    /// zero/null sentinel instead of the actual counters (used for history
    /// slots that predate the process start).
    #[must_use]
    pub fn to_json(&self, empty: bool) -> serde_json::Value {
        let usable = self.count - self.excluded;
        let (level_min, level_max, ppm) = if empty || usable <= 0 {
            (serde_json::Value::Null, serde_json::Value::Null, serde_json::Value::Null)
        } else {
            (
                serde_json::json!(self.level_min),
                serde_json::json!(self.level_max),
                serde_json::json!(self.ppm_sum / usable as f32),
            )
        };
        serde_json::json!({
            "count": if empty { 0 } else { self.count },
            "vessels": if empty { 0 } else { self.vessels },
            "level_min": level_min,
            "level_max": level_max,
            "ppm": ppm,
            "dist": if empty { serde_json::Value::Null } else { serde_json::json!(self.distance) },
            "channel": if empty { vec![0; 4] } else { self.channel.to_vec() },
            "radar_a": if empty { vec![0.0; RADAR_BUCKETS] } else { self.radar_a.to_vec() },
            "radar_b": if empty { vec![0.0; RADAR_BUCKETS] } else { self.radar_b.to_vec() },
            "msg": if empty { vec![0; 27] } else { self.msg.to_vec() },
        })
    }

    /// Write this interval's counters in the original's magic-guarded
    /// fixed-layout binary format.
    pub fn save(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&MAGIC.to_be_bytes())?;
        w.write_all(&VERSION.to_be_bytes())?;
        w.write_all(&self.count.to_be_bytes())?;
        w.write_all(&self.vessels.to_be_bytes())?;
        for v in self.msg {
            w.write_all(&v.to_be_bytes())?;
        }
        for v in self.channel {
            w.write_all(&v.to_be_bytes())?;
        }
        w.write_all(&self.level_min.to_be_bytes())?;
        w.write_all(&self.level_max.to_be_bytes())?;
        w.write_all(&self.ppm_sum.to_be_bytes())?;
        w.write_all(&self.distance.to_be_bytes())?;
        for v in self.radar_a {
            w.write_all(&v.to_be_bytes())?;
        }
        for v in self.radar_b {
            w.write_all(&v.to_be_bytes())?;
        }
        Ok(())
    }

    /// Load counters saved by [`Self::save`]. Returns `Ok(None)` on a magic
    /// or version mismatch (truncated/foreign file: caller should start
    /// fresh rather than treat this as fatal).
    pub fn load(r: &mut impl Read) -> io::Result<Option<Self>> {
        let mut buf4 = [0u8; 4];
        r.read_exact(&mut buf4)?;
        let magic = i32::from_be_bytes(buf4);
        r.read_exact(&mut buf4)?;
        let version = i32::from_be_bytes(buf4);
        if magic != MAGIC || (version != VERSION && version != 1) {
            return Ok(None);
        }

        let mut s = Self::new();
        r.read_exact(&mut buf4)?;
        s.count = i32::from_be_bytes(buf4);
        if version == VERSION {
            r.read_exact(&mut buf4)?;
            s.vessels = i32::from_be_bytes(buf4);
        }
        for v in &mut s.msg {
            r.read_exact(&mut buf4)?;
            *v = i32::from_be_bytes(buf4);
        }
        for v in &mut s.channel {
            r.read_exact(&mut buf4)?;
            *v = i32::from_be_bytes(buf4);
        }
        r.read_exact(&mut buf4)?;
        s.level_min = f32::from_be_bytes(buf4);
        r.read_exact(&mut buf4)?;
        s.level_max = f32::from_be_bytes(buf4);
        r.read_exact(&mut buf4)?;
        s.ppm_sum = f32::from_be_bytes(buf4);
        r.read_exact(&mut buf4)?;
        s.distance = f32::from_be_bytes(buf4);
        for v in &mut s.radar_a {
            r.read_exact(&mut buf4)?;
            *v = f32::from_be_bytes(buf4);
        }
        for v in &mut s.radar_b {
            r.read_exact(&mut buf4)?;
            *v = f32::from_be_bytes(buf4);
        }
        Ok(Some(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        let mut m = Message::new();
        m.set_uint(0, 6, 1).unwrap();
        m.channel = b'A';
        m
    }

    #[test]
    fn add_counts_by_type_and_channel() {
        let mut stats = MessageStatistics::new();
        let msg = sample_message();
        let tag = Tag::default();
        stats.add(&msg, &tag, true);
        assert_eq!(stats.count(), 1);
        assert_eq!(stats.msg[0], 1);
        assert_eq!(stats.channel[0], 1);
    }

    #[test]
    fn radar_bucket_tracks_max_distance_per_angle() {
        let mut stats = MessageStatistics::new();
        let msg = sample_message();
        let tag = Tag {
            distance: 12.0,
            angle: 10.0,
            ..Tag::default()
        };
        stats.add(&msg, &tag, false);
        assert!(stats.radar_a[0] >= 12.0);
    }

    #[test]
    fn save_load_roundtrips() {
        let mut stats = MessageStatistics::new();
        stats.add(&sample_message(), &Tag::default(), true);
        let mut buf = Vec::new();
        stats.save(&mut buf).unwrap();
        let loaded = MessageStatistics::load(&mut &buf[..]).unwrap().unwrap();
        assert_eq!(loaded.count, stats.count);
        assert_eq!(loaded.msg, stats.msg);
    }

    #[test]
    fn load_rejects_bad_magic() {
        let buf = [0u8; 8];
        assert!(MessageStatistics::load(&mut &buf[..]).unwrap().is_none());
    }
}
