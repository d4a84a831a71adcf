//! Fixed-length rolling histogram ring, translated from
//! `Source/Tracking/History.h`'s `History<N, INTERVAL>` template.
//!
//! One [`History`] instance covers one time granularity (second/minute/hour/
//! day); [`crate::vessel::db::VesselDb`] feeds every accepted message to all
//! four in parallel.

use std::io::{self, Read, Write};

use crate::frame::Tag;
use crate::message::Message;
use crate::vessel::stats::MessageStatistics;

const MAGIC: i32 = 0x4f80b;
const VERSION: i32 = 1;

struct Cell {
    /// Interval index (`unix_time / interval_secs`), 0 before first use.
    time: i64,
    stat: MessageStatistics,
}

/// A ring of `n` [`MessageStatistics`] cells, each covering `interval_secs`
/// seconds of wall-clock time; advancing past the current cell's window
/// allocates the next one and, once full, evicts the oldest.
pub struct History {
    n: usize,
    interval_secs: i64,
    cells: Vec<Cell>,
    start: usize,
    end: usize,
}

impl History {
    /// `n` cells, each spanning `interval_secs` seconds, starting at `now_secs`.
    #[must_use]
    pub fn new(n: usize, interval_secs: i64, now_secs: i64) -> Self {
        let mut cells = Vec::with_capacity(n);
        for _ in 0..n {
            cells.push(Cell {
                time: 0,
                stat: MessageStatistics::new(),
            });
        }
        let mut h = Self {
            n,
            interval_secs,
            cells,
            start: 0,
            end: 0,
        };
        h.create(now_secs / interval_secs, 0);
        h
    }

    fn create(&mut self, t: i64, at: usize) {
        self.cells[at].time = t;
        self.cells[at].stat = MessageStatistics::new();
    }

    /// Set the radar long-range cutoff on every cell.
    pub fn set_cutoff(&mut self, cutoff_km: f32) {
        for c in &mut self.cells {
            c.stat.set_cutoff(cutoff_km);
        }
    }

    /// Fold one message into the cell for its receive time, rolling the ring
    /// forward if it falls in a later interval than the current head.
    pub fn receive(&mut self, msg: &Message, tag: &Tag, new_vessel: bool, now_secs: i64) {
        let tm = now_secs / self.interval_secs;
        if self.cells[self.end].time < tm {
            self.end = (self.end + 1) % self.n;
            self.create(tm, self.end);
            if self.start == self.end {
                self.start = (self.start + 1) % self.n;
            }
        }
        self.cells[self.end].stat.add(msg, tag, new_vessel);
    }

    /// Average messages-per-second across every populated cell.
    #[must_use]
    pub fn average(&self) -> f32 {
        let mut sum = 0i64;
        let mut idx = self.start;
        while idx != self.end {
            sum += i64::from(self.cells[idx].stat.count());
            idx = (idx + 1) % self.n;
        }
        sum += i64::from(self.cells[self.end].stat.count());
        let delta = 1 + (self.cells[self.end].time - self.cells[self.start].time);
        sum as f32 / delta.max(1) as f32
    }

    /// `{"time":[...],"stat":[...]}` over the full ring, oldest-relative
    /// index first (`i - n` for the i-th slot walked from the end).
    #[must_use]
    pub fn to_json(&self, now_secs: i64) -> serde_json::Value {
        let tm_now = now_secs / self.interval_secs;
        let mut times = Vec::with_capacity(self.n);
        let mut stats = Vec::with_capacity(self.n);

        let mut idx = self.end;
        let mut tm = tm_now;
        for i in (1..=self.n).rev() {
            times.push(i as i64 - self.n as i64);
            let empty = self.cells[idx].time < tm;
            stats.push(self.cells[idx].stat.to_json(empty));
            if !empty {
                if idx == self.start {
                    break;
                }
                idx = (idx + self.n - 1) % self.n;
            }
            tm -= 1;
        }
        serde_json::json!({ "time": times, "stat": stats })
    }

    /// Save the ring: magic, version, cell-struct size (unused on load but
    /// kept for wire compatibility), interval, `n`, `start`, `end`, then each
    /// cell's `time` and statistics.
    pub fn save(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&MAGIC.to_be_bytes())?;
        w.write_all(&VERSION.to_be_bytes())?;
        w.write_all(&0i32.to_be_bytes())?; // historical struct-size field, unchecked on load
        w.write_all(&(self.interval_secs as i32).to_be_bytes())?;
        w.write_all(&(self.n as i32).to_be_bytes())?;
        w.write_all(&(self.start as i32).to_be_bytes())?;
        w.write_all(&(self.end as i32).to_be_bytes())?;
        for c in &self.cells {
            w.write_all(&c.time.to_be_bytes())?;
            c.stat.save(w)?;
        }
        Ok(())
    }

    /// Load a ring previously written by [`Self::save`]. The caller's `n`
    /// and `interval_secs` must match the file's; a mismatch (or truncation)
    /// returns `Ok(None)` so the caller can fall back to a fresh ring.
    pub fn load(&mut self, r: &mut impl Read) -> io::Result<bool> {
        let mut buf4 = [0u8; 4];
        let mut buf8 = [0u8; 8];

        r.read_exact(&mut buf4)?;
        if i32::from_be_bytes(buf4) != MAGIC {
            return Ok(false);
        }
        r.read_exact(&mut buf4)?;
        if i32::from_be_bytes(buf4) != VERSION {
            return Ok(false);
        }
        r.read_exact(&mut buf4)?; // struct size, ignored
        r.read_exact(&mut buf4)?;
        if i32::from_be_bytes(buf4) as i64 != self.interval_secs {
            return Ok(false);
        }
        r.read_exact(&mut buf4)?;
        if i32::from_be_bytes(buf4) as usize != self.n {
            return Ok(false);
        }
        r.read_exact(&mut buf4)?;
        self.start = i32::from_be_bytes(buf4) as usize;
        r.read_exact(&mut buf4)?;
        self.end = i32::from_be_bytes(buf4) as usize;

        for c in &mut self.cells {
            r.read_exact(&mut buf8)?;
            c.time = i64::from_be_bytes(buf8);
            match MessageStatistics::load(r)? {
                Some(stat) => c.stat = stat,
                None => return Ok(false),
            }
        }
        // The live vessel count a reloaded cell claims is meaningless once
        // the DB that produced it is gone.
        self.cells[self.end].stat.clear_vessels();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        let mut m = Message::new();
        m.set_uint(0, 6, 1).unwrap();
        m
    }

    #[test]
    fn receive_rolls_to_new_cell_on_interval_boundary() {
        let mut h = History::new(3, 60, 0);
        h.receive(&sample_message(), &Tag::default(), true, 0);
        h.receive(&sample_message(), &Tag::default(), true, 65);
        assert_eq!(h.cells[h.end].stat.count(), 1);
        assert_eq!(h.cells[h.start].stat.count(), 1);
    }

    #[test]
    fn save_load_roundtrips() {
        let mut h = History::new(4, 60, 0);
        h.receive(&sample_message(), &Tag::default(), true, 0);
        let mut buf = Vec::new();
        h.save(&mut buf).unwrap();

        let mut h2 = History::new(4, 60, 0);
        assert!(h2.load(&mut &buf[..]).unwrap());
        assert_eq!(h2.cells[h2.end].stat.count(), h.cells[h.end].stat.count());
    }

    #[test]
    fn load_rejects_mismatched_interval() {
        let mut h = History::new(4, 60, 0);
        let mut buf = Vec::new();
        h.save(&mut buf).unwrap();

        let mut h2 = History::new(4, 3600, 0);
        assert!(!h2.load(&mut &buf[..]).unwrap());
    }
}
