//! Fixed-capacity hashed-LRU vessel database, translated from
//! `Tracking/PlaneDB.h`'s hash-chained doubly-linked-list LRU (there keyed on
//! ICAO hex ident; here on MMSI).
//!
//! Slots are pre-allocated in a flat `Vec<Vessel>`; two index-based linked
//! lists thread through them: `hash_ll` chains same-bucket entries for O(1)
//! `find`, and `time_ll` orders every slot from most- to least-recently-used
//! so eviction is "pop the tail".

use std::io::{self, Read, Write};
use std::sync::Mutex;

use crate::frame::Tag;
use crate::message::Message;
use crate::vessel::dedup::{DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY, DuplicateHistory, PositionHistory};
use crate::vessel::vessel::Vessel;

const MAGIC: i32 = 0x5641_4442; // "VADB"
const VERSION: i32 = 1;

/// Sentinel for "no link" in either linked list (`END`/`FREE` in the original).
const NONE: i32 = -1;

#[derive(Clone, Copy, Default)]
struct Link {
    prev: i32,
    next: i32,
}

struct Slot {
    vessel: Vessel,
    hash_ll: Link,
    time_ll: Link,
    occupied: bool,
}

struct Inner {
    slots: Vec<Slot>,
    hash_heads: Vec<i32>,
    first: i32,
    last: i32,
    count: usize,
    position_history: PositionHistory,
    message_history: DuplicateHistory,
}

/// Hashed-LRU vessel database. Fixed capacity; inserting past capacity
/// evicts the vessel least recently touched (spec.md \S4.7, \S3's lifecycle
/// note: "destroyed only by LRU eviction").
pub struct VesselDb {
    capacity: usize,
    inner: Mutex<Inner>,
}

/// FNV-1 hash, matching `PlaneDB::hash` (32-bit FNV-1, not FNV-1a).
fn fnv1_hash(mmsi: u32, capacity: usize) -> usize {
    const PRIME: u32 = 16_777_619;
    const OFFSET: u32 = 2_166_136_261;
    let h = (OFFSET ^ mmsi).wrapping_mul(PRIME);
    (h as usize) % capacity
}

impl VesselDb {
    /// Default live-vessel capacity, per spec.md \S3 ("fixed capacity
    /// N=4096 typical").
    pub const DEFAULT_CAPACITY: usize = 4096;

    /// An empty database holding at most `capacity` vessels.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Slot {
                vessel: Vessel::default(),
                hash_ll: Link { prev: NONE, next: NONE },
                time_ll: Link {
                    prev: if i + 1 < capacity { (i + 1) as i32 } else { NONE },
                    next: if i == 0 { NONE } else { (i - 1) as i32 },
                },
                occupied: false,
            });
        }
        Self {
            capacity,
            inner: Mutex::new(Inner {
                slots,
                hash_heads: vec![NONE; capacity],
                first: (capacity as i32) - 1,
                last: 0,
                count: 0,
                position_history: PositionHistory::new(DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY),
                message_history: DuplicateHistory::new(DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY),
            }),
        }
    }

    /// Maximum number of vessels this database can hold simultaneously.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of vessels currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().count
    }

    /// True if no vessel is currently tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fold a decoded message into the database: find-or-create the vessel
    /// for its MMSI, move it to the front of the LRU, and apply the message.
    /// Returns `true` if this created a new vessel entry. Messages with
    /// MMSI 0 are still tracked (spec.md \S9's open question: retain the
    /// permissive behavior rather than dropping them).
    pub fn receive(&self, msg: &Message, tag: &Tag) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let mmsi = msg.mmsi();
        let (ptr, created) = match inner.find(mmsi) {
            Some(p) => (p, false),
            None => (inner.create(mmsi, msg.rxtime_us), true),
        };
        inner.move_to_front(ptr);
        inner.slots[ptr].vessel.apply(msg, tag);
        created
    }

    /// `true` if `msg` was already seen (same [`Message::get_hash`]) within
    /// [`crate::vessel::dedup::MESSAGE_DEDUP_WINDOW_SECS`]; such a message
    /// should be dropped before reaching [`Self::receive`] (spec.md \S4.7's
    /// message duplicate suppression, scenario \S8 #4).
    pub fn is_duplicate_message(&self, msg: &Message, now_secs: u32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        !inner
            .message_history
            .check(msg.get_hash(), now_secs, crate::vessel::dedup::MESSAGE_DEDUP_WINDOW_SECS)
    }

    /// `true` if this MMSI reported this exact position within `threshold_secs`.
    pub fn is_duplicate_position(&self, mmsi: u32, now_secs: u32, threshold_secs: u32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        !inner.position_history.check(mmsi, now_secs, threshold_secs)
    }

    /// Look up a vessel by MMSI without changing its LRU position, applying
    /// `f` to it under the database lock.
    pub fn with_vessel<R>(&self, mmsi: u32, f: impl FnOnce(&Vessel) -> R) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        let ptr = inner.find(mmsi)?;
        Some(f(&inner.slots[ptr].vessel))
    }

    /// Apply `f` to every tracked vessel, most-recently-touched first.
    pub fn for_each(&self, mut f: impl FnMut(&Vessel)) {
        let inner = self.inner.lock().unwrap();
        let mut ptr = inner.first;
        while ptr != NONE {
            f(&inner.slots[ptr as usize].vessel);
            ptr = inner.slots[ptr as usize].time_ll.next;
        }
    }

    /// Save every occupied slot, newest-first, as `(mmsi, message_count,
    /// first_seen_us, last_seen_us, lat, lon)` tuples. This is a lighter
    /// snapshot than a full vessel record - on restart, kinematic detail is
    /// rebuilt from the next message per MMSI rather than restored exactly.
    pub fn save(&self, w: &mut impl Write) -> io::Result<()> {
        let inner = self.inner.lock().unwrap();
        w.write_all(&MAGIC.to_be_bytes())?;
        w.write_all(&VERSION.to_be_bytes())?;
        w.write_all(&(inner.count as i32).to_be_bytes())?;

        let mut ptr = inner.first;
        while ptr != NONE {
            let v = &inner.slots[ptr as usize].vessel;
            w.write_all(&v.mmsi.to_be_bytes())?;
            w.write_all(&v.message_count.to_be_bytes())?;
            w.write_all(&v.first_seen_us.to_be_bytes())?;
            w.write_all(&v.last_seen_us.to_be_bytes())?;
            w.write_all(&v.lat.to_be_bytes())?;
            w.write_all(&v.lon.to_be_bytes())?;
            ptr = inner.slots[ptr as usize].time_ll.next;
        }
        Ok(())
    }

    /// Load a snapshot written by [`Self::save`], re-creating a minimal
    /// vessel entry per record (oldest record applied first, so the final
    /// LRU order matches the original). `Ok(false)` on magic/version
    /// mismatch: caller should start the DB empty.
    pub fn load(&self, r: &mut impl Read) -> io::Result<bool> {
        let mut buf4 = [0u8; 4];
        r.read_exact(&mut buf4)?;
        if i32::from_be_bytes(buf4) != MAGIC {
            return Ok(false);
        }
        r.read_exact(&mut buf4)?;
        if i32::from_be_bytes(buf4) != VERSION {
            return Ok(false);
        }
        r.read_exact(&mut buf4)?;
        let n = i32::from_be_bytes(buf4).max(0) as usize;

        let mut records = Vec::with_capacity(n);
        let mut buf8 = [0u8; 8];
        for _ in 0..n {
            r.read_exact(&mut buf4)?;
            let mmsi = u32::from_be_bytes(buf4);
            r.read_exact(&mut buf8)?;
            let message_count = u64::from_be_bytes(buf8);
            r.read_exact(&mut buf8)?;
            let first_seen_us = i64::from_be_bytes(buf8);
            r.read_exact(&mut buf8)?;
            let last_seen_us = i64::from_be_bytes(buf8);
            r.read_exact(&mut buf4)?;
            let lat = f32::from_be_bytes(buf4);
            r.read_exact(&mut buf4)?;
            let lon = f32::from_be_bytes(buf4);
            records.push((mmsi, message_count, first_seen_us, last_seen_us, lat, lon));
        }

        let mut inner = self.inner.lock().unwrap();
        for (mmsi, message_count, first_seen_us, last_seen_us, lat, lon) in records.into_iter().rev() {
            let ptr = inner.create(mmsi, first_seen_us);
            inner.move_to_front(ptr);
            let v = &mut inner.slots[ptr].vessel;
            v.message_count = message_count;
            v.first_seen_us = first_seen_us;
            v.last_seen_us = last_seen_us;
            v.lat = lat;
            v.lon = lon;
        }
        Ok(true)
    }
}

impl Inner {
    fn hash_of(&self, mmsi: u32) -> usize {
        fnv1_hash(mmsi, self.slots.len())
    }

    fn find(&self, mmsi: u32) -> Option<usize> {
        let mut ptr = self.hash_heads[self.hash_of(mmsi)];
        while ptr != NONE {
            let slot = &self.slots[ptr as usize];
            if slot.occupied && slot.vessel.mmsi == mmsi {
                return Some(ptr as usize);
            }
            ptr = slot.hash_ll.next;
        }
        None
    }

    /// Evict the LRU tail slot (if occupied) and re-key it for `mmsi`.
    fn create(&mut self, mmsi: u32, now_us: i64) -> usize {
        let ptr = self.last as usize;

        if self.slots[ptr].occupied {
            let old_hash = self.hash_of(self.slots[ptr].vessel.mmsi);
            self.unlink_hash(ptr, old_hash);
        }

        let new_hash = self.hash_of(mmsi);
        self.slots[ptr].hash_ll.prev = NONE;
        self.slots[ptr].hash_ll.next = self.hash_heads[new_hash];
        if self.hash_heads[new_hash] != NONE {
            self.slots[self.hash_heads[new_hash] as usize].hash_ll.prev = ptr as i32;
        }
        self.hash_heads[new_hash] = ptr as i32;

        self.count = (self.count + 1).min(self.slots.len());
        self.slots[ptr].vessel.recycle(mmsi, now_us);
        self.slots[ptr].occupied = true;
        ptr
    }

    fn unlink_hash(&mut self, ptr: usize, bucket: usize) {
        let link = self.slots[ptr].hash_ll;
        if link.next != NONE {
            self.slots[link.next as usize].hash_ll.prev = link.prev;
        }
        if link.prev != NONE {
            self.slots[link.prev as usize].hash_ll.next = link.next;
        } else {
            self.hash_heads[bucket] = link.next;
        }
    }

    fn move_to_front(&mut self, ptr: usize) {
        if ptr as i32 == self.first {
            return;
        }
        let link = self.slots[ptr].time_ll;
        if link.next != NONE {
            self.slots[link.next as usize].time_ll.prev = link.prev;
        } else {
            self.last = link.prev;
        }
        self.slots[link.prev as usize].time_ll.next = link.next;

        self.slots[ptr].time_ll.next = self.first;
        self.slots[ptr].time_ll.prev = NONE;
        self.slots[self.first as usize].time_ll.prev = ptr as i32;
        self.first = ptr as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg_for(mmsi: u32) -> Message {
        let mut m = Message::new();
        m.set_uint(0, 6, 1).unwrap();
        m.set_uint(8, 30, mmsi).unwrap();
        m
    }

    #[test]
    fn receive_creates_then_reuses_entry() {
        let db = VesselDb::new(8);
        let tag = Tag::default();
        assert!(db.receive(&msg_for(111_222_333), &tag));
        assert!(!db.receive(&msg_for(111_222_333), &tag));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn eviction_drops_least_recently_used_at_capacity() {
        let db = VesselDb::new(2);
        let tag = Tag::default();
        db.receive(&msg_for(1), &tag);
        db.receive(&msg_for(2), &tag);
        db.receive(&msg_for(3), &tag); // evicts mmsi 1, the LRU tail
        assert_eq!(db.len(), 2);
        assert!(db.with_vessel(1, |_| ()).is_none());
        assert!(db.with_vessel(2, |_| ()).is_some());
        assert!(db.with_vessel(3, |_| ()).is_some());
    }

    #[test]
    fn touching_a_vessel_protects_it_from_eviction() {
        let db = VesselDb::new(2);
        let tag = Tag::default();
        db.receive(&msg_for(1), &tag);
        db.receive(&msg_for(2), &tag);
        db.receive(&msg_for(1), &tag); // moves mmsi 1 back to the front
        db.receive(&msg_for(3), &tag); // now evicts mmsi 2 instead
        assert!(db.with_vessel(1, |_| ()).is_some());
        assert!(db.with_vessel(2, |_| ()).is_none());
    }

    #[test]
    fn save_load_roundtrips_mmsi_and_position() {
        let db = VesselDb::new(8);
        let tag = Tag::default();
        db.receive(&msg_for(555), &tag);

        let mut buf = Vec::new();
        db.save(&mut buf).unwrap();

        let restored = VesselDb::new(8);
        assert!(restored.load(&mut &buf[..]).unwrap());
        assert_eq!(restored.len(), 1);
        assert!(restored.with_vessel(555, |_| ()).is_some());
    }
}
