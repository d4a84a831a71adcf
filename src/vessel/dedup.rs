//! Position and message duplicate suppression, translated from
//! `Source/Marine/MessageHistory.h`'s `AIS::MessageHistory<KeyType>` template.
//!
//! A circular buffer of `(key, timestamp)` pairs that doubles its capacity
//! (up to a hard ceiling) rather than evicting while recent history is still
//! useful, and otherwise behaves as a plain ring.

use log::warn;

#[derive(Clone, Copy, Debug, Default)]
struct Entry<K> {
    key: K,
    timestamp: u32,
}

/// Key-timestamp duplicate-suppression ring. `K` is `u32` for MMSI-keyed
/// position suppression, `u64` for [`crate::message::Message::get_hash`]-keyed
/// message suppression.
pub struct MessageHistory<K> {
    entries: Vec<Entry<K>>,
    head: usize,
    tail: usize,
    count: usize,
    capacity: usize,
    max_capacity: usize,
    warned: bool,
}

impl<K: Copy + Default + PartialEq> MessageHistory<K> {
    /// `initial_cap` starting ring size, `max_cap` the ceiling it may grow to.
    #[must_use]
    pub fn new(initial_cap: usize, max_cap: usize) -> Self {
        Self {
            entries: vec![Entry::default(); initial_cap],
            head: 0,
            tail: 0,
            count: 0,
            capacity: initial_cap,
            max_capacity: max_cap,
            warned: false,
        }
    }

    fn expand_capacity(&mut self) -> bool {
        if self.capacity >= self.max_capacity {
            if !self.warned {
                warn!(
                    "message history buffer reached maximum capacity ({}), oldest entry will be overwritten",
                    self.max_capacity
                );
                self.warned = true;
            }
            return false;
        }
        let new_capacity = (self.capacity * 2).min(self.max_capacity);
        self.entries.resize(new_capacity, Entry::default());
        if self.head <= self.tail && self.count > 0 {
            let (front, back) = self.entries.split_at_mut(self.capacity);
            back[..self.head].clone_from_slice(&front[..self.head]);
            front[..self.head].fill(Entry::default());
            self.head = self.capacity + self.head;
        }
        self.capacity = new_capacity;
        true
    }

    /// Age, in the caller's time unit, of the most recent entry matching
    /// `key` within `max_age` of `now`; `u32::MAX` if absent or aged out.
    /// Entries older than `max_age` are dropped from the tail as a side
    /// effect, matching the original's lazy-aging `findAge`.
    pub fn find_age(&mut self, key: K, now: u32, max_age: u32) -> u32 {
        if self.count == 0 {
            return u32::MAX;
        }
        let mut idx = (self.head + self.capacity - 1) % self.capacity;
        let mut checked = 0;
        while checked < self.count {
            let e = self.entries[idx];
            if now.wrapping_sub(e.timestamp) > max_age {
                self.count = checked;
                self.tail = (idx + 1) % self.capacity;
                break;
            }
            if e.key == key {
                return now.wrapping_sub(e.timestamp);
            }
            idx = (idx + self.capacity - 1) % self.capacity;
            checked += 1;
        }
        u32::MAX
    }

    /// Record `key` at `timestamp`, returning `true` if it was not seen
    /// within `threshold` (i.e. should be treated as a fresh, non-duplicate
    /// occurrence).
    pub fn check(&mut self, key: K, timestamp: u32, threshold: u32) -> bool {
        let age = self.find_age(key, timestamp, threshold);
        if age >= threshold {
            self.add(key, timestamp, threshold);
            true
        } else {
            false
        }
    }

    fn add(&mut self, key: K, timestamp: u32, max_age: u32) {
        if self.count == self.capacity {
            let e = self.entries[self.tail];
            if timestamp.wrapping_sub(e.timestamp) < max_age {
                if !self.expand_capacity() {
                    self.tail = (self.tail + 1) % self.capacity;
                    self.count -= 1;
                }
            } else {
                self.tail = (self.tail + 1) % self.capacity;
                self.count -= 1;
            }
        }
        self.entries[self.head] = Entry { key, timestamp };
        self.head = (self.head + 1) % self.capacity;
        self.count = (self.count + 1).min(self.capacity);
    }
}

/// Position duplicate suppression, keyed by MMSI.
pub type PositionHistory = MessageHistory<u32>;
/// Message duplicate suppression, keyed by [`crate::message::Message::get_hash`].
pub type DuplicateHistory = MessageHistory<u64>;

/// Default starting/ceiling sizes, per spec.md \S4.7 ("N=128->32768").
pub const DEFAULT_INITIAL_CAPACITY: usize = 128;
/// Hard ceiling on ring growth.
pub const DEFAULT_MAX_CAPACITY: usize = 32768;
/// Max age, in whole seconds, for message-hash duplicate suppression
/// ("duplicates dropped" within this window per spec.md \S4.7).
pub const MESSAGE_DEDUP_WINDOW_SECS: u32 = 2;

impl Default for DuplicateHistory {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY)
    }
}

impl Default for PositionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_CAPACITY, DEFAULT_MAX_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_is_not_a_duplicate() {
        let mut h: DuplicateHistory = DuplicateHistory::new(4, 8);
        assert!(h.check(0xDEAD_BEEF, 100, MESSAGE_DEDUP_WINDOW_SECS));
    }

    #[test]
    fn repeat_within_window_is_a_duplicate() {
        let mut h: DuplicateHistory = DuplicateHistory::new(4, 8);
        assert!(h.check(42, 100, 2));
        assert!(!h.check(42, 101, 2));
    }

    #[test]
    fn repeat_after_window_is_fresh_again() {
        let mut h: DuplicateHistory = DuplicateHistory::new(4, 8);
        assert!(h.check(42, 100, 2));
        assert!(h.check(42, 103, 2));
    }

    #[test]
    fn ring_grows_instead_of_evicting_recent_entries() {
        let mut h: PositionHistory = PositionHistory::new(2, 16);
        assert!(h.check(1, 0, 100));
        assert!(h.check(2, 0, 100));
        assert!(h.check(3, 0, 100));
        assert!(!h.check(1, 1, 100));
    }
}
