//! Stream primitives: typed fan-out connections with group-mask routing.
//!
//! The teacher connects blocks with a shared circular buffer that both a
//! `ReadStream` and `WriteStream` side poll. Components here instead push
//! into a [`Connection`], which synchronously invokes every matching
//! downstream [`Receiver`] on the producer's thread, per the fan-out design
//! in spec.md \S4.2. Thread-safety of a receiver is the receiver's own
//! responsibility, exactly as the teacher's blocks own their own mutable
//! state across `work()` calls.

use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::frame::Tag;

/// 64-bit group mask used to route frames to interested subscribers only.
pub type GroupMask = u64;

/// Every group.
pub const ALL_GROUPS: GroupMask = u64::MAX;

/// A downstream endpoint that can accept frames of type `T`.
///
/// Implemented by output streamers, the vessel DB, and statistics - anything
/// that sits at the end of a [`Connection`]. `accept` is called on whichever
/// thread produced the frame; implementations shared across multiple
/// producers (the vessel DB) must lock internally.
pub trait Receiver<T>: Send + Sync {
    /// Handle one frame with its tag.
    fn accept(&self, frame: &T, tag: &Tag) -> Result<()>;
}

struct Sub<T> {
    groups_in: GroupMask,
    receiver: Arc<dyn Receiver<T>>,
}

/// Typed fan-out connection: a single producer's output, wired to zero or
/// more receivers each filtered by a group mask.
pub struct Connection<T> {
    groups_out: GroupMask,
    subs: Mutex<Vec<Sub<T>>>,
}

impl<T> Connection<T> {
    /// New connection declaring which groups its producer may emit under.
    #[must_use]
    pub fn new(groups_out: GroupMask) -> Self {
        Self {
            groups_out,
            subs: Mutex::new(Vec::new()),
        }
    }

    /// Test whether a subscriber with `groups_in` would ever receive
    /// anything from this connection. Used at graph-setup time to decide
    /// whether to wire a subscriber in at all.
    #[must_use]
    pub fn can_connect(&self, groups_in: GroupMask) -> bool {
        (self.groups_out & groups_in) != 0
    }

    /// Wire a receiver into this connection, filtered by `groups_in`.
    pub fn connect(&self, groups_in: GroupMask, receiver: Arc<dyn Receiver<T>>) {
        self.subs.lock().unwrap().push(Sub {
            groups_in,
            receiver,
        });
    }

    /// Number of currently-wired subscribers (for tests/diagnostics).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subs.lock().unwrap().len()
    }

    /// Deliver one frame to every receiver whose `groups_in` intersects
    /// `tag.group`. Errors from individual receivers are logged and do not
    /// stop delivery to the rest - one bad output must not wedge the graph.
    pub fn send(&self, frame: &T, tag: &Tag) {
        let subs = self.subs.lock().unwrap();
        for sub in subs.iter() {
            if (sub.groups_in & tag.group) != 0
                && let Err(e) = sub.receiver.accept(frame, tag)
            {
                log::warn!("receiver rejected frame: {e}");
            }
        }
    }
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self::new(ALL_GROUPS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);
    impl Receiver<u32> for Counter {
        fn accept(&self, _frame: &u32, _tag: &Tag) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn routes_only_matching_groups() {
        let conn = Connection::<u32>::new(ALL_GROUPS);
        let a = Arc::new(Counter(AtomicUsize::new(0)));
        let b = Arc::new(Counter(AtomicUsize::new(0)));
        conn.connect(0b01, a.clone());
        conn.connect(0b10, b.clone());

        let mut tag = Tag::default();
        tag.group = 0b01;
        conn.send(&42, &tag);

        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn can_connect_checks_intersection() {
        let conn = Connection::<u32>::new(0b0110);
        assert!(conn.can_connect(0b0010));
        assert!(!conn.can_connect(0b1000));
    }
}
