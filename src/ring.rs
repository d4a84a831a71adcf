//! Ring FIFO: bounded multi-block queue between one producer and one
//! consumer thread.
//!
//! Grounded on the teacher's [`circular_buffer`](crate::circular_buffer)
//! (wrap-around write/read ranges) and the original `Library/FIFO.h`
//! block-counted contract: `push` accepts writes of arbitrary size, `pop`
//! always hands back whole blocks.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

const WAIT_TIMEOUT: Duration = Duration::from_millis(1500);

struct Inner {
    buf: Vec<u8>,
    block_size: usize,
    block_count: usize,
    head: usize,
    tail: usize,
    /// Number of whole blocks filled. -1 (represented by `halted`) means
    /// the FIFO has been shut down.
    filled: usize,
    halted: bool,
}

/// Single-producer single-consumer bounded byte queue of fixed-size blocks.
pub struct RingFifo {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl RingFifo {
    /// Allocate `block_size * block_count` contiguous bytes.
    #[must_use]
    pub fn new(block_size: usize, block_count: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: vec![0u8; block_size * block_count],
                block_size,
                block_count,
                head: 0,
                tail: 0,
                filled: 0,
                halted: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Copy `data` into the buffer at the current tail, wrapping as needed.
    ///
    /// Returns `false` if the write would overflow (the whole write is
    /// rejected, never partially applied).
    pub fn push(&self, data: &[u8]) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.halted {
            return false;
        }
        let block_size = inner.block_size;
        let block_count = inner.block_count;
        let blocks_needed = data.len().div_ceil(block_size);
        if blocks_needed + inner.filled > block_count {
            return false;
        }
        let total_len = block_size * block_count;
        let mut pos = inner.tail;
        for &byte in data {
            inner.buf[pos] = byte;
            pos = (pos + 1) % total_len;
        }
        inner.tail = pos;
        // Whole blocks completed by this write become visible to the
        // consumer atomically, in one lock section.
        inner.filled += blocks_needed;
        drop(inner);
        self.cond.notify_all();
        true
    }

    /// Block the consumer up to 1500ms for `filled > 0`.
    ///
    /// Returns `false` on timeout or after [`halt`](Self::halt).
    pub fn wait(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        if inner.halted {
            return false;
        }
        if inner.filled > 0 {
            return true;
        }
        let (inner, timeout) = self
            .cond
            .wait_timeout_while(inner, WAIT_TIMEOUT, |s| s.filled == 0 && !s.halted)
            .unwrap();
        !timeout.timed_out() && !inner.halted && inner.filled > 0
    }

    /// Pointer to the current block, if any is filled.
    #[must_use]
    pub fn front(&self) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        if inner.filled == 0 {
            return None;
        }
        let block_size = inner.block_size;
        let total_len = block_size * inner.block_count;
        let mut block = vec![0u8; block_size];
        for (i, slot) in block.iter_mut().enumerate() {
            *slot = inner.buf[(inner.head + i) % total_len];
        }
        Some(block)
    }

    /// Free the current block. No-op if the queue is empty.
    pub fn pop(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.filled == 0 {
            return;
        }
        let block_size = inner.block_size;
        let total_len = block_size * inner.block_count;
        inner.head = (inner.head + block_size) % total_len;
        inner.filled -= 1;
        drop(inner);
        self.cond.notify_all();
    }

    /// Shut down: wake every waiter so consumers can drain and exit.
    pub fn halt(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.halted = true;
        drop(inner);
        self.cond.notify_all();
    }
}

/// A growable queue used where the original's FIFO dealt in whole typed
/// records rather than raw bytes (e.g. assembled NMEA lines handed between
/// the capture and reassembly stage without a fixed block size).
pub struct RecordFifo<T> {
    inner: Mutex<VecDeque<T>>,
    cond: Condvar,
}

impl<T> RecordFifo<T> {
    /// New empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    /// Push one record and wake a waiter.
    pub fn push(&self, v: T) {
        self.inner.lock().unwrap().push_back(v);
        self.cond.notify_all();
    }

    /// Pop one record, waiting up to 1500ms.
    pub fn wait_pop(&self) -> Option<T> {
        let inner = self.inner.lock().unwrap();
        let (mut inner, _) = self
            .cond
            .wait_timeout_while(inner, WAIT_TIMEOUT, |q| q.is_empty())
            .unwrap();
        inner.pop_front()
    }
}

impl<T> Default for RecordFifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_roundtrip() {
        let f = RingFifo::new(4, 2);
        assert!(f.push(b"ab"));
        assert!(f.push(b"cd"));
        // Second push completed the first block.
        assert!(f.wait());
        let block = f.front().unwrap();
        assert_eq!(&block, b"abcd");
        f.pop();
    }

    #[test]
    fn overflow_rejected() {
        let f = RingFifo::new(4, 2);
        assert!(!f.push(&[0u8; 9]));
    }

    #[test]
    fn wait_times_out_after_drain() {
        // block_size=2048, blocks=4: scenario #5 from spec.md's testable
        // properties table.
        let f = RingFifo::new(2048, 4);
        assert!(f.push(&[0u8; 4096]));
        assert!(f.wait());
        f.pop();
        assert!(f.wait());
        f.pop();
        assert!(!f.wait());
    }

    #[test]
    fn halt_wakes_waiters() {
        let f = std::sync::Arc::new(RingFifo::new(4, 2));
        let f2 = f.clone();
        let th = std::thread::spawn(move || f2.wait());
        std::thread::sleep(Duration::from_millis(20));
        f.halt();
        assert!(!th.join().unwrap());
    }

    #[test]
    fn pop_on_empty_is_noop() {
        let f = RingFifo::new(4, 2);
        f.pop();
        assert!(f.front().is_none());
    }
}
