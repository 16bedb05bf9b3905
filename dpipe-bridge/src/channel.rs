//! Bounded byte channel with blocking, non-blocking, and readiness access.
//!
//! A [`ByteChannel`] is one direction of a bridge: a capacity-bounded byte
//! buffer protected by a mutex, with a condition variable broadcasting
//! state changes to everyone blocked on it. Producers append at the back,
//! consumers remove from the front; bytes come out exactly in the order
//! they went in.
//!
//! ## Wakeup protocol
//!
//! Wakeups are broadcast, not targeted: after any successful insert or
//! removal every waiter is woken and re-checks its own predicate. This is
//! deliberately imprecise — multiple readers and writers with different
//! predicates can block on the same channel at once, and correctness only
//! requires that predicates are idempotent, not that the right thread is
//! woken.
//!
//! Blocking waits never park unboundedly. They re-check their predicate on
//! a fixed interval so a thread waiting minutes for input is never
//! mistaken for a hung thread by stall watchdogs.
//!
//! ## Shutdown
//!
//! Every channel shares a monotonic `done` flag with its bridge. Once the
//! flag is set, both readiness predicates report true so every blocked
//! party wakes and observes shutdown: readers drain whatever is left and
//! then see [`BridgeError::Closed`], writers see `Closed` as soon as no
//! space is left to honor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::BridgeError;

/// Default per-direction buffer capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Upper bound on a single park. Waiters wake on this interval and
/// re-check their predicate, staying safely under the minute-scale
/// thresholds of typical stall detectors.
const WAIT_RECHECK: Duration = Duration::from_secs(30);

/// Whether a call may suspend the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Suspend until the channel is ready or the bridge is done.
    Blocking,
    /// Never suspend; return [`BridgeError::WouldBlock`] instead.
    Nonblocking,
}

/// Cancellation probe for handle-side blocking calls, polled on every
/// wakeup. Worker-side calls pass `None` and wait only for readiness or
/// shutdown.
pub(crate) type Cancel<'a> = Option<&'a dyn Fn() -> bool>;

/// One direction's bounded byte buffer plus its wait set.
pub struct ByteChannel {
    capacity: usize,
    data: Mutex<VecDeque<u8>>,
    cond: Condvar,
    done: Arc<AtomicBool>,
}

impl ByteChannel {
    /// Creates a standalone channel with its own shutdown flag.
    pub fn new(capacity: usize) -> Self {
        Self::with_shutdown(capacity, Arc::new(AtomicBool::new(false)))
    }

    /// Creates a channel sharing `done` with the rest of its bridge.
    pub(crate) fn with_shutdown(capacity: usize, done: Arc<AtomicBool>) -> Self {
        assert!(capacity > 0, "channel capacity must be non-zero");
        Self {
            capacity,
            data: Mutex::new(VecDeque::with_capacity(capacity)),
            cond: Condvar::new(),
            done,
        }
    }

    /// The fixed capacity bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Currently buffered byte count.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// True when a read can proceed without suspending: bytes are buffered
    /// or the bridge is done.
    pub fn has_data(&self) -> bool {
        !self.data.lock().is_empty() || self.is_done()
    }

    /// True when a write can proceed without suspending: the buffer is
    /// below capacity or the bridge is done.
    pub fn has_space(&self) -> bool {
        self.data.lock().len() < self.capacity || self.is_done()
    }

    /// Marks a standalone channel done and wakes all waiters. Channels
    /// inside a bridge are shut down through the redirect instead, so both
    /// directions close together.
    pub fn close(&self) {
        self.done.store(true, Ordering::Release);
        self.wake_all();
    }

    /// Broadcast wakeup. Briefly takes the data lock so the notification
    /// cannot slip between a waiter's predicate check and its park.
    pub(crate) fn wake_all(&self) {
        drop(self.data.lock());
        self.cond.notify_all();
    }

    /// Releases the buffer storage during teardown. Only called once the
    /// bridge is done and the worker has been joined.
    pub(crate) fn release(&self) {
        let mut data = self.data.lock();
        debug_assert!(self.is_done());
        data.clear();
        data.shrink_to_fit();
    }

    /// Acquires the data lock once `ready` holds or the bridge is done,
    /// re-checking on a bounded interval.
    fn lock_when<'a>(
        &'a self,
        mode: IoMode,
        ready: impl Fn(&VecDeque<u8>) -> bool,
        cancel: Cancel<'_>,
    ) -> Result<MutexGuard<'a, VecDeque<u8>>, BridgeError> {
        let mut data = self.data.lock();
        loop {
            if ready(&data) || self.is_done() {
                return Ok(data);
            }
            if mode == IoMode::Nonblocking {
                return Err(BridgeError::WouldBlock);
            }
            if let Some(cancelled) = cancel {
                if cancelled() {
                    return Err(BridgeError::Interrupted);
                }
            }
            self.cond.wait_for(&mut data, WAIT_RECHECK);
        }
    }

    /// Appends as much of `bytes` as fits under the capacity bound.
    ///
    /// Returns the number of bytes inserted, which may be short of
    /// `bytes.len()`; the caller retries with the remainder. Blocking mode
    /// suspends until at least one byte of space exists or the bridge is
    /// done. Returns [`BridgeError::Closed`] when the bridge is done and
    /// no byte could be inserted.
    pub fn append(&self, bytes: &[u8], mode: IoMode) -> Result<usize, BridgeError> {
        self.append_cancellable(bytes, mode, None)
    }

    pub(crate) fn append_cancellable(
        &self,
        bytes: &[u8],
        mode: IoMode,
        cancel: Cancel<'_>,
    ) -> Result<usize, BridgeError> {
        if bytes.is_empty() {
            return Ok(0);
        }

        let mut data = self.lock_when(mode, |d| d.len() < self.capacity, cancel)?;
        let n = bytes.len().min(self.capacity - data.len());
        if n == 0 {
            // Only reachable once done is set: the wait above otherwise
            // never returns with a full buffer.
            return Err(BridgeError::Closed);
        }
        data.extend(&bytes[..n]);
        drop(data);

        self.cond.notify_all();
        Ok(n)
    }

    /// Appends `bytes` only if the whole slice fits, never a prefix.
    ///
    /// Used for composed messages that must not be truncated mid-write.
    pub(crate) fn try_append_all(&self, bytes: &[u8]) -> Result<(), BridgeError> {
        let mut data = self.data.lock();
        if self.is_done() {
            return Err(BridgeError::Closed);
        }
        if self.capacity - data.len() < bytes.len() {
            return Err(BridgeError::WouldBlock);
        }
        data.extend(bytes);
        drop(data);

        self.cond.notify_all();
        Ok(())
    }

    /// Removes up to `out.len()` bytes from the front of the buffer.
    ///
    /// Blocking mode suspends until data arrives or the bridge is done.
    /// Returns [`BridgeError::Closed`] only when the bridge is done *and*
    /// nothing remains to drain, so a final drain after shutdown still
    /// delivers the buffered remainder.
    pub fn remove(&self, out: &mut [u8], mode: IoMode) -> Result<usize, BridgeError> {
        self.remove_cancellable(out, mode, None)
    }

    pub(crate) fn remove_cancellable(
        &self,
        out: &mut [u8],
        mode: IoMode,
        cancel: Cancel<'_>,
    ) -> Result<usize, BridgeError> {
        if out.is_empty() {
            return Ok(0);
        }

        let mut data = self.lock_when(mode, |d| !d.is_empty(), cancel)?;
        if data.is_empty() {
            return Err(BridgeError::Closed);
        }
        let n = out.len().min(data.len());
        for (dst, src) in out[..n].iter_mut().zip(data.drain(..n)) {
            *dst = src;
        }
        drop(data);

        self.cond.notify_all();
        Ok(n)
    }

    /// Removes bytes from the front up to and including the first `delim`.
    ///
    /// If no delimiter is buffered yet and `out` still has room, the call
    /// re-waits for more data and keeps accumulating. It returns once a
    /// delimiter has been copied, `out` is full, or the bridge is done —
    /// in which case whatever was accumulated is returned, and only an
    /// empty accumulation reports [`BridgeError::Closed`].
    pub fn remove_until(&self, delim: u8, out: &mut [u8]) -> Result<usize, BridgeError> {
        if out.is_empty() {
            return Ok(0);
        }

        let mut copied = 0;
        while copied < out.len() {
            let mut data = self.lock_when(IoMode::Blocking, |d| !d.is_empty(), None)?;
            if data.is_empty() {
                break;
            }

            let window = (out.len() - copied).min(data.len());
            let hit = find_delim(&data, delim, window);
            let take = hit.map_or(window, |pos| pos + 1);
            for (dst, src) in out[copied..copied + take].iter_mut().zip(data.drain(..take)) {
                *dst = src;
            }
            copied += take;
            drop(data);

            self.cond.notify_all();
            if hit.is_some() {
                return Ok(copied);
            }
        }

        if copied > 0 {
            Ok(copied)
        } else {
            Err(BridgeError::Closed)
        }
    }
}

impl std::fmt::Debug for ByteChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteChannel")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("done", &self.is_done())
            .finish()
    }
}

/// Position of the first `delim` within the front `window` bytes, scanning
/// both halves of the ring with memchr.
fn find_delim(data: &VecDeque<u8>, delim: u8, window: usize) -> Option<usize> {
    let (front, back) = data.as_slices();
    let front_window = window.min(front.len());
    if let Some(i) = memchr::memchr(delim, &front[..front_window]) {
        return Some(i);
    }
    if window > front.len() {
        if let Some(i) = memchr::memchr(delim, &back[..window - front.len()]) {
            return Some(front.len() + i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order_preserved() {
        let chan = ByteChannel::new(64);
        chan.append(b"abc", IoMode::Blocking).unwrap();
        chan.append(b"def", IoMode::Blocking).unwrap();

        let mut out = [0u8; 4];
        assert_eq!(chan.remove(&mut out, IoMode::Blocking).unwrap(), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(chan.remove(&mut out, IoMode::Blocking).unwrap(), 2);
        assert_eq!(&out[..2], b"ef");
    }

    #[test]
    fn short_write_at_capacity() {
        // Capacity 8, 10-byte non-blocking append: 8 in, "LD" left out.
        let chan = ByteChannel::new(8);
        assert_eq!(chan.append(b"HELLOWORLD", IoMode::Nonblocking).unwrap(), 8);
        assert_eq!(chan.len(), 8);

        let mut out = [0u8; 8];
        assert_eq!(chan.remove(&mut out, IoMode::Blocking).unwrap(), 8);
        assert_eq!(&out, b"HELLOWOR");
    }

    #[test]
    fn two_short_writes_then_would_block() {
        let chan = ByteChannel::new(8);
        assert_eq!(chan.append(b"AAAAA", IoMode::Nonblocking).unwrap(), 5);
        assert_eq!(chan.append(b"BBBBB", IoMode::Nonblocking).unwrap(), 3);
        assert!(matches!(
            chan.append(b"CCCCC", IoMode::Nonblocking),
            Err(BridgeError::WouldBlock)
        ));
        // Contents unchanged by the failed write.
        assert_eq!(chan.len(), 8);

        let mut out = [0u8; 8];
        chan.remove(&mut out, IoMode::Blocking).unwrap();
        assert_eq!(&out, b"AAAAABBB");
    }

    #[test]
    fn has_space_over_fill_and_drain() {
        let chan = ByteChannel::new(4);
        assert!(chan.has_space());
        chan.append(b"wxyz", IoMode::Blocking).unwrap();
        assert!(!chan.has_space());

        let mut out = [0u8; 1];
        chan.remove(&mut out, IoMode::Blocking).unwrap();
        assert!(chan.has_space());
    }

    #[test]
    fn nonblocking_remove_on_empty() {
        let chan = ByteChannel::new(8);
        let mut out = [0u8; 4];
        assert!(matches!(
            chan.remove(&mut out, IoMode::Nonblocking),
            Err(BridgeError::WouldBlock)
        ));
    }

    #[test]
    fn close_makes_predicates_true_and_drains() {
        let chan = ByteChannel::new(8);
        chan.append(b"tail", IoMode::Blocking).unwrap();
        chan.close();

        assert!(chan.has_data());
        assert!(chan.has_space());

        // Final drain still succeeds after close, then Closed.
        let mut out = [0u8; 8];
        assert_eq!(chan.remove(&mut out, IoMode::Blocking).unwrap(), 4);
        assert_eq!(&out[..4], b"tail");
        assert!(matches!(
            chan.remove(&mut out, IoMode::Blocking),
            Err(BridgeError::Closed)
        ));
    }

    #[test]
    fn append_after_close_without_space_is_closed() {
        let chan = ByteChannel::new(4);
        chan.append(b"full", IoMode::Blocking).unwrap();
        chan.close();
        assert!(matches!(
            chan.append(b"x", IoMode::Blocking),
            Err(BridgeError::Closed)
        ));
    }

    #[test]
    fn close_wakes_blocked_reader() {
        let chan = Arc::new(ByteChannel::new(8));
        let reader = {
            let chan = Arc::clone(&chan);
            thread::spawn(move || {
                let mut out = [0u8; 8];
                chan.remove(&mut out, IoMode::Blocking)
            })
        };

        thread::sleep(Duration::from_millis(50));
        chan.close();

        assert!(matches!(reader.join().unwrap(), Err(BridgeError::Closed)));
    }

    #[test]
    fn blocked_writer_resumes_after_drain() {
        let chan = Arc::new(ByteChannel::new(8));
        assert_eq!(chan.append(b"HELLOWORLD", IoMode::Nonblocking).unwrap(), 8);

        let writer = {
            let chan = Arc::clone(&chan);
            thread::spawn(move || chan.append(b"LD", IoMode::Blocking))
        };

        thread::sleep(Duration::from_millis(50));
        let mut out = [0u8; 2];
        chan.remove(&mut out, IoMode::Blocking).unwrap();

        assert_eq!(writer.join().unwrap().unwrap(), 2);
        let mut rest = [0u8; 8];
        assert_eq!(chan.remove(&mut rest, IoMode::Blocking).unwrap(), 8);
        assert_eq!(&rest, b"LLOWORLD");
    }

    #[test]
    fn remove_until_delimiter_already_buffered() {
        let chan = ByteChannel::new(32);
        chan.append(b"one\ntwo\n", IoMode::Blocking).unwrap();

        let mut out = [0u8; 32];
        let n = chan.remove_until(b'\n', &mut out).unwrap();
        assert_eq!(&out[..n], b"one\n");

        // Remainder stays queued for the next call.
        let n = chan.remove_until(b'\n', &mut out).unwrap();
        assert_eq!(&out[..n], b"two\n");
    }

    #[test]
    fn remove_until_waits_for_delimiter() {
        let chan = Arc::new(ByteChannel::new(32));
        chan.append(b"par", IoMode::Blocking).unwrap();

        let reader = {
            let chan = Arc::clone(&chan);
            thread::spawn(move || {
                let mut out = [0u8; 32];
                let n = chan.remove_until(b'\n', &mut out).unwrap();
                out[..n].to_vec()
            })
        };

        thread::sleep(Duration::from_millis(50));
        chan.append(b"tial\n", IoMode::Blocking).unwrap();

        assert_eq!(reader.join().unwrap(), b"partial\n");
    }

    #[test]
    fn remove_until_returns_accumulation_on_close() {
        let chan = Arc::new(ByteChannel::new(32));
        chan.append(b"no newline", IoMode::Blocking).unwrap();

        let reader = {
            let chan = Arc::clone(&chan);
            thread::spawn(move || {
                let mut out = [0u8; 32];
                let n = chan.remove_until(b'\n', &mut out).unwrap();
                out[..n].to_vec()
            })
        };

        thread::sleep(Duration::from_millis(50));
        chan.close();

        assert_eq!(reader.join().unwrap(), b"no newline");
    }

    #[test]
    fn remove_until_with_empty_out_is_not_closed() {
        let chan = ByteChannel::new(32);
        chan.append(b"data\n", IoMode::Blocking).unwrap();

        // Closed is reserved for a done bridge; a zero-length probe on a
        // live channel reads zero bytes like remove does.
        let mut out = [0u8; 0];
        assert!(matches!(chan.remove_until(b'\n', &mut out), Ok(0)));
        assert_eq!(chan.len(), 5);
    }

    #[test]
    fn remove_until_stops_when_out_full() {
        let chan = ByteChannel::new(32);
        chan.append(b"abcdef", IoMode::Blocking).unwrap();

        let mut out = [0u8; 4];
        let n = chan.remove_until(b'\n', &mut out).unwrap();
        assert_eq!(&out[..n], b"abcd");
    }

    #[test]
    fn concurrent_producer_consumer_preserves_bytes() {
        let chan = Arc::new(ByteChannel::new(16));
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        let producer = {
            let chan = Arc::clone(&chan);
            let payload = payload.clone();
            thread::spawn(move || {
                let mut sent = 0;
                while sent < payload.len() {
                    sent += chan.append(&payload[sent..], IoMode::Blocking).unwrap();
                }
            })
        };

        let mut received = Vec::with_capacity(payload.len());
        let mut out = [0u8; 7];
        while received.len() < payload.len() {
            let n = chan.remove(&mut out, IoMode::Blocking).unwrap();
            received.extend_from_slice(&out[..n]);
        }

        producer.join().unwrap();
        assert_eq!(received, payload);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Round-trip law: bytes come out exactly as they went in, in
            // order, for any chunking of appends and removes.
            #[test]
            fn fifo_round_trip(
                chunks in prop::collection::vec(
                    prop::collection::vec(any::<u8>(), 0..32),
                    0..16,
                ),
                drain in 1usize..9,
            ) {
                let chan = ByteChannel::new(64);
                let mut expected = Vec::new();
                let mut observed = Vec::new();
                let mut out = vec![0u8; drain];

                for chunk in &chunks {
                    let mut sent = 0;
                    while sent < chunk.len() {
                        sent += chan.append(&chunk[sent..], IoMode::Blocking).unwrap();
                        // Drain as we go so the producer never blocks.
                        while !chan.is_empty() {
                            let n = chan.remove(&mut out, IoMode::Blocking).unwrap();
                            observed.extend_from_slice(&out[..n]);
                        }
                    }
                    expected.extend_from_slice(chunk);
                }

                prop_assert_eq!(observed, expected);
            }
        }
    }
}
