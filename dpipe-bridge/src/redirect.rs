//! Duplex stdio redirect pairing a bridge's two channels.
//!
//! A [`StdioRedirect`] is the worker thread's view of its bridge: an
//! `input` channel carrying bytes from the external handle to the worker
//! and an `output` channel carrying bytes back, tied together by one
//! monotonic `done` flag. The worker reads lines of input, writes results,
//! and polls [`StdioRedirect::is_done`] to notice a stop request; the
//! handle adapter drives the same two channels from the other ends.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::channel::{ByteChannel, IoMode};
use crate::error::BridgeError;

/// Duplex byte stream between a worker thread and its external handle.
pub struct StdioRedirect {
    input: ByteChannel,
    output: ByteChannel,
    done: Arc<AtomicBool>,
}

impl StdioRedirect {
    pub(crate) fn new(capacity: usize) -> Self {
        let done = Arc::new(AtomicBool::new(false));
        Self {
            input: ByteChannel::with_shutdown(capacity, Arc::clone(&done)),
            output: ByteChannel::with_shutdown(capacity, Arc::clone(&done)),
            done,
        }
    }

    /// The external-to-worker channel.
    pub(crate) fn input(&self) -> &ByteChannel {
        &self.input
    }

    /// The worker-to-external channel.
    pub(crate) fn output(&self) -> &ByteChannel {
        &self.output
    }

    /// True once either side has begun shutting the bridge down. Worker
    /// bodies should poll this between units of work and return promptly
    /// when it reports true.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Sets the done flag and wakes every waiter on both channels.
    ///
    /// Monotonic and idempotent: the flag never resets, and repeat calls
    /// just re-broadcast. Each channel's lock is taken briefly while
    /// waking so no concurrent waiter can check its predicate before the
    /// flag and park after the broadcast.
    pub fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
        self.input.wake_all();
        self.output.wake_all();
    }

    /// Blocking read from the input stream.
    ///
    /// Suspends until input arrives, then drains up to `out.len()` bytes.
    /// Returns [`BridgeError::Closed`] once the bridge is done and the
    /// input is fully drained.
    pub fn read(&self, out: &mut [u8]) -> Result<usize, BridgeError> {
        self.input.remove(out, IoMode::Blocking)
    }

    /// Blocking read of one newline-terminated line from the input stream.
    ///
    /// Returns the line including its `\n`, or an unterminated tail when
    /// `out` fills up or the bridge shuts down mid-line.
    pub fn read_line(&self, out: &mut [u8]) -> Result<usize, BridgeError> {
        self.input.remove_until(b'\n', out)
    }

    /// Writes bytes to the output stream, returning how many were
    /// accepted.
    ///
    /// Blocking mode retries short writes until everything is queued or
    /// the bridge is done. Non-blocking mode queues what fits right now
    /// and silently drops the rest — output here is best-effort
    /// diagnostics, and loss under backpressure is intended, not an error.
    pub fn write(&self, bytes: &[u8], mode: IoMode) -> usize {
        let mut written = 0;
        while written < bytes.len() {
            match self.output.append(&bytes[written..], mode) {
                Ok(n) => written += n,
                Err(_) => break,
            }
        }
        written
    }

    /// Formats a message and writes it to the output stream as one unit.
    ///
    /// The message is composed in full before anything is submitted; the
    /// composition buffer grows as needed and is not bounded by the
    /// channel capacity. Blocking mode then queues the whole message,
    /// retrying short writes. Non-blocking mode is all-or-nothing: if the
    /// complete message does not fit it is skipped entirely, so readers
    /// never see a truncated message. Note that composition itself may
    /// allocate, so the non-blocking path is only approximately
    /// non-blocking under memory pressure.
    pub fn write_fmt(&self, args: fmt::Arguments<'_>, mode: IoMode) {
        let msg: Cow<'_, str> = match args.as_str() {
            Some(s) => Cow::Borrowed(s),
            None => Cow::Owned(args.to_string()),
        };
        match mode {
            IoMode::Blocking => {
                self.write(msg.as_bytes(), IoMode::Blocking);
            }
            IoMode::Nonblocking => {
                let _ = self.output.try_append_all(msg.as_bytes());
            }
        }
    }
}

impl fmt::Debug for StdioRedirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioRedirect")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("done", &self.is_done())
            .finish()
    }
}
