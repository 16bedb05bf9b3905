//! External handle surface: read, write, poll, interrupt, close.
//!
//! A [`BridgeHandle`] is the external side of a bridge. It translates
//! handle-level calls into channel operations — reads drain the worker's
//! output channel, writes feed its input channel — and owns the one-shot
//! teardown path.
//!
//! ## Lifecycle
//!
//! A handle moves through three states:
//!
//! - **Active**: worker running, both directions open.
//! - **Draining**: the done flag is set (worker finished or shutdown has
//!   begun) but buffered output may still be read.
//! - **Closed**: [`BridgeHandle::close`] ran; buffers are released and the
//!   worker is gone.
//!
//! The Closed transition happens exactly once, guarded by a one-shot
//! latch, and performs in strict order: set done, join the worker, release
//! both channel buffers, invoke the cleanup callback. That order
//! guarantees the worker never observes released buffers and cleanup
//! never runs concurrently with worker activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, Once};
use tracing::{debug, trace};

use crate::channel::{IoMode, DEFAULT_CAPACITY};
use crate::error::{BridgeError, SpawnError};
use crate::redirect::StdioRedirect;
use crate::thread::{DoneOnExit, StartGate, Verdict, WorkerThread};

type CleanupFn = Box<dyn FnOnce() + Send + 'static>;

bitflags::bitflags! {
    /// Readiness bits reported by [`BridgeHandle::poll`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Readiness: u8 {
        /// The output channel has buffered data (or the bridge is done).
        const READABLE = 1 << 0;
        /// The input channel has free space (or the bridge is done).
        const WRITABLE = 1 << 1;
        /// The bridge is done; both ready bits accompany this one.
        const HANGUP = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Which directions a handle supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMode: u8 {
        /// The handle can read worker output.
        const READ = 1 << 0;
        /// The handle can write worker input.
        const WRITE = 1 << 1;
    }
}

impl AccessMode {
    /// Derived from which of the read/write operations the adapter
    /// supports. The stdio adapter supports both.
    pub(crate) fn from_ops(read: bool, write: bool) -> Self {
        let mut mode = Self::empty();
        if read {
            mode |= Self::READ;
        }
        if write {
            mode |= Self::WRITE;
        }
        mode
    }
}

/// Externally observable lifecycle state of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Worker running, both directions open.
    Active,
    /// Shutdown begun; buffered output may still be drained.
    Draining,
    /// Torn down; operations fail deterministically.
    Closed,
}

/// Builder for a worker bridge.
///
/// ```no_run
/// use dpipe_bridge::{Bridge, IoMode};
///
/// let handle = Bridge::new("worker")
///     .spawn(|stdio| {
///         let mut line = [0u8; 256];
///         while let Ok(n) = stdio.read_line(&mut line) {
///             stdio.write_fmt(format_args!("got {} bytes\n", n), IoMode::Blocking);
///         }
///     })
///     .unwrap();
/// # drop(handle);
/// ```
pub struct Bridge {
    name: String,
    capacity: usize,
    cleanup: Option<CleanupFn>,
}

impl Bridge {
    /// Starts building a bridge whose worker thread carries `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: DEFAULT_CAPACITY,
            cleanup: None,
        }
    }

    /// Overrides the per-direction buffer capacity.
    pub fn capacity(mut self, bytes: usize) -> Self {
        self.capacity = bytes;
        self
    }

    /// Registers a callback invoked exactly once during close, after the
    /// worker has fully stopped and the buffers are released. Use it to
    /// free whatever resource the worker body owned.
    pub fn on_cleanup(mut self, cleanup: impl FnOnce() + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    /// Spawns the worker and returns the handle addressing it.
    ///
    /// `run` receives the worker's [`StdioRedirect`]; when it returns (or
    /// panics) the bridge is marked done and external readers drain to
    /// EOF. The worker's return value is not observed beyond "finished".
    pub fn spawn<F>(self, run: F) -> Result<BridgeHandle, SpawnError>
    where
        F: FnOnce(&StdioRedirect) + Send + 'static,
    {
        Ok(self.spawn_gated(run)?.commit())
    }

    /// Spawns the worker parked on its start gate. The thread does not run
    /// the worker body until the pending bridge is committed; aborting it
    /// instead stops and joins the thread with the body never entered.
    pub(crate) fn spawn_gated<F>(self, run: F) -> Result<PendingBridge, SpawnError>
    where
        F: FnOnce(&StdioRedirect) + Send + 'static,
    {
        let stdio = Arc::new(StdioRedirect::new(self.capacity));
        let gate = Arc::new(StartGate::new());
        let shared = Arc::new(BridgeShared {
            stdio: Arc::clone(&stdio),
            worker: Mutex::new(WorkerThread::detached()),
            cleanup: Mutex::new(self.cleanup),
            intr_gen: AtomicU64::new(0),
            closed: Once::new(),
            access: AccessMode::from_ops(true, true),
        });

        let task = thread::Builder::new().name(self.name.clone()).spawn({
            let stdio = Arc::clone(&stdio);
            let gate = Arc::clone(&gate);
            move || {
                // Marks done on every exit path, including panics.
                let _done = DoneOnExit(Arc::clone(&stdio));
                if gate.wait() == Verdict::Run {
                    run(&stdio);
                }
            }
        })?;
        shared.worker.lock().attach(task);

        debug!(name = %self.name, capacity = self.capacity, "bridge worker created");
        Ok(PendingBridge {
            handle: BridgeHandle { shared },
            gate,
        })
    }
}

/// A spawned bridge whose worker is still parked on its start gate.
pub(crate) struct PendingBridge {
    handle: BridgeHandle,
    gate: Arc<StartGate>,
}

impl PendingBridge {
    pub(crate) fn handle(&self) -> &BridgeHandle {
        &self.handle
    }

    /// Schedules the worker body and hands out the handle.
    pub(crate) fn commit(self) -> BridgeHandle {
        self.gate.release(Verdict::Run);
        self.handle
    }

    /// Rolls the spawn back: the worker exits without running its body and
    /// the normal teardown path reclaims everything.
    pub(crate) fn abort(self) {
        debug!("bridge spawn rolled back before handle install");
        self.gate.release(Verdict::Abort);
        self.handle.shared.close();
    }
}

/// Shared state between every clone of a handle.
struct BridgeShared {
    stdio: Arc<StdioRedirect>,
    worker: Mutex<WorkerThread>,
    cleanup: Mutex<Option<CleanupFn>>,
    /// Bumped by `interrupt()`; blocking calls trip on a change.
    intr_gen: AtomicU64,
    /// One-shot teardown latch; all close paths converge here.
    closed: Once,
    access: AccessMode,
}

impl BridgeShared {
    fn close(&self) {
        self.closed.call_once(|| {
            trace!("bridge closing: marking done");
            self.stdio.mark_done();
            trace!("bridge closing: joining worker");
            self.worker.lock().join();
            trace!("bridge closing: releasing buffers");
            self.stdio.input().release();
            self.stdio.output().release();
            if let Some(cleanup) = self.cleanup.lock().take() {
                cleanup();
            }
            debug!("bridge closed");
        });
    }
}

impl Drop for BridgeShared {
    fn drop(&mut self) {
        self.close();
    }
}

/// The externally addressable side of a bridge.
///
/// Cheap to clone; all clones address the same bridge, and the bridge
/// closes when the last clone drops (or [`BridgeHandle::close`] is called
/// explicitly).
#[derive(Clone)]
pub struct BridgeHandle {
    shared: Arc<BridgeShared>,
}

impl BridgeHandle {
    /// Reads worker output into `out`.
    ///
    /// Blocking mode suspends until output arrives, the bridge shuts
    /// down, or [`BridgeHandle::interrupt`] fires. Returns `Ok(0)` as EOF
    /// once the worker is done and its output is drained; non-blocking
    /// mode returns [`BridgeError::WouldBlock`] when nothing is buffered
    /// yet.
    pub fn read(&self, out: &mut [u8], mode: IoMode) -> Result<usize, BridgeError> {
        let gen = self.shared.intr_gen.load(Ordering::Acquire);
        let cancel = || self.shared.intr_gen.load(Ordering::Acquire) != gen;
        match self
            .shared
            .stdio
            .output()
            .remove_cancellable(out, mode, Some(&cancel))
        {
            // Done and fully drained reads as end-of-file.
            Err(BridgeError::Closed) => Ok(0),
            result => result,
        }
    }

    /// Writes `bytes` into the worker's input.
    ///
    /// Blocking mode retries short writes until everything is queued,
    /// suspending while the input channel is full. A write that arrives
    /// after the bridge is done fails with [`BridgeError::BrokenPipe`];
    /// partial progress made before shutdown or interruption is reported
    /// as a short count instead of an error.
    pub fn write(&self, bytes: &[u8], mode: IoMode) -> Result<usize, BridgeError> {
        let gen = self.shared.intr_gen.load(Ordering::Acquire);
        let cancel = || self.shared.intr_gen.load(Ordering::Acquire) != gen;
        let input = self.shared.stdio.input();

        let mut written = 0;
        while written < bytes.len() {
            if self.shared.stdio.is_done() {
                return if written > 0 {
                    Ok(written)
                } else {
                    Err(BridgeError::BrokenPipe)
                };
            }
            match input.append_cancellable(&bytes[written..], mode, Some(&cancel)) {
                Ok(n) => written += n,
                Err(BridgeError::Closed) => {
                    return if written > 0 {
                        Ok(written)
                    } else {
                        Err(BridgeError::BrokenPipe)
                    };
                }
                Err(err) => {
                    return if written > 0 { Ok(written) } else { Err(err) };
                }
            }
        }
        Ok(written)
    }

    /// Reports current readiness without suspending.
    ///
    /// Once the bridge is done, `HANGUP` is reported together with both
    /// ready bits, so pollers always wake.
    pub fn poll(&self) -> Readiness {
        let stdio = &self.shared.stdio;
        let mut mask = Readiness::empty();
        if stdio.output().has_data() {
            mask |= Readiness::READABLE;
        }
        if stdio.input().has_space() {
            mask |= Readiness::WRITABLE;
        }
        if stdio.is_done() {
            mask |= Readiness::HANGUP;
        }
        mask
    }

    /// Cancels in-flight blocking reads and writes on this bridge; each
    /// returns [`BridgeError::Interrupted`] promptly with the buffers
    /// untouched. Calls that begin after the interrupt are unaffected.
    pub fn interrupt(&self) {
        self.shared.intr_gen.fetch_add(1, Ordering::AcqRel);
        self.shared.stdio.input().wake_all();
        self.shared.stdio.output().wake_all();
    }

    /// Tears the bridge down: sets done (unblocking both sides), joins the
    /// worker, releases the channel buffers, and runs the cleanup
    /// callback, in that order. Idempotent — repeat calls and races with
    /// in-flight reads and writes are safe.
    ///
    /// Joins the worker thread, so this must not be called from the worker
    /// body itself; a worker stops by returning.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Which directions this handle supports.
    pub fn access(&self) -> AccessMode {
        self.shared.access
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        if self.shared.closed.state().done() {
            BridgeState::Closed
        } else if self.shared.stdio.is_done() {
            BridgeState::Draining
        } else {
            BridgeState::Active
        }
    }
}

impl std::fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("state", &self.state())
            .field("access", &self.shared.access)
            .finish()
    }
}
