//! Worker thread ownership and the deferred-start gate.
//!
//! Bridges create their worker thread before the handle that addresses it
//! exists. The thread therefore starts parked on a [`StartGate`] and only
//! begins running the worker body once the handle is fully installed; if
//! installation fails, the gate is released with [`Verdict::Abort`] and
//! the thread exits without ever running user code, so no worker is left
//! runnable without a handle.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::error;

use crate::redirect::StdioRedirect;

/// Owns the worker thread's join handle until teardown.
pub(crate) struct WorkerThread {
    task: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// A placeholder with no thread attached yet; `attach` follows once
    /// the spawn succeeds.
    pub(crate) fn detached() -> Self {
        Self { task: None }
    }

    pub(crate) fn attach(&mut self, task: JoinHandle<()>) {
        debug_assert!(self.task.is_none());
        self.task = Some(task);
    }

    /// Waits for the worker to fully exit. Idempotent: repeat calls are
    /// no-ops. A worker panic is contained here, not propagated.
    pub(crate) fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if task.join().is_err() {
                error!("bridge worker thread panicked");
            }
        }
    }
}

/// Decision delivered through a [`StartGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Handle installed; run the worker body.
    Run,
    /// Spawn rolled back; exit without running the worker body.
    Abort,
}

/// One-shot gate the worker parks on until spawn finishes installing its
/// handle.
pub(crate) struct StartGate {
    slot: Mutex<Option<Verdict>>,
    cond: Condvar,
}

impl StartGate {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        }
    }

    /// Delivers the verdict and unparks the worker.
    pub(crate) fn release(&self, verdict: Verdict) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.is_none());
        *slot = Some(verdict);
        self.cond.notify_one();
    }

    /// Parks until a verdict is delivered.
    pub(crate) fn wait(&self) -> Verdict {
        let mut slot = self.slot.lock();
        loop {
            if let Some(verdict) = *slot {
                return verdict;
            }
            self.cond.wait(&mut slot);
        }
    }
}

/// Marks the bridge done when dropped, so the external side unblocks even
/// if the worker body panics instead of returning.
pub(crate) struct DoneOnExit(pub(crate) Arc<StdioRedirect>);

impl Drop for DoneOnExit {
    fn drop(&mut self) {
        self.0.mark_done();
    }
}
