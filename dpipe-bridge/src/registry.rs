//! Handle table making bridges addressable by id.
//!
//! A [`HandleTable`] owns a fixed number of slots, one bridge per slot.
//! Spawning through the table follows a reserve/install/schedule order:
//! the worker thread is created parked, a slot is reserved, the handle is
//! installed in it, and only then is the worker actually scheduled. If no
//! slot is free, the parked worker is stopped and joined before the error
//! is returned — the table never leaves a runnable thread behind without
//! an id addressing it.

use parking_lot::Mutex;
use tracing::debug;

use crate::error::SpawnError;
use crate::handle::{Bridge, BridgeHandle};
use crate::redirect::StdioRedirect;

/// Identifier of an installed bridge within its [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(usize);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-size table of live bridges.
pub struct HandleTable {
    slots: Mutex<Vec<Option<BridgeHandle>>>,
}

impl HandleTable {
    /// Creates a table with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "handle table capacity must be non-zero");
        Self {
            slots: Mutex::new((0..capacity).map(|_| None).collect()),
        }
    }

    /// Spawns `run` on a new worker thread and installs its bridge.
    ///
    /// On success the worker is scheduled and its id returned. When the
    /// table is full, the freshly created thread is rolled back (stopped
    /// and joined, its body never entered) and
    /// [`SpawnError::Exhausted`] is surfaced; thread-creation failure
    /// surfaces as [`SpawnError::Thread`]. Either way no orphaned thread
    /// or slot remains.
    pub fn spawn<F>(&self, bridge: Bridge, run: F) -> Result<HandleId, SpawnError>
    where
        F: FnOnce(&StdioRedirect) + Send + 'static,
    {
        let pending = bridge.spawn_gated(run)?;

        let mut slots = self.slots.lock();
        let Some(free) = slots.iter().position(Option::is_none) else {
            drop(slots);
            pending.abort();
            return Err(SpawnError::Exhausted);
        };
        slots[free] = Some(pending.handle().clone());
        drop(slots);

        // Handle fully installed; now let the worker body run.
        pending.commit();
        debug!(id = free, "bridge installed");
        Ok(HandleId(free))
    }

    /// The handle installed at `id`, if still present.
    pub fn get(&self, id: HandleId) -> Option<BridgeHandle> {
        self.slots.lock().get(id.0)?.clone()
    }

    /// Forcibly stops the bridge at `id` and vacates its slot.
    ///
    /// Converges on the same idempotent teardown as
    /// [`BridgeHandle::close`]; releasing an already-vacated id is a
    /// no-op.
    pub fn release(&self, id: HandleId) {
        let handle = self.slots.lock().get_mut(id.0).and_then(Option::take);
        if let Some(handle) = handle {
            debug!(id = id.0, "bridge released");
            handle.close();
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// True when no bridge is installed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
