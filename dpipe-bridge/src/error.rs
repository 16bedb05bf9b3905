//! Error types for bridge operations.

use std::io;

/// Error type for channel and handle I/O.
///
/// None of these are fatal to the process; worst case a bridge becomes
/// permanently closed and further operations fail deterministically.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Non-blocking call found the channel not ready. Retry later.
    #[error("operation would block")]
    WouldBlock,
    /// A blocking call was cancelled from outside while waiting.
    #[error("blocking operation interrupted")]
    Interrupted,
    /// The bridge is done and the channel has been fully drained.
    #[error("channel closed")]
    Closed,
    /// Write issued after the worker side already shut down.
    #[error("broken pipe: bridge is shutting down")]
    BrokenPipe,
}

/// Error type for bridge spawn.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    /// The OS refused to create the worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Thread(#[from] io::Error),
    /// No free slot in the handle table. The worker thread created for
    /// this bridge has already been stopped and joined.
    #[error("handle table exhausted")]
    Exhausted,
}
