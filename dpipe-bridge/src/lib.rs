//! Bidirectional byte-stream bridge between a worker thread and an
//! external handle.
//!
//! A bridge pairs two bounded [`ByteChannel`]s — one per direction — into
//! a [`StdioRedirect`] the worker thread reads and writes like stdio,
//! while external callers drive the other ends through a
//! [`BridgeHandle`]: `read`, `write`, `poll`, `interrupt`, `close`. A
//! shared monotonic done flag ties the two directions together so that
//! whichever side disappears first, everyone blocked on either channel
//! wakes and observes shutdown.
//!
//! # Example
//!
//! ```
//! use dpipe_bridge::{Bridge, IoMode};
//!
//! let handle = Bridge::new("shouter")
//!     .spawn(|stdio| {
//!         let mut line = [0u8; 128];
//!         while let Ok(n) = stdio.read_line(&mut line) {
//!             let upper = line[..n].to_ascii_uppercase();
//!             stdio.write(&upper, IoMode::Blocking);
//!         }
//!     })
//!     .unwrap();
//!
//! handle.write(b"make it loud\n", IoMode::Blocking).unwrap();
//!
//! let mut out = [0u8; 128];
//! let n = handle.read(&mut out, IoMode::Blocking).unwrap();
//! assert_eq!(&out[..n], b"MAKE IT LOUD\n");
//!
//! handle.close();
//! ```
//!
//! This is not a general IPC transport: each bridge carries exactly one
//! worker-to-handle and one handle-to-worker byte stream with a fixed
//! capacity bound, not multi-producer fan-out. State is purely in-memory
//! and process-local.

#![warn(missing_docs)]

mod channel;
mod error;
mod handle;
mod redirect;
mod registry;
mod thread;

pub use channel::{ByteChannel, IoMode, DEFAULT_CAPACITY};
pub use error::{BridgeError, SpawnError};
pub use handle::{AccessMode, Bridge, BridgeHandle, BridgeState, Readiness};
pub use redirect::StdioRedirect;
pub use registry::{HandleId, HandleTable};
