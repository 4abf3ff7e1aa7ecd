//! # modearb: Key-Driven Mode Arbitration
//!
//! Arbitration engine for a node with two interchangeable storage backends
//! (byte-addressable EEPROM, block-addressable flash) and two interchangeable
//! communication links (point-to-point serial, broadcast frame bus). Key
//! presses are the only thing that changes modes.
//!
//! ## Moving Parts
//!
//! ### 1. Event Inbox
//!
//! Single-slot, last-write-wins mailbox fed by the key scanner.
//!
//! ### 2. Arbiter
//!
//! Sole owner of the enablement state. In `HOST` it runs the mode router;
//! in a link mode it routes keys to the link worker in control.
//!
//! ```text
//!  keypad ─► scanner ─► inbox ─► arbiter ─┬─► router (HOST)
//!                                         └─► serial | bus worker
//! ```
//!
//! ### 3. Storage Worker Pairs
//!
//! Writer persists the host payload, reader echoes it back once.
//!
//! ### 4. Link Workers
//!
//! Transmit keys and decode remote frames through one shared transfer
//! buffer, guarded by a lock that clears the buffer on every release.
//!
//! ## Quick Start
//!
//! ```ignore
//! use modearb_core::prelude::*;
//! use modearb_core::sim::SimPlatform;
//!
//! let platform = SimPlatform::new();
//! let node = Node::new(ArbiterConfig::default(), platform.backends())?.spawn();
//!
//! node.post_key(KeyEvent::Wake);
//! node.wait_for(|s| s.control == Control::LinkSerial, Duration::from_secs(1)).await?;
//! ```

// Core modules
pub mod types;
pub mod error;
pub mod config;
pub mod hal;
pub mod inbox;
pub mod buffer;
pub mod gate;
pub mod host;
pub mod router;
pub mod arbiter;
pub mod storage;
pub mod link;
pub mod scanner;
pub mod heartbeat;
pub mod node;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

// Re-exports for convenience
pub use types::*;
pub use error::{Error, Result};
pub use config::{ArbiterConfig, RetryPolicy};
pub use hal::{HostTransport, Indicator, Keypad, LinkBackend, StorageBackend};
pub use inbox::{EventInbox, InboxReceiver};
pub use buffer::{BufferGuard, BufferLock, LockStats, TransferBuffer};
pub use gate::{gate, Gate, GateControl};
pub use host::InboundSlot;
pub use router::{LinkAction, ModeRouter, RouterAction};
pub use arbiter::{Arbiter, ArbiterHandle, ArbiterState, Dispatch, Enablement, RequestKind, Snapshot};
pub use storage::{StorageReader, StorageWriter};
pub use link::{LinkStep, LinkWorker};
pub use scanner::KeyScanner;
pub use heartbeat::Heartbeat;
pub use node::{Backends, Node, NodeHandle};

/// Prelude - commonly used items
pub mod prelude {
    pub use crate::types::*;
    pub use crate::error::Error;
    pub use crate::config::ArbiterConfig;
    pub use crate::arbiter::{ArbiterState, Snapshot};
    pub use crate::node::{Backends, Node, NodeHandle};
    pub use std::time::Duration;
}
