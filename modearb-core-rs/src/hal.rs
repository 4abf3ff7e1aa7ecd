//! Hardware Abstraction Layer
//!
//! The arbitration engine never touches peripherals. Every external
//! collaborator is reduced to one of these traits:
//! - key input ([`Keypad`])
//! - status LEDs ([`Indicator`])
//! - storage drivers ([`StorageBackend`])
//! - link drivers ([`LinkBackend`])
//! - the host-side transport ([`HostTransport`])
//!
//! All methods take `&self`; drivers keep their own interior state so one
//! instance can be shared between a writer and its reader.
//!
//! # Implementing a backend
//!
//! ```ignore
//! struct Eeprom { bus: I2c }
//!
//! impl StorageBackend for Eeprom {
//!     fn name(&self) -> &'static str { "24c02" }
//!     fn health(&self) -> bool { self.bus.probe_marker() }
//!     // ... write / read over I2C
//! }
//! ```

use std::time::Duration;

use crate::error::Result;
use crate::types::{Frame, KeyEvent, Led};

// ============================================================================
// Input / Output
// ============================================================================

/// Key input scanner
pub trait Keypad: Send + Sync {
    /// Sample the keys once. Returns `KeyEvent::None` when nothing is pressed.
    fn scan(&self) -> KeyEvent;
}

/// Two best-effort status indicators
pub trait Indicator: Send + Sync {
    /// Drive an indicator on or off
    fn set(&self, led: Led, on: bool);

    /// Flip an indicator
    fn toggle(&self, led: Led);
}

// ============================================================================
// Storage
// ============================================================================

/// Storage driver
pub trait StorageBackend: Send + Sync {
    /// Device name for diagnostics
    fn name(&self) -> &'static str;

    /// Presence / identity check
    fn health(&self) -> bool;

    /// Write `bytes` at `offset`
    fn write(&self, offset: u32, bytes: &[u8]) -> Result<()>;

    /// Read `len` bytes from `offset`
    fn read(&self, offset: u32, len: usize) -> Result<Vec<u8>>;
}

// ============================================================================
// Links
// ============================================================================

/// Communication driver
pub trait LinkBackend: Send + Sync {
    /// Link name for diagnostics
    fn name(&self) -> &'static str;

    /// Transmit one message
    fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Check for a received frame (non-blocking)
    fn try_receive(&self) -> Option<Frame>;
}

// ============================================================================
// Host Transport
// ============================================================================

/// Outbound half of the host transport
///
/// The inbound half is [`crate::host::InboundSlot`], which the transport's
/// receive-complete handler fills.
pub trait HostTransport: Send + Sync {
    /// Blocking write with a fixed timeout
    fn write(&self, bytes: &[u8], timeout: Duration) -> Result<()>;
}
