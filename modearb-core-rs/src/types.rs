//! Base types and device constants
//!
//! Everything the workers exchange is small and `Copy`: key codes, backend
//! selectors, the control state and worker identities.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Size of the host payload and of the shared transfer buffer
pub const PAYLOAD_LEN: usize = 16;

/// Largest frame a link backend hands back
pub const FRAME_CAPACITY: usize = PAYLOAD_LEN;

/// Byte-addressable store (24C02-class EEPROM) capacity in bytes
pub const BYTE_STORE_CAPACITY: u32 = 256;

/// Payload offset inside the byte store
pub const BYTE_STORE_OFFSET: u32 = 0;

/// Block-addressable store (W25Q256-class flash) capacity in bytes
pub const BLOCK_STORE_CAPACITY: u32 = 32 * 1024 * 1024;

/// Payload offset inside the block store (near the end of the device)
pub const BLOCK_STORE_OFFSET: u32 = BLOCK_STORE_CAPACITY - 100;

/// JEDEC ID the block store must report to be considered present
pub const BLOCK_STORE_JEDEC_ID: u16 = 0xEF18;

/// Bytes transmitted per key on the serial link
pub const SERIAL_FRAME_LEN: usize = 1;

/// Bytes transmitted per key on the frame bus (one classic 8-byte frame)
pub const BUS_FRAME_LEN: usize = 8;

// ============================================================================
// Basic Types
// ============================================================================

/// Host payload
pub type Payload = [u8; PAYLOAD_LEN];

/// Frame received from a link backend
pub type Frame = heapless::Vec<u8, FRAME_CAPACITY>;

// ============================================================================
// Key Events
// ============================================================================

/// Key code produced by the input scanner
///
/// The discriminant is also the wire code a link worker transmits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum KeyEvent {
    /// No key pressed
    #[default]
    None = 0,
    /// KEY0: select the byte store
    Zero = 1,
    /// KEY1: select the block store
    One = 2,
    /// KEY2: swap links (only meaningful inside a link mode)
    Two = 3,
    /// WK_UP: enter / leave link mode
    Wake = 4,
}

impl KeyEvent {
    /// All keys a scanner can report
    pub const PRESSED: [KeyEvent; 4] = [KeyEvent::Zero, KeyEvent::One, KeyEvent::Two, KeyEvent::Wake];

    /// Wire code of this key
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire code. Unknown codes yield `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(KeyEvent::None),
            1 => Some(KeyEvent::Zero),
            2 => Some(KeyEvent::One),
            3 => Some(KeyEvent::Two),
            4 => Some(KeyEvent::Wake),
            _ => None,
        }
    }

    /// True for the "no key" code
    pub const fn is_none(self) -> bool {
        matches!(self, KeyEvent::None)
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyEvent::None => write!(f, "NONE"),
            KeyEvent::Zero => write!(f, "ZERO"),
            KeyEvent::One => write!(f, "ONE"),
            KeyEvent::Two => write!(f, "TWO"),
            KeyEvent::Wake => write!(f, "WAKE"),
        }
    }
}

impl FromStr for KeyEvent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "zero" | "key0" => Ok(KeyEvent::Zero),
            "1" | "one" | "key1" => Ok(KeyEvent::One),
            "2" | "two" | "key2" => Ok(KeyEvent::Two),
            "w" | "wake" | "wkup" => Ok(KeyEvent::Wake),
            "none" => Ok(KeyEvent::None),
            other => Err(Error::Config(format!("unknown key '{}'", other))),
        }
    }
}

// ============================================================================
// Backend Selectors
// ============================================================================

/// Storage backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Byte-addressable store (EEPROM over I2C)
    Byte,
    /// Block-addressable store (flash over QSPI)
    Block,
}

impl StoreKind {
    /// Both stores, indexable by [`StoreKind::index`]
    pub const ALL: [StoreKind; 2] = [StoreKind::Byte, StoreKind::Block];

    /// Fixed payload offset
    pub const fn offset(self) -> u32 {
        match self {
            StoreKind::Byte => BYTE_STORE_OFFSET,
            StoreKind::Block => BLOCK_STORE_OFFSET,
        }
    }

    /// The other store
    pub const fn other(self) -> Self {
        match self {
            StoreKind::Byte => StoreKind::Block,
            StoreKind::Block => StoreKind::Byte,
        }
    }

    /// Array index
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Byte => write!(f, "byte-store"),
            StoreKind::Block => write!(f, "block-store"),
        }
    }
}

/// Link backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Point-to-point serial link (RS-485)
    Serial,
    /// Broadcast frame bus (CAN)
    Bus,
}

impl LinkKind {
    /// Both links, indexable by [`LinkKind::index`]
    pub const ALL: [LinkKind; 2] = [LinkKind::Serial, LinkKind::Bus];

    /// The link a TWO key hands over to
    pub const fn other(self) -> Self {
        match self {
            LinkKind::Serial => LinkKind::Bus,
            LinkKind::Bus => LinkKind::Serial,
        }
    }

    /// Bytes transmitted per key
    pub const fn frame_len(self) -> usize {
        match self {
            LinkKind::Serial => SERIAL_FRAME_LEN,
            LinkKind::Bus => BUS_FRAME_LEN,
        }
    }

    /// Array index
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Serial => write!(f, "serial"),
            LinkKind::Bus => write!(f, "bus"),
        }
    }
}

// ============================================================================
// Control State
// ============================================================================

/// Who owns link arbitration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Control {
    /// Mode router processes keys
    #[default]
    Host,
    /// Serial link worker owns the inbox
    LinkSerial,
    /// Bus link worker owns the inbox
    LinkBus,
}

impl Control {
    /// Control state for an active link
    pub const fn from_link(link: LinkKind) -> Self {
        match link {
            LinkKind::Serial => Control::LinkSerial,
            LinkKind::Bus => Control::LinkBus,
        }
    }

    /// Active link, if any
    pub const fn link(self) -> Option<LinkKind> {
        match self {
            Control::Host => None,
            Control::LinkSerial => Some(LinkKind::Serial),
            Control::LinkBus => Some(LinkKind::Bus),
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::Host => write!(f, "HOST"),
            Control::LinkSerial => write!(f, "LINK_SERIAL"),
            Control::LinkBus => write!(f, "LINK_BUS"),
        }
    }
}

// ============================================================================
// Workers
// ============================================================================

/// Identity of every task on the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerId {
    /// Key scanner
    Scanner,
    /// Arbiter (runs the mode router)
    Router,
    /// Link worker
    Link(LinkKind),
    /// Storage writer
    Writer(StoreKind),
    /// Storage reader
    Reader(StoreKind),
    /// Liveness blink
    Heartbeat,
}

impl WorkerId {
    /// Static priority (lower is more urgent). Informational only.
    pub const fn priority(self) -> u8 {
        match self {
            WorkerId::Scanner => 1,
            WorkerId::Router => 2,
            WorkerId::Link(LinkKind::Serial) => 3,
            WorkerId::Link(LinkKind::Bus) => 4,
            WorkerId::Reader(StoreKind::Byte) => 5,
            WorkerId::Writer(StoreKind::Byte) => 6,
            WorkerId::Reader(StoreKind::Block) => 7,
            WorkerId::Writer(StoreKind::Block) => 8,
            WorkerId::Heartbeat => 9,
        }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerId::Scanner => write!(f, "scanner"),
            WorkerId::Router => write!(f, "router"),
            WorkerId::Link(link) => write!(f, "{}-link", link),
            WorkerId::Writer(store) => write!(f, "{}-writer", store),
            WorkerId::Reader(store) => write!(f, "{}-reader", store),
            WorkerId::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// Status indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Led {
    /// LED0 (also the liveness blink)
    Led0,
    /// LED1
    Led1,
}

impl Led {
    /// Both indicators, indexable by [`Led::index`]
    pub const ALL: [Led; 2] = [Led::Led0, Led::Led1];

    /// Array index
    pub const fn index(self) -> usize {
        self as usize
    }
}
