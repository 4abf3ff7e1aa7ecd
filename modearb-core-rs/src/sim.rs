//! Simulated platform
//!
//! In-memory stand-ins for every HAL trait, with fault injection. Used by the
//! tests and by `modearb-node` to run the whole node on a desktop.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::error::{Error, Result};
use crate::hal::{HostTransport, Indicator, Keypad, LinkBackend, StorageBackend};
use crate::node::Backends;
use crate::types::{
    Frame, KeyEvent, Led, LinkKind, StoreKind, BLOCK_STORE_CAPACITY, BLOCK_STORE_JEDEC_ID,
    BYTE_STORE_CAPACITY,
};

/// Value of a cell that was never written (erased)
pub const ERASED: u8 = 0xFF;

// ============================================================================
// Storage
// ============================================================================

#[derive(Debug, Default)]
struct StoreState {
    cells: BTreeMap<u32, u8>,
    healthy: bool,
    jedec_id: Option<u16>,
    fail_checks: u32,
    fail_writes: u32,
    health_checks: u64,
    writes: u64,
    reads: u64,
}

/// Sparse in-memory storage device
#[derive(Debug)]
pub struct MemStore {
    name: &'static str,
    capacity: u32,
    state: Mutex<StoreState>,
}

impl MemStore {
    /// Healthy device of the given size
    pub fn new(name: &'static str, capacity: u32) -> Self {
        Self {
            name,
            capacity,
            state: Mutex::new(StoreState {
                healthy: true,
                ..Default::default()
            }),
        }
    }

    /// 256-byte EEPROM (24C02 class)
    pub fn byte_store() -> Self {
        Self::new("24c02", BYTE_STORE_CAPACITY)
    }

    /// 32 MiB QSPI flash (W25Q256 class). Present while its JEDEC ID matches.
    pub fn block_store() -> Self {
        let store = Self::new("w25q256", BLOCK_STORE_CAPACITY);
        store.state.lock().jedec_id = Some(BLOCK_STORE_JEDEC_ID);
        store
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Plug or unplug the device
    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().healthy = healthy;
    }

    /// Report a different JEDEC ID (block stores only)
    pub fn set_jedec_id(&self, id: u16) {
        self.state.lock().jedec_id = Some(id);
    }

    /// Fail the next `n` health checks
    pub fn fail_next_checks(&self, n: u32) {
        self.state.lock().fail_checks = n;
    }

    /// Fail the next `n` writes
    pub fn fail_next_writes(&self, n: u32) {
        self.state.lock().fail_writes = n;
    }

    /// Raw contents, erased cells included
    pub fn contents(&self, offset: u32, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        (0..len)
            .map(|i| {
                let addr = offset.wrapping_add(i as u32);
                state.cells.get(&addr).copied().unwrap_or(ERASED)
            })
            .collect()
    }

    /// Health checks performed
    pub fn health_checks(&self) -> u64 {
        self.state.lock().health_checks
    }

    /// Successful writes
    pub fn writes(&self) -> u64 {
        self.state.lock().writes
    }

    /// Successful reads
    pub fn reads(&self) -> u64 {
        self.state.lock().reads
    }

    fn check_range(&self, offset: u32, len: usize) -> Result<()> {
        let end = u64::from(offset) + len as u64;
        if end > u64::from(self.capacity) {
            return Err(Error::OutOfRange {
                backend: self.name,
                offset,
                len,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

impl StorageBackend for MemStore {
    fn name(&self) -> &'static str {
        self.name
    }

    fn health(&self) -> bool {
        let mut state = self.state.lock();
        state.health_checks += 1;
        if state.fail_checks > 0 {
            state.fail_checks -= 1;
            return false;
        }
        let identity_ok = state
            .jedec_id
            .map_or(true, |id| id == BLOCK_STORE_JEDEC_ID);
        state.healthy && identity_ok
    }

    fn write(&self, offset: u32, bytes: &[u8]) -> Result<()> {
        self.check_range(offset, bytes.len())?;
        let mut state = self.state.lock();
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(Error::Storage {
                backend: self.name,
                reason: "injected write failure".to_string(),
            });
        }
        for (i, byte) in bytes.iter().enumerate() {
            state.cells.insert(offset + i as u32, *byte);
        }
        state.writes += 1;
        Ok(())
    }

    fn read(&self, offset: u32, len: usize) -> Result<Vec<u8>> {
        self.check_range(offset, len)?;
        self.state.lock().reads += 1;
        Ok(self.contents(offset, len))
    }
}

// ============================================================================
// Links
// ============================================================================

#[derive(Debug, Default)]
struct LinkState {
    sent: Vec<Vec<u8>>,
    fail_sends: u32,
    loss_rate: f64,
    lost: u64,
}

/// One endpoint of a simulated link
///
/// Frames sent on one endpoint of a [`SimLink::pair`] arrive at the other.
#[derive(Debug, Clone)]
pub struct SimLink {
    name: &'static str,
    kind: LinkKind,
    inbound: Arc<Mutex<VecDeque<Frame>>>,
    outbound: Arc<Mutex<VecDeque<Frame>>>,
    state: Arc<Mutex<LinkState>>,
}

impl SimLink {
    /// Connected (local, remote) endpoints
    pub fn pair(kind: LinkKind) -> (SimLink, SimLink) {
        let (local_name, remote_name) = match kind {
            LinkKind::Serial => ("rs485", "rs485-peer"),
            LinkKind::Bus => ("can", "can-peer"),
        };
        let a_to_b = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a = Arc::new(Mutex::new(VecDeque::new()));

        let local = SimLink {
            name: local_name,
            kind,
            inbound: b_to_a.clone(),
            outbound: a_to_b.clone(),
            state: Arc::default(),
        };
        let remote = SimLink {
            name: remote_name,
            kind,
            inbound: a_to_b,
            outbound: b_to_a,
            state: Arc::default(),
        };
        (local, remote)
    }

    /// Drop each delivered frame with probability `rate`
    pub fn with_loss_rate(self, rate: f64) -> Self {
        self.state.lock().loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Which link this endpoint belongs to
    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    /// Fail the next `n` sends
    pub fn fail_sends(&self, n: u32) {
        self.state.lock().fail_sends = n;
    }

    /// Every frame successfully handed to the wire, lost ones included
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    /// Frames dropped by loss injection
    pub fn lost(&self) -> u64 {
        self.state.lock().lost
    }

    /// Place a frame directly in this endpoint's receive queue
    pub fn inject(&self, bytes: &[u8]) -> Result<()> {
        let frame = self.frame(bytes)?;
        self.inbound.lock().push_back(frame);
        Ok(())
    }

    /// Frames waiting to be received on this endpoint
    pub fn pending(&self) -> usize {
        self.inbound.lock().len()
    }

    fn frame(&self, bytes: &[u8]) -> Result<Frame> {
        Frame::from_slice(bytes).map_err(|_| Error::Transmit {
            link: self.name,
            reason: format!("{} bytes exceed frame capacity", bytes.len()),
        })
    }
}

impl LinkBackend for SimLink {
    fn name(&self) -> &'static str {
        self.name
    }

    fn send(&self, bytes: &[u8]) -> Result<()> {
        let frame = self.frame(bytes)?;
        let mut state = self.state.lock();
        if state.fail_sends > 0 {
            state.fail_sends -= 1;
            return Err(Error::Transmit {
                link: self.name,
                reason: "injected send failure".to_string(),
            });
        }
        state.sent.push(bytes.to_vec());

        if state.loss_rate > 0.0 && rand::thread_rng().gen::<f64>() < state.loss_rate {
            state.lost += 1;
            return Ok(());
        }
        drop(state);

        self.outbound.lock().push_back(frame);
        Ok(())
    }

    fn try_receive(&self) -> Option<Frame> {
        self.inbound.lock().pop_front()
    }
}

// ============================================================================
// Indicators
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct LedState {
    on: bool,
    toggles: u32,
}

/// Indicator that remembers what was done to it
#[derive(Debug, Default)]
pub struct RecordingIndicator {
    leds: Mutex<[LedState; 2]>,
}

impl RecordingIndicator {
    /// Both LEDs off
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn is_on(&self, led: Led) -> bool {
        self.leds.lock()[led.index()].on
    }

    /// Number of toggles so far
    pub fn toggles(&self, led: Led) -> u32 {
        self.leds.lock()[led.index()].toggles
    }
}

impl Indicator for RecordingIndicator {
    fn set(&self, led: Led, on: bool) {
        self.leds.lock()[led.index()].on = on;
    }

    fn toggle(&self, led: Led) {
        let mut leds = self.leds.lock();
        let state = &mut leds[led.index()];
        state.on = !state.on;
        state.toggles += 1;
    }
}

// ============================================================================
// Host transport
// ============================================================================

#[derive(Debug, Default)]
struct TransportState {
    outbound: Vec<Vec<u8>>,
    fail_writes: u32,
}

/// Host transport that collects everything written to it
#[derive(Debug, Default)]
pub struct MemTransport {
    state: Mutex<TransportState>,
}

impl MemTransport {
    /// Empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    pub fn outbound(&self) -> Vec<Vec<u8>> {
        self.state.lock().outbound.clone()
    }

    /// Most recent write
    pub fn last(&self) -> Option<Vec<u8>> {
        self.state.lock().outbound.last().cloned()
    }

    /// Time out the next `n` writes
    pub fn fail_next_writes(&self, n: u32) {
        self.state.lock().fail_writes = n;
    }
}

impl HostTransport for MemTransport {
    fn write(&self, bytes: &[u8], timeout: Duration) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(Error::Host(format!("timed out after {:?}", timeout)));
        }
        state.outbound.push(bytes.to_vec());
        Ok(())
    }
}

// ============================================================================
// Keypad
// ============================================================================

/// Keypad that replays a queue of presses, one per scan
#[derive(Debug, Default)]
pub struct ScriptedKeypad {
    keys: Mutex<VecDeque<KeyEvent>>,
}

impl ScriptedKeypad {
    /// Keypad that will report `keys` in order
    pub fn new(keys: impl IntoIterator<Item = KeyEvent>) -> Self {
        Self {
            keys: Mutex::new(keys.into_iter().collect()),
        }
    }

    /// Queue another press
    pub fn push(&self, key: KeyEvent) {
        self.keys.lock().push_back(key);
    }

    /// Presses not yet scanned
    pub fn remaining(&self) -> usize {
        self.keys.lock().len()
    }
}

impl Keypad for ScriptedKeypad {
    fn scan(&self) -> KeyEvent {
        self.keys.lock().pop_front().unwrap_or_default()
    }
}

// ============================================================================
// Whole platform
// ============================================================================

/// A complete simulated board plus the remote ends of both links
#[derive(Debug, Clone)]
pub struct SimPlatform {
    /// Key input
    pub keypad: Arc<ScriptedKeypad>,
    /// LED0 / LED1
    pub leds: Arc<RecordingIndicator>,
    /// Byte store (EEPROM)
    pub byte_store: Arc<MemStore>,
    /// Block store (flash)
    pub block_store: Arc<MemStore>,
    /// Host transport
    pub host: Arc<MemTransport>,
    /// Node ends of the links, indexed by [`LinkKind::index`]
    pub links: [SimLink; 2],
    /// Peer ends of the links, indexed by [`LinkKind::index`]
    pub peers: [SimLink; 2],
}

impl SimPlatform {
    /// Healthy devices, empty queues
    pub fn new() -> Self {
        let (serial, serial_peer) = SimLink::pair(LinkKind::Serial);
        let (bus, bus_peer) = SimLink::pair(LinkKind::Bus);
        Self {
            keypad: Arc::new(ScriptedKeypad::default()),
            leds: Arc::new(RecordingIndicator::new()),
            byte_store: Arc::new(MemStore::byte_store()),
            block_store: Arc::new(MemStore::block_store()),
            host: Arc::new(MemTransport::new()),
            links: [serial, bus],
            peers: [serial_peer, bus_peer],
        }
    }

    /// Store backing `kind`
    pub fn store(&self, kind: StoreKind) -> &Arc<MemStore> {
        match kind {
            StoreKind::Byte => &self.byte_store,
            StoreKind::Block => &self.block_store,
        }
    }

    /// Node end of a link
    pub fn link(&self, kind: LinkKind) -> &SimLink {
        &self.links[kind.index()]
    }

    /// Peer end of a link
    pub fn peer(&self, kind: LinkKind) -> &SimLink {
        &self.peers[kind.index()]
    }

    /// Drivers for [`crate::node::Node::new`]
    pub fn backends(&self) -> Backends {
        Backends {
            keypad: self.keypad.clone(),
            indicator: self.leds.clone(),
            stores: [self.byte_store.clone(), self.block_store.clone()],
            links: [
                Arc::new(self.links[0].clone()),
                Arc::new(self.links[1].clone()),
            ],
            host: self.host.clone(),
        }
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BLOCK_STORE_OFFSET;

    #[test]
    fn test_mem_store_range() {
        let store = MemStore::byte_store();
        assert_eq!(store.capacity(), BYTE_STORE_CAPACITY);
        store.write(0, &[1, 2, 3]).unwrap();
        assert_eq!(store.read(0, 4).unwrap(), vec![1, 2, 3, ERASED]);

        let err = store.write(250, &[0; 16]).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { capacity: 256, .. }));
    }

    #[test]
    fn test_block_store_tail_offset() {
        let store = MemStore::block_store();
        assert!(store.health());
        store.write(BLOCK_STORE_OFFSET, &[0xAB; 16]).unwrap();
        assert_eq!(store.contents(BLOCK_STORE_OFFSET, 16), vec![0xAB; 16]);

        store.set_jedec_id(0x1234);
        assert!(!store.health());
    }

    #[test]
    fn test_injected_health_failures() {
        let store = MemStore::byte_store();
        store.fail_next_checks(2);
        assert!(!store.health());
        assert!(!store.health());
        assert!(store.health());
        assert_eq!(store.health_checks(), 3);
    }

    #[test]
    fn test_link_pair_delivers() {
        let (local, remote) = SimLink::pair(LinkKind::Bus);
        assert_eq!(remote.kind(), LinkKind::Bus);
        local.send(&[3, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        let frame = remote.try_receive().unwrap();
        assert_eq!(frame.len(), 8);
        assert_eq!(frame[0], 3);
        assert!(local.try_receive().is_none());
        assert_eq!(local.sent().len(), 1);

        local.inject(&[4]).unwrap();
        assert_eq!(local.try_receive().unwrap().as_slice(), &[4]);
    }

    #[test]
    fn test_link_failures() {
        let (local, remote) = SimLink::pair(LinkKind::Serial);
        local.fail_sends(1);
        assert!(matches!(local.send(&[1]), Err(Error::Transmit { .. })));
        local.send(&[1]).unwrap();
        assert_eq!(remote.pending(), 1);

        assert!(local.send(&[0; 17]).is_err());

        let (lossy, peer) = SimLink::pair(LinkKind::Serial);
        let lossy = lossy.with_loss_rate(1.0);
        lossy.send(&[2]).unwrap();
        assert_eq!(peer.pending(), 0);
        assert_eq!(lossy.lost(), 1);
    }

    #[test]
    fn test_recording_indicator() {
        let leds = RecordingIndicator::new();
        leds.toggle(Led::Led1);
        assert!(leds.is_on(Led::Led1));
        leds.set(Led::Led1, false);
        assert!(!leds.is_on(Led::Led1));
        assert_eq!(leds.toggles(Led::Led1), 1);
        assert_eq!(leds.toggles(Led::Led0), 0);
    }

    #[test]
    fn test_scripted_keypad() {
        let keypad = ScriptedKeypad::new([KeyEvent::Wake]);
        keypad.push(KeyEvent::Two);
        assert_eq!(keypad.scan(), KeyEvent::Wake);
        assert_eq!(keypad.scan(), KeyEvent::Two);
        assert_eq!(keypad.scan(), KeyEvent::None);
    }
}
