//! Arbiter: the single owner of all enablement state
//!
//! Workers never flip each other's enable flags. They send a [`Request`] and
//! wait for the acknowledgment; the arbiter applies it to [`ArbiterState`],
//! recomputes every gate and publishes a [`Snapshot`].
//!
//! Key routing:
//! - the arbiter is the only consumer of the [`EventInbox`]
//! - in `HOST` a key drives the [`ModeRouter`]
//! - in a link state the key is routed to exactly the link worker in
//!   control, over a capacity-1 channel (dropped when full)
//! - while that worker is completing a handoff, further keys are dropped
//!
//! Dropped keys are accepted loss; the operator presses again.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::gate::{gate, Gate, GateControl};
use crate::inbox::{EventInbox, InboxReceiver};
use crate::router::{LinkAction, ModeRouter, RouterAction};
use crate::types::{Control, KeyEvent, LinkKind, StoreKind};

/// Depth of the worker request queue
const REQUEST_QUEUE: usize = 16;

// ============================================================================
// Enablement
// ============================================================================

/// Which workers may run right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Enablement {
    /// Mode router processes new keys
    pub router: bool,
    /// Storage writers, indexed by [`StoreKind::index`]
    pub writers: [bool; 2],
    /// Storage readers, indexed by [`StoreKind::index`]
    pub readers: [bool; 2],
    /// Link workers, indexed by [`LinkKind::index`]
    pub links: [bool; 2],
}

impl Enablement {
    /// Writer gate
    pub fn writer(&self, store: StoreKind) -> bool {
        self.writers[store.index()]
    }

    /// Reader gate
    pub fn reader(&self, store: StoreKind) -> bool {
        self.readers[store.index()]
    }

    /// Link gate
    pub fn link(&self, link: LinkKind) -> bool {
        self.links[link.index()]
    }

    /// Storage pairs with at least one worker enabled
    pub fn store_pairs_enabled(&self) -> usize {
        StoreKind::ALL
            .iter()
            .filter(|s| self.writer(**s) || self.reader(**s))
            .count()
    }

    /// Parties in control of link arbitration (router, serial, bus)
    pub fn controllers(&self) -> usize {
        usize::from(self.router) + self.links.iter().filter(|l| **l).count()
    }
}

// ============================================================================
// Messages
// ============================================================================

/// What a worker asks the arbiter to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Writer persisted a payload: arm its reader
    WriteComplete(StoreKind),
    /// Reader forwarded the payload: disarm itself
    ReadComplete(StoreKind),
    /// Link worker finished the handoff it was routed
    LinkReleased(LinkKind),
    /// Storage worker gave up on its backend: close the pair until the
    /// router selects it again
    Unavailable(StoreKind),
}

/// Request plus acknowledgment channel
#[derive(Debug)]
pub struct Request {
    /// Requested change
    pub kind: RequestKind,
    ack: oneshot::Sender<Result<()>>,
}

/// Key routed to the link worker in control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routed {
    /// Key to transmit
    pub key: KeyEvent,
    /// What the worker does afterwards
    pub action: LinkAction,
}

/// Where a key went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handled by the router
    Router(RouterAction),
    /// To be routed to a link worker
    Forward {
        /// Worker in control
        link: LinkKind,
        /// Key to transmit
        key: KeyEvent,
        /// Follow-up action
        action: LinkAction,
    },
    /// Dropped (handoff in flight)
    Dropped,
}

/// Observable arbiter state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Snapshot {
    /// Who owns link arbitration
    pub control: Control,
    /// Active storage pair
    pub store: Option<StoreKind>,
    /// Worker gates
    pub enabled: Enablement,
    /// Pairs given up on, indexed by [`StoreKind::index`]
    pub unavailable: [bool; 2],
    /// A link worker is completing a handoff
    pub handoff_pending: bool,
    /// Keys handed to a worker (router or link)
    pub keys_routed: u64,
    /// Keys dropped on the way
    pub keys_dropped: u64,
}

// ============================================================================
// Arbiter State
// ============================================================================

/// Complete enablement state, owned by the arbiter task
#[derive(Debug, Clone, Default)]
pub struct ArbiterState {
    router: ModeRouter,
    armed: [bool; 2],
    unavailable: [bool; 2],
    pending: Option<(LinkKind, LinkAction)>,
    keys_routed: u64,
    keys_dropped: u64,
}

impl ArbiterState {
    /// HOST, no storage pair, nothing armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Router state
    pub fn router(&self) -> &ModeRouter {
        &self.router
    }

    /// Who owns link arbitration
    pub fn control(&self) -> Control {
        self.router.control()
    }

    /// Decide where a key goes.
    ///
    /// Router keys are applied immediately. A forwarded key only counts once
    /// the caller confirms delivery with [`ArbiterState::forwarded`].
    pub fn on_key(&mut self, key: KeyEvent) -> Dispatch {
        if key.is_none() {
            return Dispatch::Router(RouterAction::Ignore);
        }

        match self.router.control().link() {
            None => {
                self.keys_routed += 1;
                let action = self.router.on_host_key(key);
                if let RouterAction::SelectStore(store) = action {
                    // a deselected reader waits for a fresh write
                    self.armed[store.other().index()] = false;
                    self.unavailable[store.index()] = false;
                }
                Dispatch::Router(action)
            }
            Some(_) if self.pending.is_some() => {
                self.keys_dropped += 1;
                Dispatch::Dropped
            }
            Some(link) => Dispatch::Forward {
                link,
                key,
                action: ModeRouter::link_action(link, key),
            },
        }
    }

    /// A forwarded key reached its worker
    pub fn forwarded(&mut self, link: LinkKind, action: LinkAction) {
        self.keys_routed += 1;
        if action.releases() {
            self.pending = Some((link, action));
        }
    }

    /// A forwarded key could not be delivered
    pub fn dropped(&mut self) {
        self.keys_dropped += 1;
    }

    /// Apply a worker request
    pub fn on_request(&mut self, kind: RequestKind) -> Result<()> {
        match kind {
            RequestKind::WriteComplete(store) => {
                if self.router.store() == Some(store) {
                    self.armed[store.index()] = true;
                } else {
                    debug!("{} write completed after deselection", store);
                }
                Ok(())
            }
            RequestKind::ReadComplete(store) => {
                self.armed[store.index()] = false;
                Ok(())
            }
            RequestKind::Unavailable(store) => {
                self.unavailable[store.index()] = true;
                Ok(())
            }
            RequestKind::LinkReleased(link) => match self.pending {
                Some((pending, action)) if pending == link => {
                    self.pending = None;
                    self.router.apply_link(link, action).map(|_| ())
                }
                _ => Err(Error::NotInControl {
                    link,
                    control: self.router.control(),
                }),
            },
        }
    }

    /// Gates implied by the current state
    pub fn enablement(&self) -> Enablement {
        let control = self.router.control();
        let mut enabled = Enablement {
            router: control == Control::Host,
            ..Default::default()
        };

        if let Some(store) = self.router.store().filter(|s| !self.unavailable[s.index()]) {
            enabled.writers[store.index()] = true;
            enabled.readers[store.index()] = self.armed[store.index()];
        }
        if let Some(link) = control.link() {
            enabled.links[link.index()] = true;
        }
        enabled
    }

    /// True when a reader has a write waiting to be read back
    pub fn reader_armed(&self, store: StoreKind) -> bool {
        self.armed[store.index()]
    }

    /// Observable state
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            control: self.router.control(),
            store: self.router.store(),
            enabled: self.enablement(),
            unavailable: self.unavailable,
            handoff_pending: self.pending.is_some(),
            keys_routed: self.keys_routed,
            keys_dropped: self.keys_dropped,
        }
    }
}

// ============================================================================
// Worker-side handle
// ============================================================================

/// Cloneable request channel into the arbiter
#[derive(Debug, Clone)]
pub struct ArbiterHandle {
    tx: mpsc::Sender<Request>,
}

impl ArbiterHandle {
    /// Send a request and wait until the arbiter has applied it
    pub async fn request(&self, kind: RequestKind) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Request { kind, ack })
            .await
            .map_err(|_| Error::Closed)?;
        done.await.map_err(|_| Error::Closed)?
    }
}

/// Gates for one storage pair
#[derive(Debug)]
pub struct StoragePorts {
    /// Writer gate
    pub writer: Gate,
    /// Reader gate
    pub reader: Gate,
}

/// Gate and key channel for one link worker
#[derive(Debug)]
pub struct LinkPorts {
    /// Link gate
    pub gate: Gate,
    /// Routed keys
    pub keys: mpsc::Receiver<Routed>,
}

/// Everything the workers need from the arbiter
#[derive(Debug)]
pub struct ArbiterPorts {
    /// Request channel
    pub handle: ArbiterHandle,
    /// Published snapshots
    pub snapshots: watch::Receiver<Snapshot>,
    /// Indexed by [`StoreKind::index`]
    pub storage: [StoragePorts; 2],
    /// Indexed by [`LinkKind::index`]
    pub links: [LinkPorts; 2],
}

// ============================================================================
// Arbiter task
// ============================================================================

/// Arbiter task
pub struct Arbiter {
    state: ArbiterState,
    inbox: InboxReceiver,
    inbox_timeout: std::time::Duration,
    requests: mpsc::Receiver<Request>,
    writers: [GateControl; 2],
    readers: [GateControl; 2],
    links: [GateControl; 2],
    routed: [mpsc::Sender<Routed>; 2],
    snapshots: watch::Sender<Snapshot>,
}

impl Arbiter {
    /// Subscribe to the inbox and create every worker port
    pub fn new(inbox: &EventInbox, inbox_timeout: std::time::Duration) -> (Self, ArbiterPorts) {
        let state = ArbiterState::new();
        let (req_tx, requests) = mpsc::channel(REQUEST_QUEUE);
        let (snap_tx, snap_rx) = watch::channel(state.snapshot());

        let (byte_writer, byte_writer_gate) = gate(false);
        let (byte_reader, byte_reader_gate) = gate(false);
        let (block_writer, block_writer_gate) = gate(false);
        let (block_reader, block_reader_gate) = gate(false);
        let (serial, serial_gate) = gate(false);
        let (bus, bus_gate) = gate(false);
        let (serial_tx, serial_keys) = mpsc::channel(1);
        let (bus_tx, bus_keys) = mpsc::channel(1);

        let arbiter = Self {
            state,
            inbox: inbox.subscribe(),
            inbox_timeout,
            requests,
            writers: [byte_writer, block_writer],
            readers: [byte_reader, block_reader],
            links: [serial, bus],
            routed: [serial_tx, bus_tx],
            snapshots: snap_tx,
        };

        let ports = ArbiterPorts {
            handle: ArbiterHandle { tx: req_tx },
            snapshots: snap_rx,
            storage: [
                StoragePorts {
                    writer: byte_writer_gate,
                    reader: byte_reader_gate,
                },
                StoragePorts {
                    writer: block_writer_gate,
                    reader: block_reader_gate,
                },
            ],
            links: [
                LinkPorts {
                    gate: serial_gate,
                    keys: serial_keys,
                },
                LinkPorts {
                    gate: bus_gate,
                    keys: bus_keys,
                },
            ],
        };

        (arbiter, ports)
    }

    /// Current state
    pub fn state(&self) -> &ArbiterState {
        &self.state
    }

    /// Route keys and apply requests until the inbox goes away
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                key = self.inbox.receive(self.inbox_timeout) => match key {
                    Ok(Some(key)) => self.dispatch(key),
                    Ok(None) => {}
                    Err(Error::Closed) => return Ok(()),
                    Err(e) => return Err(e),
                },
                Some(request) = self.requests.recv() => self.handle(request),
            }
        }
    }

    /// Route one key
    pub fn dispatch(&mut self, key: KeyEvent) {
        match self.state.on_key(key) {
            Dispatch::Router(action) => {
                debug!("router: {} -> {:?}", key, action);
            }
            Dispatch::Forward { link, key, action } => {
                match self.routed[link.index()].try_send(Routed { key, action }) {
                    Ok(()) => self.state.forwarded(link, action),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("{} busy, dropping {}", link, key);
                        self.state.dropped();
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        warn!("{} worker gone, dropping {}", link, key);
                        self.state.dropped();
                    }
                }
            }
            Dispatch::Dropped => {
                debug!("handoff in flight, dropping {}", key);
            }
        }
        self.sync();
    }

    /// Apply one worker request and acknowledge it
    pub fn handle(&mut self, request: Request) {
        let result = self.state.on_request(request.kind);
        if let Err(e) = &result {
            warn!("rejected {:?}: {}", request.kind, e);
        }
        self.sync();
        let _ = request.ack.send(result);
    }

    fn sync(&mut self) {
        let enabled = self.state.enablement();
        for store in StoreKind::ALL {
            self.writers[store.index()].set(enabled.writer(store));
            self.readers[store.index()].set(enabled.reader(store));
        }
        for link in LinkKind::ALL {
            self.links[link.index()].set(enabled.link(link));
        }
        self.snapshots.send_replace(self.state.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(state: &mut ArbiterState, key: KeyEvent) -> Dispatch {
        let dispatch = state.on_key(key);
        if let Dispatch::Forward { link, action, .. } = dispatch {
            state.forwarded(link, action);
            if action.releases() {
                state.on_request(RequestKind::LinkReleased(link)).unwrap();
            }
        }
        dispatch
    }

    #[test]
    fn test_zero_swaps_active_pair() {
        let mut state = ArbiterState::new();
        walk(&mut state, KeyEvent::One);
        assert!(state.enablement().writer(StoreKind::Block));

        walk(&mut state, KeyEvent::Zero);
        let enabled = state.enablement();
        assert!(enabled.writer(StoreKind::Byte));
        assert!(!enabled.writer(StoreKind::Block));
        assert!(!enabled.reader(StoreKind::Block));
        assert_eq!(state.control(), Control::Host);
        assert!(enabled.router);
    }

    #[test]
    fn test_reader_armed_by_writer_only() {
        let mut state = ArbiterState::new();
        walk(&mut state, KeyEvent::Zero);
        assert!(!state.enablement().reader(StoreKind::Byte));

        state.on_request(RequestKind::WriteComplete(StoreKind::Byte)).unwrap();
        assert!(state.enablement().reader(StoreKind::Byte));

        state.on_request(RequestKind::ReadComplete(StoreKind::Byte)).unwrap();
        assert!(!state.enablement().reader(StoreKind::Byte));
    }

    #[test]
    fn test_reselected_reader_needs_new_write() {
        let mut state = ArbiterState::new();
        walk(&mut state, KeyEvent::Zero);
        state.on_request(RequestKind::WriteComplete(StoreKind::Byte)).unwrap();

        walk(&mut state, KeyEvent::One);
        assert!(!state.enablement().reader(StoreKind::Byte));

        walk(&mut state, KeyEvent::Zero);
        assert!(state.enablement().writer(StoreKind::Byte));
        assert!(!state.enablement().reader(StoreKind::Byte));
        assert!(!state.reader_armed(StoreKind::Byte));
    }

    #[test]
    fn test_repeated_select_keeps_reader_armed() {
        let mut state = ArbiterState::new();
        walk(&mut state, KeyEvent::One);
        state.on_request(RequestKind::WriteComplete(StoreKind::Block)).unwrap();

        walk(&mut state, KeyEvent::One);
        assert!(state.enablement().reader(StoreKind::Block));
    }

    #[test]
    fn test_unavailable_pair_closed_until_reselected() {
        let mut state = ArbiterState::new();
        walk(&mut state, KeyEvent::One);
        state.on_request(RequestKind::Unavailable(StoreKind::Block)).unwrap();

        let snap = state.snapshot();
        assert_eq!(snap.store, Some(StoreKind::Block));
        assert!(snap.unavailable[StoreKind::Block.index()]);
        assert!(!snap.enabled.writer(StoreKind::Block));
        assert_eq!(snap.enabled.store_pairs_enabled(), 0);

        walk(&mut state, KeyEvent::One);
        let snap = state.snapshot();
        assert!(!snap.unavailable[StoreKind::Block.index()]);
        assert!(snap.enabled.writer(StoreKind::Block));
    }

    #[test]
    fn test_stale_write_does_not_arm() {
        let mut state = ArbiterState::new();
        walk(&mut state, KeyEvent::One);
        state.on_request(RequestKind::WriteComplete(StoreKind::Byte)).unwrap();
        assert!(!state.reader_armed(StoreKind::Byte));
    }

    #[test]
    fn test_wake_routes_to_serial() {
        let mut state = ArbiterState::new();
        walk(&mut state, KeyEvent::Wake);

        let enabled = state.enablement();
        assert_eq!(state.control(), Control::LinkSerial);
        assert!(!enabled.router);
        assert!(enabled.link(LinkKind::Serial));
        assert_eq!(enabled.controllers(), 1);

        // storage keys now go to the link worker, not the router
        let dispatch = state.on_key(KeyEvent::Zero);
        assert_eq!(
            dispatch,
            Dispatch::Forward {
                link: LinkKind::Serial,
                key: KeyEvent::Zero,
                action: LinkAction::Stay
            }
        );
        assert_eq!(state.router().store(), None);
    }

    #[test]
    fn test_keys_dropped_during_handoff() {
        let mut state = ArbiterState::new();
        walk(&mut state, KeyEvent::Wake);

        let Dispatch::Forward { link, action, .. } = state.on_key(KeyEvent::Two) else {
            panic!("expected forward");
        };
        state.forwarded(link, action);
        assert!(state.snapshot().handoff_pending);

        assert_eq!(state.on_key(KeyEvent::Wake), Dispatch::Dropped);

        state.on_request(RequestKind::LinkReleased(LinkKind::Serial)).unwrap();
        assert_eq!(state.control(), Control::LinkBus);
        assert_eq!(state.snapshot().keys_dropped, 1);
    }

    #[test]
    fn test_release_without_handoff_rejected() {
        let mut state = ArbiterState::new();
        walk(&mut state, KeyEvent::Wake);
        let err = state.on_request(RequestKind::LinkReleased(LinkKind::Bus)).unwrap_err();
        assert!(matches!(err, Error::NotInControl { .. }));
        assert_eq!(state.control(), Control::LinkSerial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arbiter_routes_and_gates() {
        let inbox = EventInbox::new();
        let (mut arbiter, mut ports) = Arbiter::new(&inbox, std::time::Duration::from_millis(10));

        arbiter.dispatch(KeyEvent::Wake);
        assert!(ports.links[LinkKind::Serial.index()].gate.is_enabled());

        arbiter.dispatch(KeyEvent::Two);
        let routed = ports.links[LinkKind::Serial.index()].keys.try_recv().unwrap();
        assert_eq!(routed.action, LinkAction::Handoff(LinkKind::Bus));

        let handle = ports.handle.clone();
        let release = tokio::spawn(async move {
            handle.request(RequestKind::LinkReleased(LinkKind::Serial)).await
        });
        tokio::task::yield_now().await;

        let request = arbiter.requests.recv().await.unwrap();
        arbiter.handle(request);
        release.await.unwrap().unwrap();

        assert!(!ports.links[LinkKind::Serial.index()].gate.is_enabled());
        assert!(ports.links[LinkKind::Bus.index()].gate.is_enabled());
        assert_eq!(ports.snapshots.borrow().control, Control::LinkBus);
    }

    #[test]
    fn test_full_channel_drops() {
        let inbox = EventInbox::new();
        let (mut arbiter, _ports) = Arbiter::new(&inbox, std::time::Duration::from_millis(10));

        arbiter.dispatch(KeyEvent::Wake);
        arbiter.dispatch(KeyEvent::Zero);
        // nobody drained the serial channel yet
        arbiter.dispatch(KeyEvent::One);

        let snap = arbiter.state().snapshot();
        assert_eq!(snap.keys_dropped, 1);
        assert_eq!(snap.keys_routed, 2);
    }
}
