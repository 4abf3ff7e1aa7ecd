//! Mode Router
//!
//! Host-control state machine. Two orthogonal pieces of state:
//!
//! ```text
//!   link arbitration                      storage mode
//!
//!        WAKE            TWO             ZERO -> byte pair
//!   HOST ────► LINK_SERIAL ◄──► LINK_BUS  ONE  -> block pair
//!    ▲             │              │       (HOST only, mutually exclusive)
//!    └──── WAKE ───┴──── WAKE ────┘
//! ```
//!
//! In `HOST` the router reacts to ZERO / ONE / WAKE. Once a link is in
//! control the router is deaf; the link worker sees the keys and the
//! transitions out of a link state are driven by what that worker observed.
//!
//! The router is pure: no I/O, no timing. The arbiter owns it.

use tracing::info;

use crate::error::{Error, Result};
use crate::types::{Control, KeyEvent, LinkKind, StoreKind};

/// Outcome of a key handled in `HOST`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterAction {
    /// A storage pair became the active one
    SelectStore(StoreKind),
    /// Control moved to a link worker
    EnterLink(LinkKind),
    /// Nothing to do (TWO in HOST, NONE, or router not in control)
    Ignore,
}

/// What a link worker does after transmitting a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Stay in control
    Stay,
    /// Hand control to the given link
    Handoff(LinkKind),
    /// Give control back to the router
    ReturnHost,
}

impl LinkAction {
    /// True when the worker gives up control
    pub fn releases(self) -> bool {
        !matches!(self, LinkAction::Stay)
    }

    /// Control state after the action
    pub fn target(self, from: LinkKind) -> Control {
        match self {
            LinkAction::Stay => Control::from_link(from),
            LinkAction::Handoff(to) => Control::from_link(to),
            LinkAction::ReturnHost => Control::Host,
        }
    }
}

/// Host-control state machine
#[derive(Debug, Clone, Default)]
pub struct ModeRouter {
    control: Control,
    store: Option<StoreKind>,
    transitions: u64,
}

impl ModeRouter {
    /// HOST, no storage pair selected
    pub fn new() -> Self {
        Self::default()
    }

    /// Who owns link arbitration
    pub fn control(&self) -> Control {
        self.control
    }

    /// Active storage pair
    pub fn store(&self) -> Option<StoreKind> {
        self.store
    }

    /// True while the router itself processes keys
    pub fn in_control(&self) -> bool {
        self.control == Control::Host
    }

    /// Control transitions taken so far
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Handle a key while in `HOST`
    pub fn on_host_key(&mut self, key: KeyEvent) -> RouterAction {
        if !self.in_control() {
            return RouterAction::Ignore;
        }

        match key {
            KeyEvent::Zero => self.select_store(StoreKind::Byte),
            KeyEvent::One => self.select_store(StoreKind::Block),
            KeyEvent::Wake => {
                info!("MAIN_CTRL->serial");
                self.set_control(Control::LinkSerial);
                RouterAction::EnterLink(LinkKind::Serial)
            }
            KeyEvent::Two | KeyEvent::None => RouterAction::Ignore,
        }
    }

    /// What the link worker in control must do with `key`
    pub fn link_action(link: LinkKind, key: KeyEvent) -> LinkAction {
        match key {
            KeyEvent::Two => LinkAction::Handoff(link.other()),
            KeyEvent::Wake => LinkAction::ReturnHost,
            _ => LinkAction::Stay,
        }
    }

    /// Apply the action a link worker completed
    pub fn apply_link(&mut self, link: LinkKind, action: LinkAction) -> Result<Control> {
        if self.control != Control::from_link(link) {
            return Err(Error::NotInControl {
                link,
                control: self.control,
            });
        }

        let target = action.target(link);
        if target != self.control {
            match target.link() {
                Some(to) => info!("{}->{}", link, to),
                None => info!("{}->MAIN_CTRL", link),
            }
            self.set_control(target);
        }
        Ok(target)
    }

    fn select_store(&mut self, store: StoreKind) -> RouterAction {
        if self.store != Some(store) {
            info!("storage mode: {}", store);
        }
        self.store = Some(store);
        RouterAction::SelectStore(store)
    }

    fn set_control(&mut self, control: Control) {
        self.control = control;
        self.transitions += 1;
    }
}
