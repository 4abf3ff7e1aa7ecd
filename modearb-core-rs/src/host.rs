//! Host transport receive register
//!
//! The host transport's receive-complete handler drops a full payload into
//! the [`InboundSlot`] and raises its ready flag; that flag is the
//! Pending-Write Flag the storage writers poll. Only one storage pair is
//! enabled at a time, so exactly one writer observes it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::Payload;

#[derive(Debug, Default)]
struct Slot {
    payload: Payload,
    ready: bool,
    received: u64,
}

/// Inbound payload plus ready flag
#[derive(Debug, Clone, Default)]
pub struct InboundSlot {
    inner: Arc<Mutex<Slot>>,
}

impl InboundSlot {
    /// Empty slot, flag clear
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive-complete: store a payload and raise the flag.
    ///
    /// An unconsumed payload is overwritten.
    pub fn receive_complete(&self, payload: Payload) {
        let mut slot = self.inner.lock();
        slot.payload = payload;
        slot.ready = true;
        slot.received += 1;
    }

    /// Pending payload, if the flag is set
    pub fn pending(&self) -> Option<Payload> {
        let slot = self.inner.lock();
        slot.ready.then_some(slot.payload)
    }

    /// True while a payload awaits persistence
    pub fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    /// Zero the receive buffer and drop the flag
    pub fn clear(&self) {
        let mut slot = self.inner.lock();
        slot.payload = Payload::default();
        slot.ready = false;
    }

    /// Payloads received since creation
    pub fn received(&self) -> u64 {
        self.inner.lock().received
    }
}
