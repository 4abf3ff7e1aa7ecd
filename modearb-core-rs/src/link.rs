//! Link workers
//!
//! While in control, a link worker transmits every key the arbiter routes to
//! it and, between keys, polls its backend for frames from the remote peer.
//! Both directions go through the shared transfer buffer, so at most one
//! link touches it at a time and it is always cleared on the way out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::arbiter::{ArbiterHandle, LinkPorts, RequestKind};
use crate::buffer::BufferLock;
use crate::error::{Error, Result};
use crate::hal::{Indicator, LinkBackend};
use crate::types::{Control, KeyEvent, Led, LinkKind};

/// What one iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStep {
    /// Key transmitted to the peer
    pub transmitted: Option<KeyEvent>,
    /// Control handed away (handoff or return to HOST)
    pub released: Option<Control>,
    /// First byte of a frame received from the peer
    pub received: Option<u8>,
}

impl LinkStep {
    /// Nothing happened
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Indicator effect of a remote key code
pub fn apply_remote(indicator: &dyn Indicator, code: u8) {
    match KeyEvent::from_byte(code) {
        Some(KeyEvent::Zero) => indicator.toggle(Led::Led0),
        Some(KeyEvent::One) => indicator.toggle(Led::Led1),
        Some(KeyEvent::Two) => {
            indicator.toggle(Led::Led0);
            indicator.toggle(Led::Led1);
        }
        _ => debug!("ignoring remote code {:#04x}", code),
    }
}

/// Worker owning one communication backend
pub struct LinkWorker {
    kind: LinkKind,
    backend: Arc<dyn LinkBackend>,
    indicator: Arc<dyn Indicator>,
    buffer: BufferLock,
    ports: LinkPorts,
    arbiter: ArbiterHandle,
    poll_timeout: Duration,
}

impl LinkWorker {
    pub fn new(
        kind: LinkKind,
        backend: Arc<dyn LinkBackend>,
        indicator: Arc<dyn Indicator>,
        buffer: BufferLock,
        ports: LinkPorts,
        arbiter: ArbiterHandle,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            kind,
            backend,
            indicator,
            buffer,
            ports,
            arbiter,
            poll_timeout,
        }
    }

    /// Which link this worker drives
    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    /// One iteration: transmit a routed key if any, then poll the peer
    pub async fn step(&mut self) -> Result<LinkStep> {
        self.ports.gate.wait_enabled().await?;
        let mut step = LinkStep::default();

        match timeout(self.poll_timeout, self.ports.keys.recv()).await {
            Ok(Some(routed)) => {
                self.transmit(routed.key).await;
                step.transmitted = Some(routed.key);

                if routed.action.releases() {
                    self.arbiter
                        .request(RequestKind::LinkReleased(self.kind))
                        .await?;
                    step.released = Some(routed.action.target(self.kind));
                    return Ok(step);
                }
            }
            Ok(None) => return Err(Error::Closed),
            Err(_) => {}
        }

        step.received = self.poll_remote().await;
        Ok(step)
    }

    /// Run until shutdown
    pub async fn run(mut self) -> Result<()> {
        info!("{} link worker ready ({})", self.kind, self.backend.name());
        loop {
            match self.step().await {
                Ok(_) => {}
                Err(Error::Closed) => return Ok(()),
                Err(e) => warn!("{} link: {}", self.kind, e),
            }
        }
    }

    async fn transmit(&self, key: KeyEvent) {
        let mut buf = self.buffer.acquire().await;
        buf.stage_key(key);
        match self.backend.send(buf.frame(self.kind.frame_len())) {
            Ok(()) => debug!("{}: sent {}", self.backend.name(), key),
            Err(e) => warn!("{}", e),
        }
    }

    async fn poll_remote(&self) -> Option<u8> {
        let mut buf = self.buffer.acquire().await;
        let frame = self.backend.try_receive()?;
        buf.fill(&frame);

        let code = buf.first();
        debug!("{}: received {:#04x}", self.backend.name(), code);
        apply_remote(self.indicator.as_ref(), code);
        Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::{Arbiter, ArbiterPorts};
    use crate::inbox::EventInbox;
    use crate::sim::{RecordingIndicator, SimLink};

    #[test]
    fn test_remote_decode() {
        let leds = RecordingIndicator::new();
        apply_remote(&leds, KeyEvent::Zero.code());
        apply_remote(&leds, KeyEvent::Two.code());
        apply_remote(&leds, KeyEvent::Wake.code());
        apply_remote(&leds, 0x42);

        assert_eq!(leds.toggles(Led::Led0), 2);
        assert_eq!(leds.toggles(Led::Led1), 1);
    }

    fn serial_worker(
        ports: ArbiterPorts,
    ) -> (LinkWorker, SimLink, SimLink, BufferLock, Arc<RecordingIndicator>) {
        let ArbiterPorts { handle, links, .. } = ports;
        let [serial, _bus] = links;
        let (local, remote) = SimLink::pair(LinkKind::Serial);
        let leds = Arc::new(RecordingIndicator::new());
        let buffer = BufferLock::new();
        let worker = LinkWorker::new(
            LinkKind::Serial,
            Arc::new(local.clone()),
            leds.clone(),
            buffer.clone(),
            serial,
            handle,
            Duration::from_millis(10),
        );
        (worker, local, remote, buffer, leds)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_then_handoff() {
        let inbox = EventInbox::new();
        let (arbiter, ports) = Arbiter::new(&inbox, Duration::from_millis(10));
        let mut snapshots = ports.snapshots.clone();
        tokio::spawn(arbiter.run());
        let (mut worker, _local, remote, buffer, _leds) = serial_worker(ports);

        inbox.post(KeyEvent::Wake);
        snapshots.wait_for(|s| s.control == Control::LinkSerial).await.unwrap();

        inbox.post(KeyEvent::One);
        let step = loop {
            let step = worker.step().await.unwrap();
            if step.transmitted.is_some() {
                break step;
            }
        };
        assert_eq!(step.transmitted, Some(KeyEvent::One));
        assert_eq!(step.released, None);
        assert_eq!(remote.try_receive().unwrap().as_slice(), &[KeyEvent::One.code()]);

        inbox.post(KeyEvent::Two);
        let step = loop {
            let step = worker.step().await.unwrap();
            if step.released.is_some() {
                break step;
            }
        };
        assert_eq!(step.released, Some(Control::LinkBus));
        assert_eq!(snapshots.borrow().control, Control::LinkBus);
        assert!(buffer.try_acquire().unwrap().is_clear());
        assert!(buffer.stats().balanced());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_frame_toggles_led() {
        let inbox = EventInbox::new();
        let (arbiter, ports) = Arbiter::new(&inbox, Duration::from_millis(10));
        let mut snapshots = ports.snapshots.clone();
        tokio::spawn(arbiter.run());
        let (mut worker, _local, remote, buffer, leds) = serial_worker(ports);
        assert_eq!(worker.kind(), LinkKind::Serial);

        inbox.post(KeyEvent::Wake);
        snapshots.wait_for(|s| s.control == Control::LinkSerial).await.unwrap();
        assert!(worker.step().await.unwrap().is_idle());

        remote.send(&[KeyEvent::One.code()]).unwrap();
        let step = worker.step().await.unwrap();
        assert_eq!(step.received, Some(KeyEvent::One.code()));
        assert_eq!(leds.toggles(Led::Led1), 1);
        assert!(!buffer.is_held());

        // remote keys never reach the inbox
        assert_eq!(snapshots.borrow().keys_routed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_is_not_fatal() {
        let inbox = EventInbox::new();
        let (arbiter, ports) = Arbiter::new(&inbox, Duration::from_millis(10));
        let mut snapshots = ports.snapshots.clone();
        tokio::spawn(arbiter.run());
        let (mut worker, local, _remote, _buffer, _leds) = serial_worker(ports);

        inbox.post(KeyEvent::Wake);
        snapshots.wait_for(|s| s.control == Control::LinkSerial).await.unwrap();

        local.fail_sends(1);
        inbox.post(KeyEvent::Zero);
        let step = loop {
            let step = worker.step().await.unwrap();
            if step.transmitted.is_some() {
                break step;
            }
        };
        assert_eq!(step.transmitted, Some(KeyEvent::Zero));
        assert!(local.sent().is_empty());
        assert_eq!(snapshots.borrow().control, Control::LinkSerial);
    }
}
