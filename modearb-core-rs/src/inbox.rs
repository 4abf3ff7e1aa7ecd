//! Event Inbox
//!
//! Single-slot mailbox for key events:
//! - `post` never blocks and overwrites any unread value (last write wins)
//! - every receiver sees the same posted value (broadcast on post)
//! - each receiver consumes independently (no first-reader-wins)
//!
//! A value posted while nobody listens is simply lost. Events are idempotent
//! intents, so a receiver that wakes late only ever acts on the newest one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::types::KeyEvent;

/// Producer side of the inbox
#[derive(Clone)]
pub struct EventInbox {
    tx: Arc<watch::Sender<KeyEvent>>,
    posted: Arc<AtomicU64>,
}

impl EventInbox {
    /// Create an empty inbox
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(KeyEvent::None);
        Self {
            tx: Arc::new(tx),
            posted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Post a key, replacing any unread one. `KeyEvent::None` is ignored.
    pub fn post(&self, key: KeyEvent) {
        if key.is_none() {
            return;
        }
        self.posted.fetch_add(1, Ordering::Relaxed);
        self.tx.send_replace(key);
    }

    /// New independent receiver. Earlier posts are not delivered to it.
    pub fn subscribe(&self) -> InboxReceiver {
        InboxReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live receivers
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total keys posted since creation
    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }
}

impl Default for EventInbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer side of the inbox
pub struct InboxReceiver {
    rx: watch::Receiver<KeyEvent>,
}

impl InboxReceiver {
    /// Wait up to `timeout` for a post this receiver has not seen yet.
    ///
    /// Returns `Ok(None)` on timeout and `Err(Error::Closed)` once every
    /// [`EventInbox`] handle is gone.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Option<KeyEvent>> {
        match tokio::time::timeout(timeout, self.rx.changed()).await {
            Ok(Ok(())) => Ok(Some(*self.rx.borrow_and_update())),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => Ok(None),
        }
    }

    /// Take an unseen post without waiting
    pub fn try_receive(&mut self) -> Option<KeyEvent> {
        match self.rx.has_changed() {
            Ok(true) => Some(*self.rx.borrow_and_update()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let inbox = EventInbox::new();
        let mut rx = inbox.subscribe();

        inbox.post(KeyEvent::Zero);
        inbox.post(KeyEvent::Wake);

        assert_eq!(rx.try_receive(), Some(KeyEvent::Wake));
        assert_eq!(rx.try_receive(), None);
        assert_eq!(inbox.posted(), 2);
    }

    #[test]
    fn test_none_is_not_posted() {
        let inbox = EventInbox::new();
        let mut rx = inbox.subscribe();

        inbox.post(KeyEvent::None);
        assert_eq!(rx.try_receive(), None);
        assert_eq!(inbox.posted(), 0);
    }

    #[test]
    fn test_broadcast_independent_receivers() {
        let inbox = EventInbox::new();
        let mut a = inbox.subscribe();
        let mut b = inbox.subscribe();
        assert_eq!(inbox.receiver_count(), 2);

        inbox.post(KeyEvent::Two);
        assert_eq!(a.try_receive(), Some(KeyEvent::Two));
        // a consuming does not consume for b
        assert_eq!(b.try_receive(), Some(KeyEvent::Two));
        assert_eq!(a.try_receive(), None);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_post() {
        let inbox = EventInbox::new();
        inbox.post(KeyEvent::One);

        let mut rx = inbox.subscribe();
        assert_eq!(rx.try_receive(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_timeout() {
        let inbox = EventInbox::new();
        let mut rx = inbox.subscribe();

        let got = rx.receive(Duration::from_millis(10)).await.unwrap();
        assert_eq!(got, None);

        inbox.post(KeyEvent::Zero);
        let got = rx.receive(Duration::from_millis(10)).await.unwrap();
        assert_eq!(got, Some(KeyEvent::Zero));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_wakes_pending_receiver() {
        let inbox = EventInbox::new();
        let mut rx = inbox.subscribe();

        let poster = inbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            poster.post(KeyEvent::Wake);
        });

        let got = rx.receive(Duration::from_millis(100)).await.unwrap();
        assert_eq!(got, Some(KeyEvent::Wake));
    }

    #[tokio::test]
    async fn test_closed_inbox() {
        let inbox = EventInbox::new();
        let mut rx = inbox.subscribe();
        drop(inbox);

        let err = rx.receive(Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, Error::Closed);
    }
}
