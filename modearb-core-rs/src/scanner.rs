//! Key scanner: polls the keypad and posts every press to the inbox

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::Result;
use crate::hal::Keypad;
use crate::inbox::EventInbox;
use crate::types::KeyEvent;

/// Highest-priority worker; never gated
pub struct KeyScanner {
    keypad: Arc<dyn Keypad>,
    inbox: EventInbox,
    interval: Duration,
}

impl KeyScanner {
    pub fn new(keypad: Arc<dyn Keypad>, inbox: EventInbox, interval: Duration) -> Self {
        Self {
            keypad,
            inbox,
            interval,
        }
    }

    /// Scan once and post the result (a `None` scan posts nothing)
    pub fn step(&self) -> KeyEvent {
        let key = self.keypad.scan();
        if !key.is_none() {
            debug!("key {}", key);
            self.inbox.post(key);
        }
        key
    }

    /// Scan every interval until nobody listens to the inbox anymore
    pub async fn run(self) -> Result<()> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.inbox.receiver_count() == 0 {
                info!("inbox has no receivers, scanner stopping");
                return Ok(());
            }
            self.step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::ScriptedKeypad;

    #[test]
    fn test_scan_posts_presses_only() {
        let inbox = EventInbox::new();
        let mut rx = inbox.subscribe();
        let keypad = Arc::new(ScriptedKeypad::new([KeyEvent::None, KeyEvent::Two]));
        let scanner = KeyScanner::new(keypad, inbox.clone(), Duration::from_millis(10));

        assert_eq!(scanner.step(), KeyEvent::None);
        assert_eq!(rx.try_receive(), None);

        assert_eq!(scanner.step(), KeyEvent::Two);
        assert_eq!(rx.try_receive(), Some(KeyEvent::Two));
        assert_eq!(inbox.posted(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scanner_stops_without_receivers() {
        let inbox = EventInbox::new();
        let rx = inbox.subscribe();
        let keypad = Arc::new(ScriptedKeypad::new([KeyEvent::Zero]));
        let scanner = KeyScanner::new(keypad.clone(), inbox.clone(), Duration::from_millis(10));

        let task = tokio::spawn(scanner.run());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(keypad.remaining(), 0);

        drop(rx);
        task.await.unwrap().unwrap();
    }
}
