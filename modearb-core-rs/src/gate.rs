//! Worker gates
//!
//! Each worker owns a [`Gate`]; the arbiter owns the matching
//! [`GateControl`]. A disabled worker parks in [`Gate::wait_enabled`] at its
//! next suspension point and resumes exactly there once enabled again.

use tokio::sync::watch;

use crate::error::{Error, Result};

/// Create a gate pair
pub fn gate(enabled: bool) -> (GateControl, Gate) {
    let (tx, rx) = watch::channel(enabled);
    (GateControl { tx }, Gate { rx })
}

/// Arbiter side: opens and closes one worker
#[derive(Debug)]
pub struct GateControl {
    tx: watch::Sender<bool>,
}

impl GateControl {
    /// Set the gate. Returns true when the state actually changed.
    pub fn set(&self, enabled: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == enabled {
                false
            } else {
                *current = enabled;
                true
            }
        })
    }

    /// Current state
    pub fn is_enabled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Worker side
#[derive(Debug, Clone)]
pub struct Gate {
    rx: watch::Receiver<bool>,
}

impl Gate {
    /// Current state
    pub fn is_enabled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Park until enabled. `Err(Error::Closed)` once the arbiter is gone.
    pub async fn wait_enabled(&mut self) -> Result<()> {
        self.rx
            .wait_for(|enabled| *enabled)
            .await
            .map(|_| ())
            .map_err(|_| Error::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_set_reports_change() {
        let (control, gate) = gate(false);
        assert!(!gate.is_enabled());
        assert!(control.set(true));
        assert!(!control.set(true));
        assert!(gate.is_enabled());
        assert!(control.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_worker_parks() {
        let (control, mut gate) = gate(false);

        let parked = tokio::time::timeout(Duration::from_millis(50), gate.wait_enabled()).await;
        assert!(parked.is_err());

        control.set(true);
        gate.wait_enabled().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_gate() {
        let (control, mut gate) = gate(false);
        drop(control);
        assert_eq!(gate.wait_enabled().await, Err(Error::Closed));
    }
}
