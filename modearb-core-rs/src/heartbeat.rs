//! Liveness blink
//!
//! Lowest-priority worker. Drives one indicator on for a short pulse at the
//! start of every period, so a stalled scheduler shows up as a frozen LED.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::config::ArbiterConfig;
use crate::error::Result;
use crate::hal::Indicator;
use crate::types::Led;

/// Liveness blink worker
pub struct Heartbeat {
    indicator: Arc<dyn Indicator>,
    led: Led,
    period: Duration,
    pulse: Duration,
}

impl Heartbeat {
    /// Blink parameters from the node configuration
    pub fn new(indicator: Arc<dyn Indicator>, config: &ArbiterConfig) -> Self {
        Self {
            indicator,
            led: config.heartbeat_led,
            period: config.heartbeat_period(),
            pulse: config.heartbeat_pulse(),
        }
    }

    /// One blink: on for the pulse, off for the rest of the period
    pub async fn beat(&self) {
        self.indicator.set(self.led, true);
        sleep(self.pulse).await;
        self.indicator.set(self.led, false);
        sleep(self.period.saturating_sub(self.pulse)).await;
    }

    /// Blink forever
    pub async fn run(self) -> Result<()> {
        loop {
            self.beat().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::RecordingIndicator;

    #[tokio::test(start_paused = true)]
    async fn test_pulse_then_dark() {
        let leds = Arc::new(RecordingIndicator::new());
        let heartbeat = Heartbeat::new(leds.clone(), &ArbiterConfig::default());
        let task = tokio::spawn(heartbeat.run());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(leds.is_on(Led::Led0));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!leds.is_on(Led::Led0));

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(leds.is_on(Led::Led0));
        task.abort();
    }
}
