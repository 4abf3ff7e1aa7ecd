//! Node configuration
//!
//! Timing for every worker plus the backend retry policy. Loadable from JSON;
//! missing fields fall back to the firmware defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Led;

/// Complete node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Key scanner poll period
    pub scan_interval_ms: u64,

    /// Arbiter inbox receive timeout (router re-poll period)
    pub inbox_timeout_ms: u64,

    /// Link worker routed-key receive timeout
    pub link_poll_timeout_ms: u64,

    /// Storage writer pacing delay when nothing is pending
    pub idle_delay_ms: u64,

    /// Delay between failed backend health checks
    pub backoff_ms: u64,

    /// Give up after this many failed health checks (None = retry forever)
    pub max_health_checks: Option<u32>,

    /// Timeout for the blocking write to the host transport
    pub host_write_timeout_ms: u64,

    /// Liveness blink period
    pub heartbeat_period_ms: u64,

    /// Liveness blink on-time within each period
    pub heartbeat_pulse_ms: u64,

    /// Indicator used for the liveness blink
    pub heartbeat_led: Led,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 10,
            inbox_timeout_ms: 10,
            link_poll_timeout_ms: 10,
            idle_delay_ms: 10,
            backoff_ms: 1000,
            max_health_checks: None,
            host_write_timeout_ms: 1000,
            heartbeat_period_ms: 1000,
            heartbeat_pulse_ms: 80,
            heartbeat_led: Led::Led0,
        }
    }
}

/// Backend presence retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between checks
    pub backoff: Duration,
    /// Maximum failed checks before giving up (None = forever)
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry forever with a fixed delay
    pub fn forever(backoff: Duration) -> Self {
        Self {
            backoff,
            max_attempts: None,
        }
    }

    /// Give up after `max_attempts` failed checks
    pub fn bounded(backoff: Duration, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts: Some(max_attempts),
        }
    }

    /// True once `attempts` failed checks exhaust the policy
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(false, |max| attempts >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever(Duration::from_millis(1000))
    }
}

impl ArbiterConfig {
    /// Parse from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Reject settings that would stall or spin a worker
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("scan_interval_ms", self.scan_interval_ms),
            ("inbox_timeout_ms", self.inbox_timeout_ms),
            ("link_poll_timeout_ms", self.link_poll_timeout_ms),
            ("idle_delay_ms", self.idle_delay_ms),
            ("heartbeat_period_ms", self.heartbeat_period_ms),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(Error::Config(format!("{} must be non-zero", name)));
            }
        }

        if self.heartbeat_pulse_ms >= self.heartbeat_period_ms {
            return Err(Error::Config(format!(
                "heartbeat_pulse_ms ({}) must be shorter than heartbeat_period_ms ({})",
                self.heartbeat_pulse_ms, self.heartbeat_period_ms
            )));
        }

        if self.max_health_checks == Some(0) {
            return Err(Error::Config(
                "max_health_checks must be at least 1 (omit it to retry forever)".to_string(),
            ));
        }

        Ok(())
    }

    /// Set scanner poll period
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the health-check backoff
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Bound the number of failed health checks
    pub fn with_max_health_checks(mut self, max: u32) -> Self {
        self.max_health_checks = Some(max);
        self
    }

    /// Set the link worker receive timeout
    pub fn with_link_poll_timeout(mut self, timeout: Duration) -> Self {
        self.link_poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Scanner poll period
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// Arbiter inbox timeout
    pub fn inbox_timeout(&self) -> Duration {
        Duration::from_millis(self.inbox_timeout_ms)
    }

    /// Link worker receive timeout
    pub fn link_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.link_poll_timeout_ms)
    }

    /// Writer idle delay
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    /// Host write timeout
    pub fn host_write_timeout(&self) -> Duration {
        Duration::from_millis(self.host_write_timeout_ms)
    }

    /// Liveness blink period
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    /// Liveness blink on-time
    pub fn heartbeat_pulse(&self) -> Duration {
        Duration::from_millis(self.heartbeat_pulse_ms)
    }

    /// Backend presence retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_millis(self.backoff_ms),
            max_attempts: self.max_health_checks,
        }
    }
}
