//! Storage worker pairs
//!
//! Each storage backend gets a writer and a reader:
//!
//! ```text
//!  host ──payload──► InboundSlot ──► Writer ──write──► backend
//!                                      │ WriteComplete (arms reader)
//!                                      ▼
//!  host ◄──HostTransport::write── Reader ◄──read── backend
//!                                      │ ReadComplete (disarms itself)
//! ```
//!
//! The writer runs while its pair is the active storage mode. The reader
//! additionally needs its writer to have armed it, so it reads back exactly
//! once per write.
//!
//! A worker that gives up on its backend under a bounded retry policy reports
//! `Unavailable` to the arbiter, which closes the pair. The worker then parks
//! on its gate and starts a fresh retry cycle once the pair is selected again.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::arbiter::{ArbiterHandle, RequestKind};
use crate::config::RetryPolicy;
use crate::error::{Error, Result};
use crate::gate::Gate;
use crate::hal::{HostTransport, Indicator, StorageBackend};
use crate::host::InboundSlot;
use crate::types::{Led, StoreKind, PAYLOAD_LEN};

/// Wait until `backend` passes its health check.
///
/// Each failed check toggles LED0 and waits `retry.backoff`. A disabled
/// worker parks on its gate between checks. Under a bounded policy the
/// wait ends with `Error::BackendUnavailable`.
pub async fn wait_available(
    backend: &dyn StorageBackend,
    indicator: &dyn Indicator,
    retry: &RetryPolicy,
    gate: &mut Gate,
) -> Result<()> {
    let mut attempts = 0u32;
    loop {
        gate.wait_enabled().await?;
        if backend.health() {
            if attempts > 0 {
                info!("{} present after {} failed checks", backend.name(), attempts);
            }
            return Ok(());
        }

        attempts += 1;
        indicator.toggle(Led::Led0);
        warn!("{} not present (check {})", backend.name(), attempts);

        if retry.exhausted(attempts) {
            return Err(Error::BackendUnavailable {
                backend: backend.name(),
                attempts,
            });
        }
        sleep(retry.backoff).await;
    }
}

/// Close the pair until it is selected again
async fn give_up(arbiter: &ArbiterHandle, store: StoreKind) -> Result<()> {
    arbiter.request(RequestKind::Unavailable(store)).await
}

// ============================================================================
// Writer
// ============================================================================

/// Persists inbound payloads to one backend
pub struct StorageWriter {
    store: StoreKind,
    backend: Arc<dyn StorageBackend>,
    indicator: Arc<dyn Indicator>,
    inbound: InboundSlot,
    arbiter: ArbiterHandle,
    gate: Gate,
    retry: RetryPolicy,
    idle_delay: Duration,
}

impl StorageWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: StoreKind,
        backend: Arc<dyn StorageBackend>,
        indicator: Arc<dyn Indicator>,
        inbound: InboundSlot,
        arbiter: ArbiterHandle,
        gate: Gate,
        retry: RetryPolicy,
        idle_delay: Duration,
    ) -> Self {
        Self {
            store,
            backend,
            indicator,
            inbound,
            arbiter,
            gate,
            retry,
            idle_delay,
        }
    }

    /// One iteration. Returns true when a payload was persisted.
    pub async fn step(&mut self) -> Result<bool> {
        wait_available(
            self.backend.as_ref(),
            self.indicator.as_ref(),
            &self.retry,
            &mut self.gate,
        )
        .await?;

        let Some(payload) = self.inbound.pending() else {
            sleep(self.idle_delay).await;
            return Ok(false);
        };

        if !self.gate.is_enabled() {
            debug!("{} writer deselected, payload left pending", self.store);
            return Ok(false);
        }

        let offset = self.store.offset();
        self.backend.write(offset, &payload)?;
        info!(
            "{}: wrote {} bytes at {:#x}",
            self.backend.name(),
            payload.len(),
            offset
        );

        self.inbound.clear();
        self.arbiter
            .request(RequestKind::WriteComplete(self.store))
            .await?;
        Ok(true)
    }

    /// Run until shutdown
    pub async fn run(mut self) -> Result<()> {
        loop {
            match self.step().await {
                Ok(_) => {}
                Err(Error::Closed) => return Ok(()),
                Err(e @ Error::BackendUnavailable { .. }) => {
                    error!("{} writer giving up: {}", self.store, e);
                    if let Err(Error::Closed) = give_up(&self.arbiter, self.store).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!("{} writer: {}", self.store, e);
                    sleep(self.retry.backoff).await;
                }
            }
        }
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Reads the stored payload back to the host once per write
pub struct StorageReader {
    store: StoreKind,
    backend: Arc<dyn StorageBackend>,
    indicator: Arc<dyn Indicator>,
    host: Arc<dyn HostTransport>,
    inbound: InboundSlot,
    arbiter: ArbiterHandle,
    gate: Gate,
    retry: RetryPolicy,
    host_timeout: Duration,
}

impl StorageReader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: StoreKind,
        backend: Arc<dyn StorageBackend>,
        indicator: Arc<dyn Indicator>,
        host: Arc<dyn HostTransport>,
        inbound: InboundSlot,
        arbiter: ArbiterHandle,
        gate: Gate,
        retry: RetryPolicy,
        host_timeout: Duration,
    ) -> Self {
        Self {
            store,
            backend,
            indicator,
            host,
            inbound,
            arbiter,
            gate,
            retry,
            host_timeout,
        }
    }

    /// One read-back. Returns the bytes forwarded to the host.
    pub async fn step(&mut self) -> Result<Vec<u8>> {
        wait_available(
            self.backend.as_ref(),
            self.indicator.as_ref(),
            &self.retry,
            &mut self.gate,
        )
        .await?;

        let offset = self.store.offset();
        let bytes = self.backend.read(offset, PAYLOAD_LEN)?;
        self.host.write(&bytes, self.host_timeout)?;
        info!(
            "{}: read {} bytes at {:#x}",
            self.backend.name(),
            bytes.len(),
            offset
        );

        self.inbound.clear();
        self.arbiter
            .request(RequestKind::ReadComplete(self.store))
            .await?;
        Ok(bytes)
    }

    /// Run until shutdown
    pub async fn run(mut self) -> Result<()> {
        loop {
            match self.step().await {
                Ok(_) => {}
                Err(Error::Closed) => return Ok(()),
                Err(e @ Error::BackendUnavailable { .. }) => {
                    error!("{} reader giving up: {}", self.store, e);
                    if let Err(Error::Closed) = give_up(&self.arbiter, self.store).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!("{} reader: {}", self.store, e);
                    sleep(self.retry.backoff).await;
                }
            }
        }
    }
}
