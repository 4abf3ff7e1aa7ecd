//! Node runtime
//!
//! Wires the scanner, the arbiter, both storage pairs, both link workers and
//! the heartbeat onto tokio. A worker that stops with an error is logged;
//! everything else keeps running.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::arbiter::{Arbiter, ArbiterPorts, Snapshot};
use crate::buffer::{BufferLock, LockStats};
use crate::config::ArbiterConfig;
use crate::error::{Error, Result};
use crate::hal::{HostTransport, Indicator, Keypad, LinkBackend, StorageBackend};
use crate::heartbeat::Heartbeat;
use crate::host::InboundSlot;
use crate::inbox::EventInbox;
use crate::link::LinkWorker;
use crate::scanner::KeyScanner;
use crate::storage::{StorageReader, StorageWriter};
use crate::types::{KeyEvent, LinkKind, Payload, StoreKind, WorkerId};

/// Platform drivers for one node
#[derive(Clone)]
pub struct Backends {
    /// Key input
    pub keypad: Arc<dyn Keypad>,
    /// Status LEDs
    pub indicator: Arc<dyn Indicator>,
    /// Indexed by [`StoreKind::index`]
    pub stores: [Arc<dyn StorageBackend>; 2],
    /// Indexed by [`LinkKind::index`]
    pub links: [Arc<dyn LinkBackend>; 2],
    /// Outbound host transport
    pub host: Arc<dyn HostTransport>,
}

/// Node ready to be spawned
pub struct Node {
    config: ArbiterConfig,
    backends: Backends,
}

impl Node {
    /// Validate the configuration
    pub fn new(config: ArbiterConfig, backends: Backends) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, backends })
    }

    /// Start every worker on the current runtime
    pub fn spawn(self) -> NodeHandle {
        let Node { config, backends } = self;
        let retry = config.retry_policy();

        let inbox = EventInbox::new();
        let inbound = InboundSlot::new();
        let buffer = BufferLock::new();

        let (arbiter, ports) = Arbiter::new(&inbox, config.inbox_timeout());
        let ArbiterPorts {
            handle,
            snapshots,
            storage,
            links,
        } = ports;

        let mut tasks = JoinSet::new();
        supervise(&mut tasks, WorkerId::Router, arbiter.run());
        supervise(
            &mut tasks,
            WorkerId::Scanner,
            KeyScanner::new(backends.keypad.clone(), inbox.clone(), config.scan_interval()).run(),
        );

        for (store, ports) in StoreKind::ALL.into_iter().zip(storage) {
            let backend = backends.stores[store.index()].clone();
            let writer = StorageWriter::new(
                store,
                backend.clone(),
                backends.indicator.clone(),
                inbound.clone(),
                handle.clone(),
                ports.writer,
                retry,
                config.idle_delay(),
            );
            let reader = StorageReader::new(
                store,
                backend,
                backends.indicator.clone(),
                backends.host.clone(),
                inbound.clone(),
                handle.clone(),
                ports.reader,
                retry,
                config.host_write_timeout(),
            );
            supervise(&mut tasks, WorkerId::Writer(store), writer.run());
            supervise(&mut tasks, WorkerId::Reader(store), reader.run());
        }

        for (link, ports) in LinkKind::ALL.into_iter().zip(links) {
            let worker = LinkWorker::new(
                link,
                backends.links[link.index()].clone(),
                backends.indicator.clone(),
                buffer.clone(),
                ports,
                handle.clone(),
                config.link_poll_timeout(),
            );
            supervise(&mut tasks, WorkerId::Link(link), worker.run());
        }

        supervise(
            &mut tasks,
            WorkerId::Heartbeat,
            Heartbeat::new(backends.indicator.clone(), &config).run(),
        );

        info!("node started: {} workers", tasks.len());
        NodeHandle {
            inbox,
            inbound,
            buffer,
            snapshots,
            tasks,
        }
    }
}

fn supervise<F>(tasks: &mut JoinSet<(WorkerId, Result<()>)>, id: WorkerId, worker: F)
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tasks.spawn(async move {
        let result = worker.await;
        if let Err(e) = &result {
            error!("{} (priority {}) stopped: {}", id, id.priority(), e);
        }
        (id, result)
    });
}

/// Control surface of a running node
pub struct NodeHandle {
    inbox: EventInbox,
    inbound: InboundSlot,
    buffer: BufferLock,
    snapshots: watch::Receiver<Snapshot>,
    tasks: JoinSet<(WorkerId, Result<()>)>,
}

impl NodeHandle {
    /// Post a key as if the scanner had seen it
    pub fn post_key(&self, key: KeyEvent) {
        self.inbox.post(key);
    }

    /// Deliver a payload as the host transport's receive-complete
    pub fn deliver_payload(&self, payload: Payload) {
        self.inbound.receive_complete(payload);
    }

    /// Latest published arbiter state
    pub fn snapshot(&self) -> Snapshot {
        *self.snapshots.borrow()
    }

    /// Wait until a published snapshot satisfies `predicate`
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&Snapshot) -> bool,
        timeout: Duration,
    ) -> Result<Snapshot> {
        let mut rx = self.snapshots.clone();
        let result = match tokio::time::timeout(timeout, rx.wait_for(predicate)).await {
            Ok(Ok(snapshot)) => Ok(*snapshot),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => Err(Error::Timeout(timeout)),
        };
        result
    }

    /// Inbound register shared with the storage writers
    pub fn inbound(&self) -> &InboundSlot {
        &self.inbound
    }

    /// Shared transfer buffer
    pub fn buffer(&self) -> &BufferLock {
        &self.buffer
    }

    /// Transfer buffer lock counters
    pub fn lock_stats(&self) -> LockStats {
        self.buffer.stats()
    }

    /// Keys posted so far
    pub fn keys_posted(&self) -> u64 {
        self.inbox.posted()
    }

    /// Stop every worker. Returns the workers that had already stopped on
    /// their own, with their results.
    pub async fn shutdown(mut self) -> Vec<(WorkerId, Result<()>)> {
        self.tasks.abort_all();
        let mut finished = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            if let Ok(report) = joined {
                finished.push(report);
            }
        }
        info!("node stopped");
        finished
    }
}
