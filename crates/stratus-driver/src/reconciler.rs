//! Attachment-state reconciler
//!
//! The control plane has no transactional attach/detach primitive, so every
//! attach/detach mutation is funneled through a single worker that owns the
//! cached inventory of node→attached-volume sets. Serializing through one
//! owner removes lost-update races; a failed remote call leaves unknown
//! partial state, so the worker rebuilds the inventory wholesale from the
//! control plane instead of patching it.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use stratus_cloud::{CloudError, StorageBackendRef};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay between inventory rebuild attempts
const REBUILD_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Depth of each request queue
const QUEUE_DEPTH: usize = 64;

/// Cached attachment state: node ID → set of attached volume IDs.
///
/// Read and written only by the worker; a volume appears under at most one
/// node at any time.
type Inventory = HashMap<u64, HashSet<u64>>;

/// Requested mutation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentOp {
    Attach,
    Detach,
}

/// Reconciler failure reported to a submitter
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The remote mutation failed; inventory is being rebuilt
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// The driver is shutting down; the request was not executed
    #[error("reconciler is shutting down")]
    ShuttingDown,
}

/// One queued attach/detach request; its reply slot is fulfilled exactly once
struct AttachmentRequest {
    op: AttachmentOp,
    node_id: u64,
    volume_id: u64,
    reply: oneshot::Sender<Result<(), ReconcileError>>,
}

/// Handle to the reconciler worker
///
/// Cloneable and safe to share across RPC tasks; all mutation goes through
/// [`Reconciler::submit`].
#[derive(Clone)]
pub struct Reconciler {
    attach_tx: mpsc::Sender<AttachmentRequest>,
    detach_tx: mpsc::Sender<AttachmentRequest>,
}

impl Reconciler {
    /// Spawn the worker and return a handle to it.
    ///
    /// The worker first builds its inventory from the control plane,
    /// retrying on a fixed delay, then serves requests until `shutdown`
    /// fires.
    #[must_use]
    pub fn spawn(backend: StorageBackendRef, grid_id: u64, shutdown: CancellationToken) -> Self {
        let (attach_tx, attach_rx) = mpsc::channel(QUEUE_DEPTH);
        let (detach_tx, detach_rx) = mpsc::channel(QUEUE_DEPTH);

        let worker = Worker {
            backend,
            grid_id,
            inventory: Inventory::new(),
            attach_rx,
            detach_rx,
            shutdown,
        };
        tokio::spawn(worker.run());

        Self {
            attach_tx,
            detach_tx,
        }
    }

    /// Enqueue a request and block until the worker resolves it.
    ///
    /// FIFO within each queue; requests for the same volume are never
    /// processed concurrently.
    ///
    /// # Errors
    ///
    /// The remote error when the mutation failed, or
    /// [`ReconcileError::ShuttingDown`] when the driver is stopping.
    pub async fn submit(
        &self,
        op: AttachmentOp,
        node_id: u64,
        volume_id: u64,
    ) -> Result<(), ReconcileError> {
        let (reply, response) = oneshot::channel();
        let request = AttachmentRequest {
            op,
            node_id,
            volume_id,
            reply,
        };

        let queue = match op {
            AttachmentOp::Attach => &self.attach_tx,
            AttachmentOp::Detach => &self.detach_tx,
        };
        queue
            .send(request)
            .await
            .map_err(|_| ReconcileError::ShuttingDown)?;

        // The worker fulfills every accepted request, so a dropped reply
        // can only mean shutdown drained the queue.
        response.await.map_err(|_| ReconcileError::ShuttingDown)?
    }
}

struct Worker {
    backend: StorageBackendRef,
    grid_id: u64,
    inventory: Inventory,
    attach_rx: mpsc::Receiver<AttachmentRequest>,
    detach_rx: mpsc::Receiver<AttachmentRequest>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        info!(grid_id = self.grid_id, "building attachment inventory");
        if !self.rebuild().await {
            self.drain();
            return;
        }

        loop {
            // Biased: once shutdown fires, no further request is started.
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                Some(request) = self.attach_rx.recv() => self.process(request).await,
                Some(request) = self.detach_rx.recv() => self.process(request).await,
                else => break,
            }
        }

        self.drain();
    }

    async fn process(&mut self, request: AttachmentRequest) {
        let result = match request.op {
            AttachmentOp::Attach => self.attach(request.node_id, request.volume_id).await,
            AttachmentOp::Detach => self.detach(request.volume_id).await,
        };

        let failed = result.is_err();
        // Submitter may have gone away; the error was theirs to see.
        let _ = request.reply.send(result.map_err(ReconcileError::Cloud));

        if failed {
            warn!("remote mutation failed, rebuilding inventory");
            self.rebuild().await;
        }
    }

    /// Attach `volume_id` to `node_id`, detaching it from a stray holder
    /// first. Inventory is only updated after the remote call succeeded.
    async fn attach(&mut self, node_id: u64, volume_id: u64) -> Result<(), CloudError> {
        if self
            .inventory
            .get(&node_id)
            .is_some_and(|volumes| volumes.contains(&volume_id))
        {
            info!(volume_id, node_id, "volume already attached, nothing to do");
            return Ok(());
        }

        if let Some(holder) = self.holder_of(volume_id) {
            self.backend.detach_volume(holder, volume_id).await?;
            info!(volume_id, holder, "detached volume from stray holder");
            if let Some(volumes) = self.inventory.get_mut(&holder) {
                volumes.remove(&volume_id);
            }
        }

        self.backend.attach_volume(node_id, volume_id).await?;
        self.inventory.entry(node_id).or_default().insert(volume_id);
        info!(volume_id, node_id, "attached volume");
        Ok(())
    }

    /// Detach `volume_id` from whichever node holds it. The search is not
    /// restricted to the requested node so a missed update self-heals;
    /// an absent volume is already detached.
    async fn detach(&mut self, volume_id: u64) -> Result<(), CloudError> {
        let Some(holder) = self.holder_of(volume_id) else {
            debug!(volume_id, "volume not attached anywhere, nothing to do");
            return Ok(());
        };

        self.backend.detach_volume(holder, volume_id).await?;
        if let Some(volumes) = self.inventory.get_mut(&holder) {
            volumes.remove(&volume_id);
        }
        info!(volume_id, node_id = holder, "detached volume");
        Ok(())
    }

    fn holder_of(&self, volume_id: u64) -> Option<u64> {
        self.inventory
            .iter()
            .find(|(_, volumes)| volumes.contains(&volume_id))
            .map(|(node_id, _)| *node_id)
    }

    /// Replace the inventory wholesale from the control plane, retrying on
    /// a fixed delay. Returns false when shutdown interrupted the retry.
    async fn rebuild(&mut self) -> bool {
        loop {
            match self.backend.list_nodes(self.grid_id).await {
                Ok(nodes) => {
                    self.inventory = nodes
                        .into_iter()
                        .map(|node| (node.id, node.volume_ids.into_iter().collect()))
                        .collect();
                    debug!(nodes = self.inventory.len(), "inventory rebuilt");
                    return true;
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        "failed to build inventory, retrying in {}s",
                        REBUILD_RETRY_DELAY.as_secs()
                    );
                }
            }

            tokio::select! {
                () = self.shutdown.cancelled() => return false,
                () = tokio::time::sleep(REBUILD_RETRY_DELAY) => {}
            }
        }
    }

    /// Fail everything still queued so no submitter is left hanging.
    fn drain(&mut self) {
        self.attach_rx.close();
        self.detach_rx.close();
        while let Ok(request) = self.attach_rx.try_recv() {
            let _ = request.reply.send(Err(ReconcileError::ShuttingDown));
        }
        while let Ok(request) = self.detach_rx.try_recv() {
            let _ = request.reply.send(Err(ReconcileError::ShuttingDown));
        }
        info!("reconciler stopped");
    }
}
