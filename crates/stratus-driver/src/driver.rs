//! Driver bootstrap and gRPC transport
//!
//! Resolves names to remote IDs, discovers which cluster node this process
//! runs on, spawns the reconciler and the token refresher, and serves the
//! three CSI services until the shutdown token fires.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use stratus_cloud::StorageBackendRef;
use stratus_proto::csi::controller_server::ControllerServer;
use stratus_proto::csi::identity_server::IdentityServer;
use stratus_proto::csi::node_server::NodeServer;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{info, warn};

use crate::controller::ControllerService;
use crate::error::{DriverError, DriverResult};
use crate::id::RemoteId;
use crate::identity::IdentityService;
use crate::mount::Mounter;
use crate::node::NodeService;
use crate::reconciler::Reconciler;

/// Where the node's hardware UUID lives on a Stratus VM
const PRODUCT_UUID_PATH: &str = "/sys/class/dmi/id/product_uuid";

/// Tokens are valid for 30 days; renew with a day to spare.
const TOKEN_REFRESH_INTERVAL: Duration = Duration::from_secs(29 * 24 * 60 * 60);

/// Delay between token refresh retries
const TOKEN_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Startup configuration for [`Driver`]
pub struct DriverSetup {
    /// CSI endpoint, `unix://` or `tcp://`
    pub endpoint: String,
    /// Grid name, resolved to its numeric ID at startup
    pub grid: String,
    /// Account name, resolved to its numeric ID at startup
    pub account: String,
    /// Composite node ID override; discovered from the hardware UUID when
    /// unset
    pub node_id: Option<String>,
}

/// A fully resolved driver, ready to serve
pub struct Driver {
    backend: StorageBackendRef,
    mounter: Arc<dyn Mounter>,
    listen: Listen,
    node_id: String,
    account_id: u64,
    grid_id: u64,
    grid: String,
    shutdown: CancellationToken,
}

enum Listen {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl Driver {
    /// Resolve the setup against the control plane.
    ///
    /// # Errors
    ///
    /// When the endpoint is unusable or name resolution fails.
    pub async fn init(
        backend: StorageBackendRef,
        mounter: Arc<dyn Mounter>,
        setup: DriverSetup,
        shutdown: CancellationToken,
    ) -> DriverResult<Self> {
        let listen = parse_endpoint(&setup.endpoint)?;

        let grid_id = backend.grid_id(&setup.grid).await?;
        let account_id = backend.account_id(&setup.account).await?;
        info!(grid = %setup.grid, grid_id, account = %setup.account, account_id, "resolved names");

        let node_id = match setup.node_id {
            Some(node_id) => node_id,
            None => discover_node_id(&backend, &setup.grid).await?,
        };
        info!(node_id = %node_id, "serving as cluster node");

        Ok(Self {
            backend,
            mounter,
            listen,
            node_id,
            account_id,
            grid_id,
            grid: setup.grid,
            shutdown,
        })
    }

    /// Serve CSI until the shutdown token fires.
    ///
    /// # Errors
    ///
    /// When binding the endpoint or serving fails.
    pub async fn run(self) -> DriverResult<()> {
        let reconciler = Reconciler::spawn(
            Arc::clone(&self.backend),
            self.grid_id,
            self.shutdown.clone(),
        );
        spawn_token_refresher(Arc::clone(&self.backend), self.shutdown.clone());

        let router = Server::builder()
            .add_service(IdentityServer::new(IdentityService))
            .add_service(ControllerServer::new(ControllerService::new(
                Arc::clone(&self.backend),
                reconciler,
                self.account_id,
                self.grid_id,
                self.grid.clone(),
            )))
            .add_service(NodeServer::new(NodeService::new(
                Arc::clone(&self.backend),
                self.mounter,
                self.node_id.clone(),
            )));

        let shutdown = self.shutdown.clone();
        match self.listen {
            Listen::Unix(path) => {
                remove_stale_socket(&path).await?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|err| {
                        DriverError::Internal(format!(
                            "failed to create {}: {err}",
                            parent.display()
                        ))
                    })?;
                }
                let listener = UnixListener::bind(&path).map_err(|err| {
                    DriverError::Internal(format!("failed to bind {}: {err}", path.display()))
                })?;
                info!(socket = %path.display(), "listening");
                router
                    .serve_with_incoming_shutdown(
                        UnixListenerStream::new(listener),
                        shutdown.cancelled(),
                    )
                    .await
                    .map_err(|err| DriverError::Internal(format!("gRPC server failed: {err}")))?;
            }
            Listen::Tcp(addr) => {
                info!(%addr, "listening");
                router
                    .serve_with_shutdown(addr, shutdown.cancelled())
                    .await
                    .map_err(|err| DriverError::Internal(format!("gRPC server failed: {err}")))?;
            }
        }

        info!("driver stopped");
        Ok(())
    }
}

// ── Endpoint handling ────────────────────────────────────────────────────────

fn parse_endpoint(endpoint: &str) -> DriverResult<Listen> {
    if let Some(rest) = endpoint.strip_prefix("unix://") {
        if rest.is_empty() {
            return Err(DriverError::invalid(format!(
                "endpoint {endpoint} names no socket path"
            )));
        }
        return Ok(Listen::Unix(PathBuf::from(rest)));
    }
    if let Some(rest) = endpoint.strip_prefix("tcp://") {
        let addr = rest.parse::<SocketAddr>().map_err(|err| {
            DriverError::invalid(format!("endpoint {endpoint} is not a socket address: {err}"))
        })?;
        return Ok(Listen::Tcp(addr));
    }
    Err(DriverError::invalid(format!(
        "endpoint {endpoint} must use the unix:// or tcp:// scheme"
    )))
}

/// A socket file left by a previous instance would make bind fail.
async fn remove_stale_socket(path: &PathBuf) -> DriverResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            warn!(socket = %path.display(), "removed stale socket file");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(DriverError::Internal(format!(
            "failed to remove {}: {err}",
            path.display()
        ))),
    }
}

// ── Node self-discovery ──────────────────────────────────────────────────────

/// Match this machine's DMI product UUID against the control plane's node
/// records to learn which cluster node the driver runs on.
async fn discover_node_id(backend: &StorageBackendRef, grid: &str) -> DriverResult<String> {
    let uuid = tokio::fs::read_to_string(PRODUCT_UUID_PATH)
        .await
        .map_err(|err| {
            DriverError::Internal(format!("failed to read {PRODUCT_UUID_PATH}: {err}"))
        })?;
    let uuid = uuid.trim().to_lowercase();

    let node = backend.node_by_reference(&uuid).await?;
    Ok(RemoteId::new(grid, node.id).to_string())
}

// ── Token housekeeping ───────────────────────────────────────────────────────

fn spawn_token_refresher(backend: StorageBackendRef, shutdown: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(TOKEN_REFRESH_INTERVAL) => {}
            }

            while let Err(err) = backend.refresh_token().await {
                warn!(
                    error = %err,
                    "token refresh failed, retrying in {}s",
                    TOKEN_RETRY_DELAY.as_secs()
                );
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    () = tokio::time::sleep(TOKEN_RETRY_DELAY) => {}
                }
            }
            info!("refreshed API token");
        }
    });
}
