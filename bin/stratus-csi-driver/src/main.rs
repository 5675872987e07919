#![allow(clippy::result_large_err)]
//! Stratus Disk CSI Driver
//!
//! Serves the CSI Identity, Controller and Node services over a unix socket
//! (or TCP), backed by the Stratus control-plane HTTP API.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use stratus_cloud::{ApiClient, CloudConfig};
use stratus_driver::{Driver, DriverSetup, SystemMounter};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "stratus-csi-driver", about = "Stratus Disk CSI driver")]
struct Args {
    /// CSI endpoint (unix:// or tcp://)
    #[arg(long, default_value = "unix:///var/lib/kubelet/plugins/disk.csi.stratus.cloud/csi.sock")]
    endpoint: String,

    /// Base URL of the Stratus control-plane API
    #[arg(long, env = "STRATUS_API_URL")]
    api_url: String,

    /// Grid name
    #[arg(long, env = "STRATUS_GRID")]
    grid: String,

    /// Account owning the provisioned volumes
    #[arg(long, env = "STRATUS_ACCOUNT")]
    account: String,

    /// API bearer token
    #[arg(long, env = "STRATUS_API_TOKEN", hide_env_values = true)]
    token: String,

    /// Composite node ID override; discovered from the hardware UUID when
    /// unset
    #[arg(long)]
    node_id: Option<String>,

    /// Control-plane request timeout in seconds
    #[arg(long, default_value_t = 30)]
    api_timeout_s: u64,

    /// Log level (trace / debug / info / warn / error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = stratus_driver::VERSION, "Starting Stratus Disk CSI driver");

    let config = CloudConfig {
        api_url: args.api_url,
        grid: args.grid.clone(),
        account: args.account.clone(),
        token: args.token,
        timeout_secs: args.api_timeout_s,
    };
    let backend = Arc::new(ApiClient::new(&config).context("build control-plane client")?);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let setup = DriverSetup {
        endpoint: args.endpoint,
        grid: args.grid,
        account: args.account,
        node_id: args.node_id,
    };
    let driver = Driver::init(backend, Arc::new(SystemMounter), setup, shutdown)
        .await
        .context("initialize driver")?;
    driver.run().await.context("serve CSI")?;

    Ok(())
}
