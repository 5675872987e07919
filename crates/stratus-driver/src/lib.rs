#![allow(clippy::result_large_err)]
//! Stratus Disk CSI Driver
//!
//! Exposes Stratus Cloud block volumes to Kubernetes through the CSI
//! protocol. Volume create/delete and node lookups go straight to the
//! control plane; every attach/detach mutation is serialized through the
//! [`reconciler::Reconciler`], the single owner of the cached
//! node→attached-volume inventory.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   kubelet / CO   │  (gRPC over unix socket)
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐
//! │  CSI services    │  Identity / Controller / Node
//! │  - validation    │
//! │  - translation   │
//! └───┬─────────┬────┘
//!     │         │ attach/detach only
//!     │  ┌──────▼───────┐
//!     │  │  Reconciler  │  single worker, owns Inventory
//!     │  └──────┬───────┘
//! ┌───▼─────────▼────┐
//! │  StorageBackend  │  Stratus control-plane HTTP API
//! └──────────────────┘
//! ```

pub mod capacity;
pub mod controller;
mod device;
pub mod driver;
pub mod error;
pub mod id;
pub mod identity;
pub mod mount;
pub mod node;
pub mod reconciler;

#[cfg(test)]
pub(crate) mod testutil;

pub use controller::ControllerService;
pub use driver::{Driver, DriverSetup};
pub use error::{DriverError, DriverResult};
pub use id::RemoteId;
pub use identity::IdentityService;
pub use mount::{Mounter, SystemMounter};
pub use node::NodeService;
pub use reconciler::{AttachmentOp, ReconcileError, Reconciler};

/// CSI plugin name announced by the Identity service
pub const DRIVER_NAME: &str = "disk.csi.stratus.cloud";

/// Driver version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
