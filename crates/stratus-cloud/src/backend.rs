//! Remote Storage Backend port
//!
//! The one stable interface between the driver and the Stratus control
//! plane. Earlier driver generations carried several incompatible client
//! shapes; everything the driver needs is collapsed into this trait so the
//! reconciler and the controller can be tested against a mock.

use crate::error::CloudResult;
use crate::types::{NodeInfo, VolumeCreate, VolumeDelete, VolumeInfo};
use async_trait::async_trait;
use std::sync::Arc;

/// Operations the Stratus control plane offers the driver
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// List all volumes owned by an account
    async fn list_volumes(&self, account_id: u64) -> CloudResult<Vec<VolumeInfo>>;

    /// Create a volume, returning its remote numeric ID
    async fn create_volume(&self, config: &VolumeCreate) -> CloudResult<u64>;

    /// Delete a volume
    async fn delete_volume(&self, config: &VolumeDelete) -> CloudResult<()>;

    /// Fetch one volume
    async fn get_volume(&self, volume_id: u64) -> CloudResult<VolumeInfo>;

    /// Attach a volume to a node
    async fn attach_volume(&self, node_id: u64, volume_id: u64) -> CloudResult<()>;

    /// Detach a volume from a node
    async fn detach_volume(&self, node_id: u64, volume_id: u64) -> CloudResult<()>;

    /// List all nodes in a grid with their attachments
    async fn list_nodes(&self, grid_id: u64) -> CloudResult<Vec<NodeInfo>>;

    /// Fetch one node
    async fn get_node(&self, node_id: u64) -> CloudResult<NodeInfo>;

    /// Look a node up by its hardware reference UUID
    async fn node_by_reference(&self, reference_id: &str) -> CloudResult<NodeInfo>;

    /// Resolve an account name to its numeric ID
    async fn account_id(&self, name: &str) -> CloudResult<u64>;

    /// Resolve a grid name to its numeric ID
    async fn grid_id(&self, name: &str) -> CloudResult<u64>;

    /// Refresh the API token before it expires
    async fn refresh_token(&self) -> CloudResult<()>;
}

pub type StorageBackendRef = Arc<dyn StorageBackend>;
