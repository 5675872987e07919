//! Wire types for the Stratus control-plane API

use serde::{Deserialize, Serialize};

/// A block volume as reported by the control plane
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Remote numeric ID
    pub id: u64,
    /// Human-readable name (unique per account)
    pub name: String,
    /// Provisioned size in GiB
    pub size_gib: u64,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Owning account
    pub account_id: u64,
    /// Node the volume is currently attached to, if any
    #[serde(default)]
    pub node_id: Option<u64>,
    /// Device name exposed on the node (e.g. "vdb"), if attached
    #[serde(default)]
    pub device_name: Option<String>,
}

/// A compute node and its attachments
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Remote numeric ID
    pub id: u64,
    /// Node name
    pub name: String,
    /// Hardware reference UUID (matches the node's SMBIOS product UUID)
    #[serde(default)]
    pub reference_id: String,
    /// Volumes currently attached to this node
    #[serde(default)]
    pub volume_ids: Vec<u64>,
}

/// A grid (partition) of the Stratus cloud
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GridInfo {
    pub id: u64,
    pub name: String,
}

/// Parameters for creating a volume
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeCreate {
    pub name: String,
    pub size_gib: u64,
    pub account_id: u64,
    pub grid_id: u64,
    pub description: String,
}

/// Parameters for deleting a volume
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VolumeDelete {
    pub volume_id: u64,
    /// Detach from any node before deleting
    pub detach: bool,
    /// Skip the recycle bin
    pub permanent: bool,
}
