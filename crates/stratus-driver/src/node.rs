//! CSI node service
//!
//! Stages the attached block device under the kubelet staging path and bind
//! mounts it into workload target paths. All host interaction goes through
//! the [`Mounter`] seam.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stratus_cloud::StorageBackendRef;
use stratus_proto::csi::node_server::Node;
use stratus_proto::csi::volume_capability::access_mode::Mode;
use stratus_proto::csi::volume_capability::AccessType;
use stratus_proto::csi::{
    node_service_capability, NodeExpandVolumeRequest, NodeExpandVolumeResponse,
    NodeGetCapabilitiesRequest, NodeGetCapabilitiesResponse, NodeGetInfoRequest,
    NodeGetInfoResponse, NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse,
    NodePublishVolumeRequest, NodePublishVolumeResponse, NodeServiceCapability,
    NodeStageVolumeRequest, NodeStageVolumeResponse, NodeUnpublishVolumeRequest,
    NodeUnpublishVolumeResponse, NodeUnstageVolumeRequest, NodeUnstageVolumeResponse,
    VolumeCapability,
};
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::device;
use crate::error::{DriverError, DriverResult};
use crate::id::RemoteId;
use crate::mount::Mounter;

/// Filesystem used when the request does not name one
const DEFAULT_FS_TYPE: &str = "ext4";

pub struct NodeService {
    backend: StorageBackendRef,
    mounter: Arc<dyn Mounter>,
    node_id: String,
    sys_block: PathBuf,
    dev: PathBuf,
}

impl NodeService {
    #[must_use]
    pub fn new(
        backend: StorageBackendRef,
        mounter: Arc<dyn Mounter>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            mounter,
            node_id: node_id.into(),
            sys_block: PathBuf::from(device::SYS_BLOCK),
            dev: PathBuf::from(device::DEV),
        }
    }

    #[cfg(test)]
    fn with_device_roots(mut self, sys_block: PathBuf, dev: PathBuf) -> Self {
        self.sys_block = sys_block;
        self.dev = dev;
        self
    }

    /// `/dev` path of the device backing `volume_id` on this node.
    async fn backing_device(&self, volume_id: u64) -> DriverResult<PathBuf> {
        let volume = self.backend.get_volume(volume_id).await?;
        let Some(device_name) = volume.device_name else {
            return Err(DriverError::Internal(format!(
                "volume {volume_id} has no device name, is it attached?"
            )));
        };
        device::resolve(&self.sys_block, &self.dev, &device_name).await
    }
}

fn mount_settings(capability: &VolumeCapability) -> DriverResult<(String, Vec<String>)> {
    match &capability.access_type {
        Some(AccessType::Mount(mount)) => {
            let fs_type = if mount.fs_type.is_empty() {
                DEFAULT_FS_TYPE.to_string()
            } else {
                mount.fs_type.clone()
            };
            Ok((fs_type, mount.mount_flags.clone()))
        }
        Some(AccessType::Block(_)) => Err(DriverError::invalid(
            "raw block volumes are not supported",
        )),
        None => Ok((DEFAULT_FS_TYPE.to_string(), Vec::new())),
    }
}

fn validate_access_mode(capability: &VolumeCapability) -> DriverResult<()> {
    let supported = capability
        .access_mode
        .as_ref()
        .is_some_and(|mode| mode.mode == Mode::SingleNodeWriter as i32);
    if supported {
        Ok(())
    } else {
        Err(DriverError::invalid(
            "only single-node writer volumes are supported",
        ))
    }
}

#[tonic::async_trait]
impl Node for NodeService {
    async fn node_stage_volume(
        &self,
        request: Request<NodeStageVolumeRequest>,
    ) -> Result<Response<NodeStageVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(DriverError::invalid("volume ID missing in request").into());
        }
        if request.staging_target_path.is_empty() {
            return Err(DriverError::invalid("staging target path missing in request").into());
        }
        let Some(capability) = request.volume_capability else {
            return Err(DriverError::invalid("volume capability missing in request").into());
        };
        validate_access_mode(&capability)?;
        let (fs_type, options) = mount_settings(&capability)?;

        let volume_id: RemoteId = request.volume_id.parse().map_err(DriverError::from)?;
        let staging = Path::new(&request.staging_target_path);

        let source = self.backing_device(volume_id.id).await?;
        self.mounter.make_dir(staging).await?;
        if self.mounter.is_mount_point(staging).await? {
            debug!(volume_id = volume_id.id, staging = %staging.display(), "already staged");
            return Ok(Response::new(NodeStageVolumeResponse {}));
        }

        self.mounter
            .format_and_mount(&source, staging, &fs_type, &options)
            .await?;
        info!(
            volume_id = volume_id.id,
            device = %source.display(),
            staging = %staging.display(),
            fs_type,
            "staged volume"
        );
        Ok(Response::new(NodeStageVolumeResponse {}))
    }

    async fn node_unstage_volume(
        &self,
        request: Request<NodeUnstageVolumeRequest>,
    ) -> Result<Response<NodeUnstageVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(DriverError::invalid("volume ID missing in request").into());
        }
        if request.staging_target_path.is_empty() {
            return Err(DriverError::invalid("staging target path missing in request").into());
        }
        let staging = Path::new(&request.staging_target_path);

        if self.mounter.is_mount_point(staging).await? {
            self.mounter.unmount(staging).await?;
            info!(volume_id = %request.volume_id, staging = %staging.display(), "unstaged volume");
        } else {
            debug!(staging = %staging.display(), "not mounted, nothing to unstage");
        }
        Ok(Response::new(NodeUnstageVolumeResponse {}))
    }

    async fn node_publish_volume(
        &self,
        request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(DriverError::invalid("volume ID missing in request").into());
        }
        if request.staging_target_path.is_empty() {
            return Err(DriverError::invalid("staging target path missing in request").into());
        }
        if request.target_path.is_empty() {
            return Err(DriverError::invalid("target path missing in request").into());
        }
        let Some(capability) = request.volume_capability else {
            return Err(DriverError::invalid("volume capability missing in request").into());
        };
        validate_access_mode(&capability)?;

        let staging = Path::new(&request.staging_target_path);
        let target = Path::new(&request.target_path);

        self.mounter.make_dir(target).await?;
        if self.mounter.is_mount_point(target).await? {
            debug!(target = %target.display(), "already published");
            return Ok(Response::new(NodePublishVolumeResponse {}));
        }

        let mut options = vec!["bind".to_string()];
        if request.readonly {
            options.push("ro".to_string());
        }
        self.mounter.mount(staging, target, "", &options).await?;
        info!(
            volume_id = %request.volume_id,
            target = %target.display(),
            readonly = request.readonly,
            "published volume"
        );
        Ok(Response::new(NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(DriverError::invalid("volume ID missing in request").into());
        }
        if request.target_path.is_empty() {
            return Err(DriverError::invalid("target path missing in request").into());
        }
        let target = Path::new(&request.target_path);

        if self.mounter.is_mount_point(target).await? {
            self.mounter.unmount(target).await?;
            info!(volume_id = %request.volume_id, target = %target.display(), "unpublished volume");
        } else {
            debug!(target = %target.display(), "not mounted, nothing to unpublish");
        }
        Ok(Response::new(NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_volume_stats(
        &self,
        _request: Request<NodeGetVolumeStatsRequest>,
    ) -> Result<Response<NodeGetVolumeStatsResponse>, Status> {
        Err(DriverError::Unimplemented("NodeGetVolumeStats").into())
    }

    async fn node_expand_volume(
        &self,
        _request: Request<NodeExpandVolumeRequest>,
    ) -> Result<Response<NodeExpandVolumeResponse>, Status> {
        Err(DriverError::Unimplemented("NodeExpandVolume").into())
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        Ok(Response::new(NodeGetCapabilitiesResponse {
            capabilities: vec![NodeServiceCapability {
                r#type: Some(node_service_capability::Type::Rpc(
                    node_service_capability::Rpc {
                        r#type: node_service_capability::rpc::Type::StageUnstageVolume as i32,
                    },
                )),
            }],
        }))
    }

    async fn node_get_info(
        &self,
        _request: Request<NodeGetInfoRequest>,
    ) -> Result<Response<NodeGetInfoResponse>, Status> {
        Ok(Response::new(NodeGetInfoResponse {
            node_id: self.node_id.clone(),
            max_volumes_per_node: 0,
        }))
    }
}
