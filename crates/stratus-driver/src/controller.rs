//! CSI controller service
//!
//! Provisioning talks to the control plane directly; attach/detach goes
//! through the [`Reconciler`] so mutations of attachment state stay
//! serialized.

use std::collections::HashMap;

use stratus_cloud::{StorageBackendRef, VolumeCreate, VolumeDelete, VolumeInfo};
use stratus_proto::csi::controller_server::Controller;
use stratus_proto::csi::validate_volume_capabilities_response::Confirmed;
use stratus_proto::csi::volume_capability::access_mode::Mode;
use stratus_proto::csi::{
    controller_service_capability, ControllerExpandVolumeRequest, ControllerExpandVolumeResponse,
    ControllerGetCapabilitiesRequest, ControllerGetCapabilitiesResponse,
    ControllerPublishVolumeRequest, ControllerPublishVolumeResponse, ControllerServiceCapability,
    ControllerUnpublishVolumeRequest, ControllerUnpublishVolumeResponse, CreateSnapshotRequest,
    CreateSnapshotResponse, CreateVolumeRequest, CreateVolumeResponse, DeleteSnapshotRequest,
    DeleteSnapshotResponse, DeleteVolumeRequest, DeleteVolumeResponse, GetCapacityRequest,
    GetCapacityResponse, ListSnapshotsRequest, ListSnapshotsResponse, ListVolumesRequest,
    ListVolumesResponse, ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse,
    Volume, VolumeCapability,
};
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::capacity::{extract_storage, GIB};
use crate::error::{DriverError, DriverResult};
use crate::id::RemoteId;
use crate::reconciler::{AttachmentOp, Reconciler};

/// Description stamped on every volume this driver provisions
const VOLUME_DESCRIPTION: &str = "Created by the Stratus disk CSI driver";

pub struct ControllerService {
    backend: StorageBackendRef,
    reconciler: Reconciler,
    account_id: u64,
    grid_id: u64,
    grid: String,
}

impl ControllerService {
    #[must_use]
    pub fn new(
        backend: StorageBackendRef,
        reconciler: Reconciler,
        account_id: u64,
        grid_id: u64,
        grid: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            reconciler,
            account_id,
            grid_id,
            grid: grid.into(),
        }
    }

    fn volume_response(&self, volume: &VolumeInfo) -> Volume {
        Volume {
            capacity_bytes: capacity_bytes(volume.size_gib),
            volume_id: RemoteId::new(&self.grid, volume.id).to_string(),
            volume_context: HashMap::new(),
        }
    }
}

// ── Capability policy ────────────────────────────────────────────────────────

/// Block devices attach to exactly one node, so only single-node-writer
/// access is offered.
fn capability_supported(capability: &VolumeCapability) -> bool {
    capability
        .access_mode
        .as_ref()
        .is_some_and(|mode| mode.mode == Mode::SingleNodeWriter as i32)
}

fn validate_capabilities(capabilities: &[VolumeCapability]) -> DriverResult<()> {
    if capabilities.is_empty() {
        return Err(DriverError::invalid("volume capabilities missing in request"));
    }
    for capability in capabilities {
        if !capability_supported(capability) {
            return Err(DriverError::invalid(
                "only single-node writer volumes are supported",
            ));
        }
    }
    Ok(())
}

fn capacity_bytes(size_gib: u64) -> i64 {
    i64::try_from(size_gib).unwrap_or(i64::MAX).saturating_mul(GIB)
}

// ── Service implementation ───────────────────────────────────────────────────

#[tonic::async_trait]
impl Controller for ControllerService {
    async fn create_volume(
        &self,
        request: Request<CreateVolumeRequest>,
    ) -> Result<Response<CreateVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.name.is_empty() {
            return Err(DriverError::invalid("volume name missing in request").into());
        }
        validate_capabilities(&request.volume_capabilities)?;

        let size = extract_storage(request.capacity_range.as_ref())
            .map_err(|err| DriverError::OutOfRange(err.to_string()))?;

        // Provisioners retry; a volume with this name may already exist.
        let volumes = self
            .backend
            .list_volumes(self.account_id)
            .await
            .map_err(DriverError::from)?;
        if let Some(existing) = volumes.iter().find(|volume| volume.name == request.name) {
            info!(name = %request.name, volume_id = existing.id, "volume already exists");
            return Ok(Response::new(CreateVolumeResponse {
                volume: Some(self.volume_response(existing)),
            }));
        }

        let config = VolumeCreate {
            name: request.name.clone(),
            size_gib: (size / GIB).unsigned_abs(),
            account_id: self.account_id,
            grid_id: self.grid_id,
            description: VOLUME_DESCRIPTION.to_string(),
        };
        let id = self
            .backend
            .create_volume(&config)
            .await
            .map_err(DriverError::from)?;
        info!(name = %request.name, volume_id = id, size = config.size_gib, "created volume");

        Ok(Response::new(CreateVolumeResponse {
            volume: Some(Volume {
                capacity_bytes: capacity_bytes(config.size_gib),
                volume_id: RemoteId::new(&self.grid, id).to_string(),
                volume_context: HashMap::new(),
            }),
        }))
    }

    async fn delete_volume(
        &self,
        request: Request<DeleteVolumeRequest>,
    ) -> Result<Response<DeleteVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(DriverError::invalid("volume ID missing in request").into());
        }
        let volume: RemoteId = request
            .volume_id
            .parse()
            .map_err(DriverError::from)?;

        let config = VolumeDelete {
            volume_id: volume.id,
            detach: true,
            permanent: true,
        };
        match self.backend.delete_volume(&config).await {
            Ok(()) => info!(volume_id = volume.id, "deleted volume"),
            // Deleting a volume that is already gone is a success.
            Err(err) if err.is_not_found() => {
                info!(volume_id = volume.id, "volume already deleted");
            }
            Err(err) => return Err(DriverError::from(err).into()),
        }

        Ok(Response::new(DeleteVolumeResponse {}))
    }

    async fn controller_publish_volume(
        &self,
        request: Request<ControllerPublishVolumeRequest>,
    ) -> Result<Response<ControllerPublishVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(DriverError::invalid("volume ID missing in request").into());
        }
        if request.node_id.is_empty() {
            return Err(DriverError::invalid("node ID missing in request").into());
        }
        let Some(capability) = request.volume_capability else {
            return Err(DriverError::invalid("volume capability missing in request").into());
        };
        if !capability_supported(&capability) {
            return Err(
                DriverError::invalid("only single-node writer volumes are supported").into(),
            );
        }
        if request.readonly {
            return Err(DriverError::invalid("readonly volumes are not supported").into());
        }

        let volume_id: RemoteId = request.volume_id.parse().map_err(DriverError::from)?;
        let node_id: RemoteId = request.node_id.parse().map_err(DriverError::from)?;

        // Resolve both ends before mutating anything, so a stale ID fails
        // with NOT_FOUND instead of queueing a doomed attach.
        let volume = self
            .backend
            .get_volume(volume_id.id)
            .await
            .map_err(DriverError::from)?;
        self.backend
            .get_node(node_id.id)
            .await
            .map_err(DriverError::from)?;

        self.reconciler
            .submit(AttachmentOp::Attach, node_id.id, volume_id.id)
            .await
            .map_err(DriverError::from)?;

        let publish_context = HashMap::from([
            ("volume_name".to_string(), volume.name),
            ("volume_id".to_string(), volume_id.id.to_string()),
            ("node_id".to_string(), node_id.id.to_string()),
        ]);
        Ok(Response::new(ControllerPublishVolumeResponse {
            publish_context,
        }))
    }

    async fn controller_unpublish_volume(
        &self,
        request: Request<ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<ControllerUnpublishVolumeResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(DriverError::invalid("volume ID missing in request").into());
        }
        let volume_id: RemoteId = request.volume_id.parse().map_err(DriverError::from)?;

        // The node ID is advisory: detach locates the actual holder. A node
        // that left the cluster must not block volume cleanup.
        let node_id = match request.node_id.parse::<RemoteId>() {
            Ok(node) => node.id,
            Err(err) => {
                warn!(node_id = %request.node_id, error = %err, "ignoring unusable node ID");
                0
            }
        };

        self.reconciler
            .submit(AttachmentOp::Detach, node_id, volume_id.id)
            .await
            .map_err(DriverError::from)?;

        Ok(Response::new(ControllerUnpublishVolumeResponse {}))
    }

    async fn validate_volume_capabilities(
        &self,
        request: Request<ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<ValidateVolumeCapabilitiesResponse>, Status> {
        let request = request.into_inner();
        if request.volume_id.is_empty() {
            return Err(DriverError::invalid("volume ID missing in request").into());
        }
        if request.volume_capabilities.is_empty() {
            return Err(DriverError::invalid("volume capabilities missing in request").into());
        }
        let volume_id: RemoteId = request.volume_id.parse().map_err(DriverError::from)?;
        self.backend
            .get_volume(volume_id.id)
            .await
            .map_err(DriverError::from)?;

        let supported = request
            .volume_capabilities
            .iter()
            .all(capability_supported);
        let response = if supported {
            ValidateVolumeCapabilitiesResponse {
                confirmed: Some(Confirmed {
                    volume_context: request.volume_context,
                    volume_capabilities: request.volume_capabilities,
                    parameters: request.parameters,
                }),
                message: String::new(),
            }
        } else {
            ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: "only single-node writer volumes are supported".to_string(),
            }
        };
        Ok(Response::new(response))
    }

    async fn list_volumes(
        &self,
        _request: Request<ListVolumesRequest>,
    ) -> Result<Response<ListVolumesResponse>, Status> {
        let volumes = self
            .backend
            .list_volumes(self.account_id)
            .await
            .map_err(DriverError::from)?;

        let entries = volumes
            .iter()
            .map(|volume| stratus_proto::csi::list_volumes_response::Entry {
                volume: Some(self.volume_response(volume)),
            })
            .collect();
        Ok(Response::new(ListVolumesResponse {
            entries,
            next_token: String::new(),
        }))
    }

    async fn get_capacity(
        &self,
        _request: Request<GetCapacityRequest>,
    ) -> Result<Response<GetCapacityResponse>, Status> {
        Err(DriverError::Unimplemented("GetCapacity").into())
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<ControllerGetCapabilitiesResponse>, Status> {
        let capabilities = [
            controller_service_capability::rpc::Type::CreateDeleteVolume,
            controller_service_capability::rpc::Type::PublishUnpublishVolume,
            controller_service_capability::rpc::Type::ListVolumes,
        ]
        .into_iter()
        .map(|capability| ControllerServiceCapability {
            r#type: Some(controller_service_capability::Type::Rpc(
                controller_service_capability::Rpc {
                    r#type: capability as i32,
                },
            )),
        })
        .collect();

        Ok(Response::new(ControllerGetCapabilitiesResponse {
            capabilities,
        }))
    }

    async fn create_snapshot(
        &self,
        _request: Request<CreateSnapshotRequest>,
    ) -> Result<Response<CreateSnapshotResponse>, Status> {
        Err(DriverError::Unimplemented("CreateSnapshot").into())
    }

    async fn delete_snapshot(
        &self,
        _request: Request<DeleteSnapshotRequest>,
    ) -> Result<Response<DeleteSnapshotResponse>, Status> {
        Err(DriverError::Unimplemented("DeleteSnapshot").into())
    }

    async fn list_snapshots(
        &self,
        _request: Request<ListSnapshotsRequest>,
    ) -> Result<Response<ListSnapshotsResponse>, Status> {
        Err(DriverError::Unimplemented("ListSnapshots").into())
    }

    async fn controller_expand_volume(
        &self,
        _request: Request<ControllerExpandVolumeRequest>,
    ) -> Result<Response<ControllerExpandVolumeResponse>, Status> {
        Err(DriverError::Unimplemented("ControllerExpandVolume").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::DEFAULT_VOLUME_SIZE;
    use crate::testutil::MockBackend;
    use std::sync::Arc;
    use stratus_proto::csi::volume_capability::{AccessMode, AccessType};
    use stratus_proto::csi::CapacityRange;
    use tokio_util::sync::CancellationToken;

    fn writer_capability() -> VolumeCapability {
        VolumeCapability {
            access_type: Some(AccessType::Mount(Default::default())),
            access_mode: Some(AccessMode {
                mode: Mode::SingleNodeWriter as i32,
            }),
        }
    }

    fn service(mock: &Arc<MockBackend>) -> (ControllerService, CancellationToken) {
        let shutdown = CancellationToken::new();
        let backend: StorageBackendRef = Arc::clone(mock) as StorageBackendRef;
        let reconciler =
            Reconciler::spawn(Arc::clone(&backend), MockBackend::GRID, shutdown.clone());
        let controller = ControllerService::new(
            backend,
            reconciler,
            MockBackend::ACCOUNT,
            MockBackend::GRID,
            "g1",
        );
        (controller, shutdown)
    }

    fn create_request(name: &str) -> CreateVolumeRequest {
        CreateVolumeRequest {
            name: name.to_string(),
            capacity_range: None,
            volume_capabilities: vec![writer_capability()],
            parameters: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_volume() {
        let mock = Arc::new(MockBackend::new());
        let (controller, _shutdown) = service(&mock);

        let response = controller
            .create_volume(Request::new(create_request("pvc-1")))
            .await
            .unwrap()
            .into_inner();

        let volume = response.volume.unwrap();
        assert_eq!(volume.volume_id, "g1@100");
        assert_eq!(volume.capacity_bytes, DEFAULT_VOLUME_SIZE);
        assert_eq!(mock.calls().create, 1);
    }

    #[tokio::test]
    async fn test_create_volume_is_idempotent() {
        let mock = Arc::new(MockBackend::new().with_volume(50, "pvc-1", 10));
        let (controller, _shutdown) = service(&mock);

        let response = controller
            .create_volume(Request::new(create_request("pvc-1")))
            .await
            .unwrap()
            .into_inner();

        let volume = response.volume.unwrap();
        assert_eq!(volume.volume_id, "g1@50");
        assert_eq!(volume.capacity_bytes, 10 * GIB);
        assert_eq!(mock.calls().create, 0);
    }

    #[tokio::test]
    async fn test_create_volume_rejects_bad_requests() {
        let mock = Arc::new(MockBackend::new());
        let (controller, _shutdown) = service(&mock);

        let status = controller
            .create_volume(Request::new(create_request("")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let mut request = create_request("pvc-1");
        request.volume_capabilities.clear();
        let status = controller
            .create_volume(Request::new(request))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let mut request = create_request("pvc-1");
        request.capacity_range = Some(CapacityRange {
            required_bytes: GIB / 2,
            limit_bytes: 0,
        });
        let status = controller
            .create_volume(Request::new(request))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::OutOfRange);
        assert_eq!(mock.calls().create, 0);
    }

    #[tokio::test]
    async fn test_delete_volume() {
        let mock = Arc::new(MockBackend::new().with_volume(50, "pvc-1", 10));
        let (controller, _shutdown) = service(&mock);

        controller
            .delete_volume(Request::new(DeleteVolumeRequest {
                volume_id: "g1@50".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(mock.calls().delete, 1);

        // Gone already: still a success.
        controller
            .delete_volume(Request::new(DeleteVolumeRequest {
                volume_id: "g1@50".to_string(),
            }))
            .await
            .unwrap();

        let status = controller
            .delete_volume(Request::new(DeleteVolumeRequest {
                volume_id: "not-a-composite-id".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    fn publish_request(volume_id: &str, node_id: &str) -> ControllerPublishVolumeRequest {
        ControllerPublishVolumeRequest {
            volume_id: volume_id.to_string(),
            node_id: node_id.to_string(),
            volume_capability: Some(writer_capability()),
            readonly: false,
        }
    }

    #[tokio::test]
    async fn test_publish_attaches_volume() {
        let mock = Arc::new(
            MockBackend::new()
                .with_volume(50, "pvc-1", 10)
                .with_node(1, &[]),
        );
        let (controller, _shutdown) = service(&mock);

        let response = controller
            .controller_publish_volume(Request::new(publish_request("g1@50", "g1@1")))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(mock.attach_log(), vec![(1, 50)]);
        assert_eq!(
            response.publish_context.get("volume_name"),
            Some(&"pvc-1".to_string())
        );
        assert_eq!(
            response.publish_context.get("volume_id"),
            Some(&"50".to_string())
        );
        assert_eq!(
            response.publish_context.get("node_id"),
            Some(&"1".to_string())
        );
    }

    #[tokio::test]
    async fn test_publish_rejections() {
        let mock = Arc::new(
            MockBackend::new()
                .with_volume(50, "pvc-1", 10)
                .with_node(1, &[]),
        );
        let (controller, _shutdown) = service(&mock);

        let mut request = publish_request("g1@50", "g1@1");
        request.readonly = true;
        let status = controller
            .controller_publish_volume(Request::new(request))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let mut request = publish_request("g1@50", "g1@1");
        request.volume_capability = None;
        let status = controller
            .controller_publish_volume(Request::new(request))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = controller
            .controller_publish_volume(Request::new(publish_request("g1@999", "g1@1")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let status = controller
            .controller_publish_volume(Request::new(publish_request("g1@50", "g1@9")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);

        assert_eq!(mock.calls().attach, 0);
    }

    #[tokio::test]
    async fn test_unpublish_detaches_despite_bad_node_id() {
        let mock = Arc::new(
            MockBackend::new()
                .with_volume(50, "pvc-1", 10)
                .with_node(1, &[50]),
        );
        let (controller, _shutdown) = service(&mock);

        controller
            .controller_unpublish_volume(Request::new(ControllerUnpublishVolumeRequest {
                volume_id: "g1@50".to_string(),
                node_id: "garbage".to_string(),
            }))
            .await
            .unwrap();

        assert_eq!(mock.detach_log(), vec![(1, 50)]);
    }

    #[tokio::test]
    async fn test_validate_volume_capabilities() {
        let mock = Arc::new(MockBackend::new().with_volume(50, "pvc-1", 10));
        let (controller, _shutdown) = service(&mock);

        let response = controller
            .validate_volume_capabilities(Request::new(ValidateVolumeCapabilitiesRequest {
                volume_id: "g1@50".to_string(),
                volume_context: HashMap::new(),
                volume_capabilities: vec![writer_capability()],
                parameters: HashMap::new(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.confirmed.is_some());

        let mut multi_writer = writer_capability();
        multi_writer.access_mode = Some(AccessMode {
            mode: Mode::MultiNodeMultiWriter as i32,
        });
        let response = controller
            .validate_volume_capabilities(Request::new(ValidateVolumeCapabilitiesRequest {
                volume_id: "g1@50".to_string(),
                volume_context: HashMap::new(),
                volume_capabilities: vec![multi_writer],
                parameters: HashMap::new(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.confirmed.is_none());
        assert!(!response.message.is_empty());

        let status = controller
            .validate_volume_capabilities(Request::new(ValidateVolumeCapabilitiesRequest {
                volume_id: "g1@999".to_string(),
                volume_context: HashMap::new(),
                volume_capabilities: vec![writer_capability()],
                parameters: HashMap::new(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_capabilities_and_unimplemented() {
        let mock = Arc::new(MockBackend::new());
        let (controller, _shutdown) = service(&mock);

        let response = controller
            .controller_get_capabilities(Request::new(ControllerGetCapabilitiesRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.capabilities.len(), 3);

        let status = controller
            .get_capacity(Request::new(GetCapacityRequest {
                volume_capabilities: vec![],
                parameters: HashMap::new(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }
}
