//! In-memory control plane for tests
//!
//! `MockBackend` models the remote attachment state directly, counts every
//! remote call, and can be told to fail the next N attach/detach/list
//! operations.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use stratus_cloud::{
    CloudError, CloudResult, NodeInfo, StorageBackend, VolumeCreate, VolumeDelete, VolumeInfo,
};

/// Remote call counters
#[derive(Clone, Copy, Debug, Default)]
pub struct CallCounts {
    pub list_volumes: usize,
    pub create: usize,
    pub delete: usize,
    pub get_volume: usize,
    pub attach: usize,
    pub detach: usize,
    pub list_nodes: usize,
    pub get_node: usize,
}

#[derive(Default)]
struct State {
    nodes: HashMap<u64, NodeInfo>,
    volumes: HashMap<u64, VolumeInfo>,
    next_volume_id: u64,
    fail_attach: usize,
    fail_detach: usize,
    fail_list_nodes: usize,
    calls: CallCounts,
    attach_log: Vec<(u64, u64)>,
    detach_log: Vec<(u64, u64)>,
}

pub struct MockBackend {
    state: Mutex<State>,
}

fn injected(op: &str) -> CloudError {
    CloudError::Api {
        status: 500,
        message: format!("injected {op} failure"),
    }
}

impl MockBackend {
    /// Account every mock volume belongs to
    pub const ACCOUNT: u64 = 7;
    /// Grid every mock node lives in
    pub const GRID: u64 = 1;

    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_volume_id: 100,
                ..State::default()
            }),
        }
    }

    #[must_use]
    pub fn with_node(self, id: u64, volume_ids: &[u64]) -> Self {
        self.state.lock().nodes.insert(
            id,
            NodeInfo {
                id,
                name: format!("node-{id}"),
                reference_id: format!("ref-{id}"),
                volume_ids: volume_ids.to_vec(),
            },
        );
        self
    }

    #[must_use]
    pub fn with_volume(self, id: u64, name: &str, size_gib: u64) -> Self {
        self.state.lock().volumes.insert(
            id,
            VolumeInfo {
                id,
                name: name.to_string(),
                size_gib,
                description: String::new(),
                account_id: Self::ACCOUNT,
                node_id: None,
                device_name: Some(format!("vd{id}")),
            },
        );
        self
    }

    pub fn fail_next_attach(&self, count: usize) {
        self.state.lock().fail_attach = count;
    }

    pub fn fail_next_detach(&self, count: usize) {
        self.state.lock().fail_detach = count;
    }

    pub fn fail_next_list_nodes(&self, count: usize) {
        self.state.lock().fail_list_nodes = count;
    }

    /// Mutate remote state behind the driver's back.
    pub fn move_volume(&self, volume_id: u64, from: u64, to: u64) {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get_mut(&from) {
            node.volume_ids.retain(|id| *id != volume_id);
        }
        if let Some(node) = state.nodes.get_mut(&to) {
            node.volume_ids.push(volume_id);
        }
    }

    pub fn calls(&self) -> CallCounts {
        self.state.lock().calls
    }

    pub fn attach_log(&self) -> Vec<(u64, u64)> {
        self.state.lock().attach_log.clone()
    }

    pub fn detach_log(&self) -> Vec<(u64, u64)> {
        self.state.lock().detach_log.clone()
    }

    /// Current remote attachment state as node → volume set.
    pub fn attachments(&self) -> HashMap<u64, HashSet<u64>> {
        self.state
            .lock()
            .nodes
            .values()
            .map(|node| (node.id, node.volume_ids.iter().copied().collect()))
            .collect()
    }

    /// Expected-state literal for comparisons against [`Self::attachments`].
    pub fn state(entries: &[(u64, &[u64])]) -> HashMap<u64, HashSet<u64>> {
        entries
            .iter()
            .map(|(node, volumes)| (*node, volumes.iter().copied().collect()))
            .collect()
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    async fn list_volumes(&self, account_id: u64) -> CloudResult<Vec<VolumeInfo>> {
        let mut state = self.state.lock();
        state.calls.list_volumes += 1;
        Ok(state
            .volumes
            .values()
            .filter(|volume| volume.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn create_volume(&self, config: &VolumeCreate) -> CloudResult<u64> {
        let mut state = self.state.lock();
        state.calls.create += 1;
        let id = state.next_volume_id;
        state.next_volume_id += 1;
        state.volumes.insert(
            id,
            VolumeInfo {
                id,
                name: config.name.clone(),
                size_gib: config.size_gib,
                description: config.description.clone(),
                account_id: config.account_id,
                node_id: None,
                device_name: None,
            },
        );
        Ok(id)
    }

    async fn delete_volume(&self, config: &VolumeDelete) -> CloudResult<()> {
        let mut state = self.state.lock();
        state.calls.delete += 1;
        if state.volumes.remove(&config.volume_id).is_none() {
            return Err(CloudError::NotFound(format!(
                "volume {}",
                config.volume_id
            )));
        }
        if config.detach {
            for node in state.nodes.values_mut() {
                node.volume_ids.retain(|id| *id != config.volume_id);
            }
        }
        Ok(())
    }

    async fn get_volume(&self, volume_id: u64) -> CloudResult<VolumeInfo> {
        let mut state = self.state.lock();
        state.calls.get_volume += 1;
        state
            .volumes
            .get(&volume_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("volume {volume_id}")))
    }

    async fn attach_volume(&self, node_id: u64, volume_id: u64) -> CloudResult<()> {
        let mut state = self.state.lock();
        if state.fail_attach > 0 {
            state.fail_attach -= 1;
            return Err(injected("attach"));
        }
        state.calls.attach += 1;
        state.attach_log.push((node_id, volume_id));
        if let Some(node) = state.nodes.get_mut(&node_id) {
            if !node.volume_ids.contains(&volume_id) {
                node.volume_ids.push(volume_id);
            }
        }
        if let Some(volume) = state.volumes.get_mut(&volume_id) {
            volume.node_id = Some(node_id);
        }
        Ok(())
    }

    async fn detach_volume(&self, node_id: u64, volume_id: u64) -> CloudResult<()> {
        let mut state = self.state.lock();
        if state.fail_detach > 0 {
            state.fail_detach -= 1;
            return Err(injected("detach"));
        }
        state.calls.detach += 1;
        state.detach_log.push((node_id, volume_id));
        if let Some(node) = state.nodes.get_mut(&node_id) {
            node.volume_ids.retain(|id| *id != volume_id);
        }
        if let Some(volume) = state.volumes.get_mut(&volume_id) {
            volume.node_id = None;
        }
        Ok(())
    }

    async fn list_nodes(&self, _grid_id: u64) -> CloudResult<Vec<NodeInfo>> {
        let mut state = self.state.lock();
        if state.fail_list_nodes > 0 {
            state.fail_list_nodes -= 1;
            return Err(injected("list_nodes"));
        }
        state.calls.list_nodes += 1;
        Ok(state.nodes.values().cloned().collect())
    }

    async fn get_node(&self, node_id: u64) -> CloudResult<NodeInfo> {
        let mut state = self.state.lock();
        state.calls.get_node += 1;
        state
            .nodes
            .get(&node_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("node {node_id}")))
    }

    async fn node_by_reference(&self, reference_id: &str) -> CloudResult<NodeInfo> {
        let state = self.state.lock();
        state
            .nodes
            .values()
            .find(|node| node.reference_id == reference_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(format!("node ref {reference_id}")))
    }

    async fn account_id(&self, _name: &str) -> CloudResult<u64> {
        Ok(Self::ACCOUNT)
    }

    async fn grid_id(&self, _name: &str) -> CloudResult<u64> {
        Ok(Self::GRID)
    }

    async fn refresh_token(&self) -> CloudResult<()> {
        Ok(())
    }
}
