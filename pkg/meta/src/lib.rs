//! Node wiring: the CMG, the raft-replicated partition storages, the lock
//! manager, and the router, tied together behind the thin management
//! functions an external REST layer (out of scope here) would call.

use std::collections::HashMap;
use std::sync::Arc;

use cmg::{Cmg, ClusterState, LocalStateStore};
use common::errors::Result;
use lock::LockTable;
use router::Router;
use rpc::NodeId;
use storage::{PartitionKey, PartitionStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyKind {
    Logical,
    Physical,
}

/// Mirrors the REST surface's status split: 400 on bad arguments,
/// 500 on transient failure. No HTTP framing lives here -- the management
/// plane is out of this crate's scope, only the decisions it would report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagementError {
    InvalidArgument(String),
    Transient(String),
}

impl From<cmg::CmgError> for ManagementError {
    fn from(err: cmg::CmgError) -> Self {
        match err {
            cmg::CmgError::IllegalInitArgument(msg) => ManagementError::InvalidArgument(msg),
            cmg::CmgError::NodeStopping => ManagementError::Transient(err.to_string()),
        }
    }
}

pub struct Node<S: LocalStateStore> {
    pub node_id: NodeId,
    pub clock: hlc::HybridClock,
    pub cmg: Cmg<S>,
    pub router: Router,
    pub locks: LockTable,
    partitions: std::sync::RwLock<HashMap<PartitionKey, Arc<PartitionStorage>>>,
}

impl<S: LocalStateStore> Node<S> {
    pub fn new(node_id: NodeId, partition_count: u32, cmg_store: S) -> Self {
        Self {
            node_id,
            clock: hlc::HybridClock::new(),
            cmg: Cmg::new(cmg_store),
            router: Router::new(partition_count),
            locks: LockTable::new(),
            partitions: std::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn partition(&self, key: PartitionKey) -> Arc<PartitionStorage> {
        if let Some(existing) = self.partitions.read().unwrap().get(&key) {
            return existing.clone();
        }
        let mut partitions = self.partitions.write().unwrap();
        partitions
            .entry(key)
            .or_insert_with(|| Arc::new(PartitionStorage::new()))
            .clone()
    }

    /// `POST /management/v1/cluster/init`.
    pub async fn init_cluster(
        &self,
        meta_storage_nodes: Vec<NodeId>,
        cmg_nodes: Vec<NodeId>,
        cluster_name: String,
    ) -> std::result::Result<(), ManagementError> {
        if cmg_nodes.is_empty() {
            return Err(ManagementError::InvalidArgument(
                "cmg_nodes must not be empty".into(),
            ));
        }

        self.cmg
            .handle_init(cmg::InitArgs {
                meta_storage_nodes,
                cmg_nodes,
                cluster_name,
            })
            .await
            .map_err(ManagementError::from)
    }

    /// `GET /management/v1/cluster/state`. `None` means 404 (uninitialized).
    pub async fn cluster_state(&self) -> Option<ClusterState> {
        self.cmg.cluster_state().await
    }

    /// `GET /management/v1/cluster/topology/{logical|physical}`.
    pub async fn topology(&self, kind: TopologyKind) -> Vec<NodeId> {
        let set = match kind {
            TopologyKind::Logical => self.cmg.logical_topology().await,
            TopologyKind::Physical => self.cmg.physical_topology().await,
        };
        let mut nodes: Vec<NodeId> = set.into_iter().collect();
        nodes.sort_unstable();
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::sync::Mutex;

    struct InMemoryStore {
        saved: Mutex<Option<cmg::InitArgs>>,
    }

    #[async_trait::async_trait]
    impl LocalStateStore for InMemoryStore {
        async fn load(&self) -> Result<Option<cmg::InitArgs>> {
            Ok(self.saved.lock().await.clone())
        }
        async fn save(&self, args: &cmg::InitArgs) -> Result<()> {
            *self.saved.lock().await = Some(args.clone());
            Ok(())
        }
        async fn clear(&self) -> Result<()> {
            *self.saved.lock().await = None;
            Ok(())
        }
    }

    #[async_std::test]
    async fn init_cluster_rejects_empty_cmg_nodes() {
        let node = Node::new(1, 4, InMemoryStore { saved: Mutex::new(None) });
        let err = node
            .init_cluster(vec![1], vec![], "c".into())
            .await
            .unwrap_err();
        assert_eq!(err, ManagementError::InvalidArgument(
            "cmg_nodes must not be empty".into()
        ));
    }

    #[async_std::test]
    async fn cluster_state_is_none_until_initialized() {
        let node = Node::new(1, 4, InMemoryStore { saved: Mutex::new(None) });
        assert!(node.cluster_state().await.is_none());
        assert!(node.topology(TopologyKind::Logical).await.is_empty());
    }

    #[test]
    fn partition_storage_is_created_lazily_and_reused() {
        let node = Node::new(1, 4, InMemoryStore { saved: Mutex::new(None) });
        let key = PartitionKey {
            table_id: common::uuid::Uuid::nil(),
            partition_id: 0,
        };
        let a = node.partition(key);
        let b = node.partition(key);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
