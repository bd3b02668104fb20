use std::collections::HashSet;

use common::uuid::Uuid;
use rpc::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmgState {
    Uninitialized,
    Initializing,
    Validated,
    Ready,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitArgs {
    pub meta_storage_nodes: Vec<NodeId>,
    pub cmg_nodes: Vec<NodeId>,
    pub cluster_name: String,
}

/// Identifies a cluster: a generated id plus the operator-chosen name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTag {
    pub cluster_id: Uuid,
    pub cluster_name: String,
}

/// The CMG's authoritative cluster identity. Does not carry topology --
/// the logical and physical topology sets are tracked separately since the
/// leader reconciles and mutates them independently of this state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterState {
    pub cmg_nodes: HashSet<NodeId>,
    pub ms_nodes: HashSet<NodeId>,
    pub version: String,
    pub cluster_tag: ClusterTag,
}
