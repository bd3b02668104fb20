//! Partition Router.
//!
//! Maps a request carrying one or more record keys to the node currently
//! assigned to serve its partition, with a pinned-node override for
//! in-flight transactions.

use std::collections::HashMap;
use std::sync::RwLock;

use common::errors::Result;
use rpc::NodeId;

pub type TxId = u64;

/// Where the router learns the current `partition -> node` mapping. The
/// real implementation asks any node's `PartitionAssignmentGet` operation;
/// tests supply a fixed table.
#[async_trait::async_trait]
pub trait AssignmentSource: Send + Sync {
    async fn fetch_assignments(&self) -> Result<HashMap<u32, NodeId>>;
}

pub struct Router {
    partition_count: u32,
    assignments: RwLock<HashMap<u32, NodeId>>,
    pinned: RwLock<HashMap<TxId, NodeId>>,
}

impl Router {
    pub fn new(partition_count: u32) -> Self {
        Self {
            partition_count,
            assignments: RwLock::new(HashMap::new()),
            pinned: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_assignment(&self, partition: u32, node: NodeId) {
        self.assignments.write().unwrap().insert(partition, node);
    }

    pub async fn refresh(&self, source: &dyn AssignmentSource) -> Result<()> {
        let table = source.fetch_assignments().await?;
        *self.assignments.write().unwrap() = table;
        Ok(())
    }

    /// A transaction's first routed request pins it to whichever node
    /// served it; subsequent requests for the same `tx_id` stay pinned
    /// regardless of where their key would otherwise route.
    pub fn pin_transaction(&self, tx_id: TxId, node: NodeId) {
        self.pinned.write().unwrap().entry(tx_id).or_insert(node);
    }

    pub fn unpin_transaction(&self, tx_id: TxId) {
        self.pinned.write().unwrap().remove(&tx_id);
    }

    pub fn partition_for_key(&self, key_bytes: &[u8]) -> u32 {
        let hash = common::hash::stable_hash32(key_bytes);
        common::hash::hash_to_partition(hash, self.partition_count)
    }

    /// Selects the preferred node for a request whose first key encodes to
    /// `key_bytes`. A transactional request (`tx_id.is_some()`) prefers its
    /// pinned node over recomputing the colocation hash.
    pub fn route(&self, key_bytes: &[u8], tx_id: Option<TxId>) -> Option<NodeId> {
        if let Some(tx_id) = tx_id {
            if let Some(node) = self.pinned.read().unwrap().get(&tx_id) {
                return Some(*node);
            }
        }

        let partition = self.partition_for_key(key_bytes);
        self.assignments.read().unwrap().get(&partition).copied()
    }

    /// Whether a response's flags demand an assignment-table refresh
    /// before the next request routes.
    pub fn needs_refresh(flags: u8) -> bool {
        flags & rpc::frame::FLAG_PARTITION_ASSIGNMENT_CHANGED != 0
    }
}
