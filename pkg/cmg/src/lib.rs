//! Cluster Management Group.
//!
//! The node-local half of cluster bootstrap and topology tracking. RPC
//! broadcast and durable persistence are abstracted behind traits so this
//! crate stays testable without a network or a real vault; `rpc` and a
//! concrete store wire it up in the node binary.

pub mod errors;
pub mod state;

pub use errors::CmgError;
pub use state::{ClusterState, ClusterTag, CmgState, InitArgs};

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_std::sync::Mutex;
use common::errors::Result;
use common::uuid::Uuid;
use rpc::NodeId;

/// Durable local state, backed by whatever secret-store/vault the
/// deployment uses. Only ever holds the node's own init args -- the rest
/// of `ClusterState` is reconstructed via Raft.
#[async_trait::async_trait]
pub trait LocalStateStore: Send + Sync {
    async fn load(&self) -> Result<Option<InitArgs>>;
    async fn save(&self, args: &InitArgs) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// Sends a `ClusterState` broadcast to one physical member. Implemented
/// over `rpc::invoke` in the node binary.
#[async_trait::async_trait]
pub trait Broadcaster: Send + Sync {
    async fn send_cluster_state(&self, node: NodeId, state: &ClusterState) -> Result<()>;
}

struct Inner {
    state: CmgState,
    init_args: Option<InitArgs>,
    cluster_state: Option<ClusterState>,
    logical_topology: HashSet<NodeId>,
    physical_topology: HashSet<NodeId>,
    pending_removals: HashMap<NodeId, Instant>,
}

pub struct Cmg<S: LocalStateStore> {
    inner: Mutex<Inner>,
    store: S,
}

impl<S: LocalStateStore> Cmg<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CmgState::Uninitialized,
                init_args: None,
                cluster_state: None,
                logical_topology: HashSet::new(),
                physical_topology: HashSet::new(),
                pending_removals: HashMap::new(),
            }),
            store,
        }
    }

    pub async fn state(&self) -> CmgState {
        self.inner.lock().await.state
    }

    pub async fn cluster_state(&self) -> Option<ClusterState> {
        self.inner.lock().await.cluster_state.clone()
    }

    pub async fn logical_topology(&self) -> HashSet<NodeId> {
        self.inner.lock().await.logical_topology.clone()
    }

    pub async fn physical_topology(&self) -> HashSet<NodeId> {
        self.inner.lock().await.physical_topology.clone()
    }

    /// Handles a `CmgInitMessage`. Idempotent: re-applying identical args
    /// while already initializing/initialized returns `Ok` without
    /// changing anything; conflicting args fail with
    /// `IllegalInitArgument` (`should_cancel() == true`).
    ///
    /// Bootstraps `cluster_state` and the logical topology from `args`
    /// directly -- the node that first wins init must be able to answer
    /// a state query without waiting on a `ClusterStateMessage` from
    /// itself.
    pub async fn handle_init(&self, args: InitArgs) -> std::result::Result<(), CmgError> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = &inner.init_args {
            return if *existing == args {
                Ok(())
            } else {
                Err(CmgError::IllegalInitArgument(
                    "conflicting init args for an already-initialized node".into(),
                ))
            };
        }

        if inner.state == CmgState::Stopping {
            return Err(CmgError::NodeStopping);
        }

        let _ = self.store.save(&args).await;

        inner.cluster_state = Some(ClusterState {
            cmg_nodes: args.cmg_nodes.iter().copied().collect(),
            ms_nodes: args.meta_storage_nodes.iter().copied().collect(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            cluster_tag: ClusterTag {
                cluster_id: Uuid::new_v4(),
                cluster_name: args.cluster_name.clone(),
            },
        });
        inner.logical_topology = args.cmg_nodes.iter().copied().collect();

        inner.init_args = Some(args);
        inner.state = CmgState::Initializing;
        Ok(())
    }

    /// The CMG Raft service confirmed the state-init command committed.
    pub async fn confirm_validated(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == CmgState::Initializing {
            inner.state = CmgState::Validated;
        }
    }

    /// `on_join_ready` committed -- the node is now in the logical
    /// topology.
    pub async fn mark_ready(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == CmgState::Validated {
            inner.state = CmgState::Ready;
        }
    }

    /// Joining an existing cluster via a `ClusterStateMessage` rather than
    /// bootstrapping: skips straight to `Validated`. The leader's logical
    /// topology snapshot travels alongside the cluster identity.
    pub async fn handle_cluster_state_message(
        &self,
        cluster_state: ClusterState,
        logical_topology: HashSet<NodeId>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.cluster_state = Some(cluster_state);
        inner.logical_topology = logical_topology;
        if inner.state == CmgState::Uninitialized {
            inner.state = CmgState::Validated;
        }
    }

    /// Fails `join_future` with `NodeStopping`.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CmgState::Stopping;
    }

    pub async fn handle_cancel_init(&self) {
        let mut inner = self.inner.lock().await;
        let _ = self.store.clear().await;
        inner.init_args = None;
        inner.cluster_state = None;
        inner.logical_topology.clear();
        inner.state = CmgState::Uninitialized;
    }

    /// On becoming CMG leader: reconcile logical topology against physical
    /// topology (drop members absent from it), then broadcast the current
    /// cluster state to every physical member with bounded-backoff retry.
    /// A node the broadcast cannot reach does not block the callback.
    pub async fn on_become_leader(
        &self,
        broadcaster: &dyn Broadcaster,
        physical_topology: &[NodeId],
    ) {
        let cluster_state = {
            let mut inner = self.inner.lock().await;
            let physical: HashSet<NodeId> = physical_topology.iter().copied().collect();
            inner.logical_topology.retain(|n| physical.contains(n));
            inner.physical_topology = physical;
            inner.cluster_state.clone()
        };

        let Some(cluster_state) = cluster_state else {
            return;
        };

        for node in physical_topology {
            broadcast_with_backoff(broadcaster, *node, &cluster_state, 3).await;
        }
    }

    /// A node appeared in physical topology: cancel any scheduled removal
    /// and bring it up to date.
    pub async fn on_node_appeared(&self, broadcaster: &dyn Broadcaster, node: NodeId) {
        let cluster_state = {
            let mut inner = self.inner.lock().await;
            inner.pending_removals.remove(&node);
            inner.cluster_state.clone()
        };

        if let Some(cs) = cluster_state {
            let _ = broadcaster.send_cluster_state(node, &cs).await;
        }
    }

    /// A node disappeared from physical topology: schedule its removal
    /// from the logical topology after `delay`, unless it reappears first.
    pub async fn on_node_disappeared(&self, node: NodeId, delay: Duration) {
        let mut inner = self.inner.lock().await;
        inner
            .pending_removals
            .insert(node, Instant::now() + delay);
    }

    /// Applies any removal whose delay has elapsed by `now`. The node
    /// binary calls this periodically; tests can pass a synthetic `now`.
    pub async fn run_pending_removals(&self, now: Instant) {
        let mut inner = self.inner.lock().await;
        let due: Vec<NodeId> = inner
            .pending_removals
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(node, _)| *node)
            .collect();

        for node in due {
            inner.pending_removals.remove(&node);
            inner.logical_topology.remove(&node);
        }
    }
}

async fn broadcast_with_backoff(
    broadcaster: &dyn Broadcaster,
    node: NodeId,
    cluster_state: &ClusterState,
    max_attempts: u32,
) {
    let mut backoff = Duration::from_millis(50);
    for attempt in 0..max_attempts {
        if broadcaster.send_cluster_state(node, cluster_state).await.is_ok() {
            return;
        }
        if attempt + 1 < max_attempts {
            async_std::task::sleep(backoff).await;
            backoff *= 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct InMemoryStore {
        saved: Mutex<Option<InitArgs>>,
    }

    impl InMemoryStore {
        fn new() -> Self {
            Self { saved: Mutex::new(None) }
        }
    }

    #[async_trait::async_trait]
    impl LocalStateStore for InMemoryStore {
        async fn load(&self) -> Result<Option<InitArgs>> {
            Ok(self.saved.lock().await.clone())
        }
        async fn save(&self, args: &InitArgs) -> Result<()> {
            *self.saved.lock().await = Some(args.clone());
            Ok(())
        }
        async fn clear(&self) -> Result<()> {
            *self.saved.lock().await = None;
            Ok(())
        }
    }

    struct CountingBroadcaster {
        calls: AtomicUsize,
        fail_node: Option<NodeId>,
    }

    #[async_trait::async_trait]
    impl Broadcaster for CountingBroadcaster {
        async fn send_cluster_state(&self, node: NodeId, _state: &ClusterState) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(node) == self.fail_node {
                return Err(common::errors::err_msg("unreachable"));
            }
            Ok(())
        }
    }

    fn sample_args() -> InitArgs {
        InitArgs {
            meta_storage_nodes: vec![1, 2, 3],
            cmg_nodes: vec![1, 2, 3],
            cluster_name: "test-cluster".into(),
        }
    }

    fn sample_cluster_state() -> ClusterState {
        ClusterState {
            cmg_nodes: [1, 2, 3].into_iter().collect(),
            ms_nodes: [1, 2, 3].into_iter().collect(),
            version: "0.1.0".into(),
            cluster_tag: ClusterTag {
                cluster_id: Uuid::new_v4(),
                cluster_name: "c".into(),
            },
        }
    }

    #[async_std::test]
    async fn init_then_confirm_then_ready_walks_full_lifecycle() {
        let cmg = Cmg::new(InMemoryStore::new());
        cmg.handle_init(sample_args()).await.unwrap();
        assert_eq!(cmg.state().await, CmgState::Initializing);

        let cs = cmg.cluster_state().await.unwrap();
        assert_eq!(cs.cmg_nodes, [1, 2, 3].into_iter().collect());
        assert_eq!(cs.ms_nodes, [1, 2, 3].into_iter().collect());
        assert_eq!(cs.cluster_tag.cluster_name, "test-cluster");

        cmg.confirm_validated().await;
        assert_eq!(cmg.state().await, CmgState::Validated);

        cmg.mark_ready().await;
        assert_eq!(cmg.state().await, CmgState::Ready);

        // The bootstrap node's own cluster state survives into Ready --
        // it never depended on a ClusterStateMessage loopback.
        assert!(cmg.cluster_state().await.is_some());
        assert_eq!(cmg.logical_topology().await, [1, 2, 3].into_iter().collect());
    }

    #[async_std::test]
    async fn repeated_identical_init_is_idempotent() {
        let cmg = Cmg::new(InMemoryStore::new());
        cmg.handle_init(sample_args()).await.unwrap();
        cmg.handle_init(sample_args()).await.unwrap();
        assert_eq!(cmg.state().await, CmgState::Initializing);
    }

    #[async_std::test]
    async fn conflicting_init_is_illegal_and_should_cancel() {
        let cmg = Cmg::new(InMemoryStore::new());
        cmg.handle_init(sample_args()).await.unwrap();

        let mut conflicting = sample_args();
        conflicting.cluster_name = "other-cluster".into();

        let err = cmg.handle_init(conflicting).await.unwrap_err();
        assert!(err.should_cancel());
    }

    #[async_std::test]
    async fn leader_elected_callback_drops_logically_absent_members() {
        let cmg = Cmg::new(InMemoryStore::new());
        cmg.handle_cluster_state_message(sample_cluster_state(), [1, 2, 3].into_iter().collect())
            .await;

        let broadcaster = CountingBroadcaster { calls: AtomicUsize::new(0), fail_node: None };
        cmg.on_become_leader(&broadcaster, &[1, 2]).await;

        assert_eq!(cmg.logical_topology().await, [1, 2].into_iter().collect());
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 2);
    }

    #[async_std::test]
    async fn unreachable_node_does_not_block_the_callback() {
        let cmg = Cmg::new(InMemoryStore::new());
        cmg.handle_cluster_state_message(sample_cluster_state(), [1, 2].into_iter().collect())
            .await;

        let broadcaster = CountingBroadcaster { calls: AtomicUsize::new(0), fail_node: Some(2) };
        cmg.on_become_leader(&broadcaster, &[1, 2]).await;
        // 1 success + 3 attempts against the unreachable node 2.
        assert_eq!(broadcaster.calls.load(Ordering::SeqCst), 4);
    }

    #[async_std::test]
    async fn disappearance_then_reappearance_cancels_removal() {
        let cmg = Cmg::new(InMemoryStore::new());
        cmg.handle_cluster_state_message(sample_cluster_state(), [1, 2].into_iter().collect())
            .await;

        cmg.on_node_disappeared(2, Duration::from_millis(50)).await;
        let broadcaster = CountingBroadcaster { calls: AtomicUsize::new(0), fail_node: None };
        cmg.on_node_appeared(&broadcaster, 2).await;

        cmg.run_pending_removals(Instant::now() + Duration::from_secs(1)).await;
        assert!(cmg.logical_topology().await.contains(&2));
    }

    #[async_std::test]
    async fn removal_applies_once_delay_elapses_without_reappearance() {
        let cmg = Cmg::new(InMemoryStore::new());
        cmg.handle_cluster_state_message(sample_cluster_state(), [1, 2].into_iter().collect())
            .await;

        cmg.on_node_disappeared(2, Duration::from_millis(10)).await;
        cmg.run_pending_removals(Instant::now() + Duration::from_secs(1)).await;

        assert!(!cmg.logical_topology().await.contains(&2));
    }
}
