//! Raft Replication Engine.
//!
//! The group-local state machine: term/log bookkeeping, pre-vote and
//! priority-gated elections, the commit rule, and joint-consensus
//! reconfiguration. Transport (AppendEntries/Vote RPCs over the wire) is
//! the `rpc` crate's job; this crate models the decisions a group makes
//! given requests and responses, so that it can be driven and tested
//! without a network.

pub mod config;
pub mod election;
pub mod errors;
pub mod log;
pub mod state_machine;

pub use errors::RaftError;
pub use log::{EntryPayload, LogEntry, LogIndex, NodeId, Term};
pub use state_machine::StateMachine;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_std::sync::Mutex;
use common::errors::Result;
use hlc::Timestamp;

use config::{ConfigChangeOutcome, Configuration, JointConfig};
use election::{ElectionTimeout, Priority, TargetPriority};
use log::Log;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Follower,
    Candidate,
    Leader,
    /// Terminal until externally reset -- the state machine reported a
    /// deterministic fault.
    Error,
}

#[derive(Debug, Clone)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_term: Term,
    pub last_log_index: LogIndex,
    pub pre_vote: bool,
}

#[derive(Debug, Clone)]
pub struct VoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
    /// Only present on heartbeats (empty `entries`); the leader has no
    /// useful reading to attach to a data-bearing append.
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    pub match_index: LogIndex,
    pub timestamp: Option<Timestamp>,
}

struct GroupState {
    node_id: NodeId,
    state: NodeState,
    current_term: Term,
    voted_for: Option<NodeId>,
    log: Log,
    commit_index: LogIndex,
    config: JointConfig,
    priority: Priority,
    target_priority: TargetPriority,
    election_timeout: ElectionTimeout,
    match_indices: HashMap<NodeId, LogIndex>,
    config_change_in_flight: bool,
}

/// Caps how far ahead of the applied index the log may grow before
/// submissions are rejected with `Busy` -- stands in for the disruptor
/// buffer capacity.
const MAX_PENDING_ENTRIES: u64 = 10_000;

pub struct RaftGroup<S: StateMachine> {
    state: Mutex<GroupState>,
    state_machine: Arc<S>,
}

impl<S: StateMachine> RaftGroup<S> {
    pub fn new(
        node_id: NodeId,
        voters: impl IntoIterator<Item = NodeId>,
        priority: Priority,
        state_machine: Arc<S>,
    ) -> Self {
        let group = GroupState {
            node_id,
            state: NodeState::Follower,
            current_term: 0,
            voted_for: None,
            log: Log::new(),
            commit_index: 0,
            config: JointConfig::stable(voters),
            priority,
            target_priority: TargetPriority::new(100, 0.5),
            election_timeout: ElectionTimeout::new(
                Duration::from_millis(150),
                Duration::from_millis(2_000),
                3,
            ),
            match_indices: HashMap::new(),
            config_change_in_flight: false,
        };

        Self {
            state: Mutex::new(group),
            state_machine,
        }
    }

    pub async fn node_state(&self) -> NodeState {
        self.state.lock().await.state
    }

    pub async fn current_term(&self) -> Term {
        self.state.lock().await.current_term
    }

    /// Grants a pre-vote iff the requester's log is not behind ours. Does
    /// not mutate term or voted-for state -- pre-votes are advisory only,
    /// preventing a partitioned node from inflating the term on rejoin.
    pub async fn handle_pre_vote(&self, req: &VoteRequest) -> VoteResponse {
        let group = self.state.lock().await;
        let granted = req.term >= group.current_term
            && log::log_is_up_to_date(
                req.last_log_term,
                req.last_log_index,
                group.log.last_term(),
                group.log.last_index(),
            );
        VoteResponse {
            term: group.current_term,
            vote_granted: granted,
        }
    }

    pub async fn handle_vote_request(&self, req: &VoteRequest) -> VoteResponse {
        let mut group = self.state.lock().await;

        if req.term > group.current_term {
            Self::step_down_locked(&mut group, req.term);
        }

        if req.term < group.current_term {
            return VoteResponse {
                term: group.current_term,
                vote_granted: false,
            };
        }

        let already_voted_elsewhere = group
            .voted_for
            .map_or(false, |voted| voted != req.candidate_id);
        let up_to_date = log::log_is_up_to_date(
            req.last_log_term,
            req.last_log_index,
            group.log.last_term(),
            group.log.last_index(),
        );

        let granted = !already_voted_elsewhere && up_to_date;
        if granted {
            group.voted_for = Some(req.candidate_id);
        }

        VoteResponse {
            term: group.current_term,
            vote_granted: granted,
        }
    }

    pub async fn handle_append_entries(
        &self,
        clock: &hlc::HybridClock,
        req: AppendEntriesRequest,
    ) -> AppendEntriesResponse {
        let mut group = self.state.lock().await;

        if req.term < group.current_term {
            return AppendEntriesResponse {
                term: group.current_term,
                success: false,
                match_index: 0,
                timestamp: None,
            };
        }

        if req.term > group.current_term || group.state == NodeState::Candidate {
            Self::step_down_locked(&mut group, req.term);
        }
        group.election_timeout.on_leader_elected();

        let prev_ok = req.prev_log_index == 0
            || group.log.term_at(req.prev_log_index) == Some(req.prev_log_term);

        if !prev_ok {
            return AppendEntriesResponse {
                term: group.current_term,
                success: false,
                match_index: 0,
                timestamp: None,
            };
        }

        if !req.entries.is_empty() {
            group.log.truncate_from(req.prev_log_index + 1);
            for entry in &req.entries {
                group.log.append(entry.term, entry.payload.clone());
            }
        }

        if req.leader_commit > group.commit_index {
            group.commit_index = req.leader_commit.min(group.log.last_index());
        }

        let match_index = group.log.last_index();
        // HLC timestamps only ride on heartbeats (empty AppendEntries),
        // never on data-bearing ones -- a leader has no useful clock
        // reading to attach to a real log entry.
        let response_timestamp = if req.entries.is_empty() {
            req.timestamp.map(|remote| clock.update(remote))
        } else {
            None
        };

        AppendEntriesResponse {
            term: group.current_term,
            success: true,
            match_index,
            timestamp: response_timestamp,
        }
    }

    fn step_down_locked(group: &mut GroupState, new_term: Term) {
        group.current_term = new_term;
        group.voted_for = None;
        group.state = NodeState::Follower;
        group.match_indices.clear();
    }

    /// Attempts the Follower -> Candidate transition. Returns `None` if
    /// this peer's priority does not yet clear the group's decaying
    /// target.
    pub async fn try_become_candidate(&self) -> Option<VoteRequest> {
        let mut group = self.state.lock().await;
        if group.state != NodeState::Follower {
            return None;
        }
        if !election::may_campaign(group.priority, group.target_priority.current()) {
            return None;
        }

        group.state = NodeState::Candidate;
        group.current_term += 1;
        group.voted_for = Some(group.node_id);

        Some(VoteRequest {
            term: group.current_term,
            candidate_id: group.node_id,
            last_log_term: group.log.last_term(),
            last_log_index: group.log.last_index(),
            pre_vote: false,
        })
    }

    /// Records the result of an election round (whether a leader emerged)
    /// so the priority target and timeout backoff can adjust.
    pub async fn on_election_round_complete(&self, leader_elected: bool) {
        let mut group = self.state.lock().await;
        if leader_elected {
            group.target_priority.on_leader_elected();
            group.election_timeout.on_leader_elected();
            group.state = NodeState::Leader;
        } else {
            group.target_priority.on_round_failed();
            group.election_timeout.on_round_failed();
            group.state = NodeState::Follower;
        }
    }

    pub async fn election_timeout(&self) -> Duration {
        self.state.lock().await.election_timeout.current()
    }

    /// Leader-side: appends an operation to the log. Fails `Busy` if the
    /// pending (uncommitted) backlog exceeds the buffer capacity.
    pub async fn submit(&self, operation: Vec<u8>) -> std::result::Result<LogIndex, RaftError> {
        let mut group = self.state.lock().await;
        if group.state != NodeState::Leader {
            return Err(RaftError::NotLeader);
        }
        if group.log.last_index() - group.commit_index > MAX_PENDING_ENTRIES {
            return Err(RaftError::Busy);
        }
        let term = group.current_term;
        Ok(group.log.append(term, EntryPayload::Normal(operation)))
    }

    /// Leader-side: records a follower's replication progress and advances
    /// `commit_index`. A candidate index commits only once it has majority
    /// support in both halves of the current `JointConfig` (trivially just
    /// the one active set outside of a reconfiguration) and an entry from
    /// the current term has reached that majority -- naively counting
    /// acks against a flat peer list would let a leader commit on a
    /// majority of the new voter set alone mid-reconfiguration, without
    /// the old set ever acknowledging it.
    pub async fn record_match_index(&self, peer: NodeId, match_index: LogIndex) -> LogIndex {
        let mut group = self.state.lock().await;
        group.match_indices.insert(peer, match_index);

        let self_index = group.log.last_index();
        let mut candidates: Vec<LogIndex> = group.match_indices.values().copied().collect();
        candidates.push(self_index);
        candidates.sort_unstable_by(|a, b| b.cmp(a));
        candidates.dedup();

        let mut new_commit = group.commit_index;
        for candidate in candidates {
            if candidate <= new_commit {
                break;
            }
            if group.log.term_at(candidate) != Some(group.current_term) {
                continue;
            }
            let mut acks: std::collections::HashSet<NodeId> = group
                .match_indices
                .iter()
                .filter(|(_, &mi)| mi >= candidate)
                .map(|(&node, _)| node)
                .collect();
            acks.insert(group.node_id);
            if group.config.has_majority(&acks) {
                new_commit = candidate;
                break;
            }
        }

        group.commit_index = new_commit;
        group.commit_index
    }

    /// Applies every log entry up to `commit_index` that has not yet been
    /// applied, driving the state machine forward.
    pub async fn drive_apply(&self) -> Result<()> {
        let (start, end, entries) = {
            let group = self.state.lock().await;
            let start = self.state_machine.last_flushed() + 1;
            let end = group.commit_index;
            let entries: Vec<LogEntry> = (start..=end)
                .filter_map(|idx| group.log.get(idx).cloned())
                .collect();
            (start, end, entries)
        };

        if end < start {
            return Ok(());
        }

        for entry in entries {
            if let EntryPayload::Normal(operation) = &entry.payload {
                self.state_machine.apply(entry.index, operation).await?;
            }
        }

        Ok(())
    }

    /// Submission semantics for configuration changes: identical config
    /// re-submitted is a no-op `Ok`, an in-flight change yields `Busy`, a
    /// stale term is a no-op `Ok`, and voters outside the physical
    /// topology yield `CatchUp`.
    pub async fn propose_config_change(
        &self,
        new_voters: impl IntoIterator<Item = NodeId>,
        term: Term,
        physical_topology: &std::collections::HashSet<NodeId>,
    ) -> std::result::Result<ConfigChangeOutcome, RaftError> {
        let mut group = self.state.lock().await;

        if term < group.current_term {
            return Ok(ConfigChangeOutcome::NoopStaleTerm);
        }

        if group.config_change_in_flight {
            return Err(RaftError::Busy);
        }

        let new_voters: std::collections::HashSet<NodeId> = new_voters.into_iter().collect();

        if new_voters == group.config.old.voters && !group.config.is_joint() {
            return Ok(ConfigChangeOutcome::NoopIdentical);
        }

        if !new_voters.is_subset(physical_topology) {
            return Err(RaftError::CatchUp);
        }

        group.config = JointConfig {
            old: group.config.old.clone(),
            new: Some(Configuration::new(new_voters)),
        };
        group.config_change_in_flight = true;

        Ok(ConfigChangeOutcome::Accepted)
    }

    /// Called once the joint-consensus entry (and its follow-up final
    /// configuration entry) have both committed.
    pub async fn finalize_config_change(&self) {
        let mut group = self.state.lock().await;
        if let Some(new) = group.config.new.take() {
            group.config.old = new;
        }
        group.config_change_in_flight = false;
    }

    /// Serves a linearizable read without appending a log entry: captures
    /// the current commit index, then re-confirms leadership by waiting on
    /// `heartbeat` (a round-trip to enough peers to re-establish the
    /// leader's lease) within `deadline`. Returns the captured index once a
    /// majority -- of both halves of the configuration, if a reconfiguration
    /// is in flight -- has acked; otherwise `RaftError::Timeout`, matching
    /// the requirement that followers be able to serve linearizable reads
    /// by asking the leader to confirm it is still current.
    pub async fn read_index<F>(
        &self,
        deadline: Duration,
        heartbeat: F,
    ) -> std::result::Result<LogIndex, RaftError>
    where
        F: std::future::Future<Output = std::collections::HashSet<NodeId>>,
    {
        let index = {
            let group = self.state.lock().await;
            if group.state != NodeState::Leader {
                return Err(RaftError::NotLeader);
            }
            group.commit_index
        };

        let mut acked = async_std::future::timeout(deadline, heartbeat)
            .await
            .map_err(|_| RaftError::Timeout)?;

        let group = self.state.lock().await;
        acked.insert(group.node_id);
        if group.config.has_majority(&acked) {
            Ok(index)
        } else {
            Err(RaftError::Timeout)
        }
    }

    pub async fn mark_error(&self, _reason: impl Into<String>) {
        let mut group = self.state.lock().await;
        group.state = NodeState::Error;
    }
}

/// Throttles a byte stream to a budget-per-second, used by the snapshot
/// install path when the leader is asked to cap bandwidth.
pub struct ThrottledSender {
    budget_bytes_per_sec: u64,
}

impl ThrottledSender {
    pub fn new(budget_bytes_per_sec: u64) -> Self {
        Self { budget_bytes_per_sec }
    }

    /// Sleeps long enough that sending `chunk_len` bytes now does not
    /// exceed the configured budget, assuming calls happen roughly once
    /// per second's worth of data.
    pub async fn throttle(&self, chunk_len: usize) {
        if self.budget_bytes_per_sec == 0 {
            return;
        }
        let millis = (chunk_len as u64 * 1000) / self.budget_bytes_per_sec;
        if millis > 0 {
            async_std::task::sleep(Duration::from_millis(millis)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeStateMachine {
        flushed: AtomicU64,
        applied: Mutex<Vec<(LogIndex, Vec<u8>)>>,
    }

    impl FakeStateMachine {
        fn new() -> Self {
            Self {
                flushed: AtomicU64::new(0),
                applied: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl StateMachine for FakeStateMachine {
        async fn apply(&self, index: LogIndex, operation: &[u8]) -> Result<()> {
            self.applied.lock().await.push((index, operation.to_vec()));
            self.flushed.store(index, Ordering::SeqCst);
            Ok(())
        }

        fn last_flushed(&self) -> LogIndex {
            self.flushed.load(Ordering::SeqCst)
        }

        async fn wait_for_flush(&self, _index: LogIndex) -> Result<()> {
            Ok(())
        }

        async fn snapshot(&self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn restore(&self, _data: Vec<u8>) -> Result<()> {
            Ok(())
        }
    }

    #[async_std::test]
    async fn candidate_wins_majority_and_commits_via_current_term_entry() {
        let sm = Arc::new(FakeStateMachine::new());
        let group = RaftGroup::new(1, [1, 2, 3], 10, sm.clone());

        let vote_req = group.try_become_candidate().await.unwrap();
        assert_eq!(vote_req.term, 1);
        group.on_election_round_complete(true).await;
        assert_eq!(group.node_state().await, NodeState::Leader);

        let index = group.submit(b"op-1".to_vec()).await.unwrap();
        group.record_match_index(2, index).await;
        let commit_index = group.record_match_index(3, index).await;
        assert_eq!(commit_index, index);

        group.drive_apply().await.unwrap();
        assert_eq!(sm.last_flushed(), index);
    }

    #[async_std::test]
    async fn higher_term_append_entries_steps_down_candidate() {
        let sm = Arc::new(FakeStateMachine::new());
        let group = RaftGroup::new(1, [1, 2, 3], 10, sm);
        group.try_become_candidate().await.unwrap();
        assert_eq!(group.node_state().await, NodeState::Candidate);

        let clock = hlc::HybridClock::new();
        let resp = group
            .handle_append_entries(
                &clock,
                AppendEntriesRequest {
                    term: 5,
                    leader_id: 2,
                    prev_log_index: 0,
                    prev_log_term: 0,
                    entries: vec![],
                    leader_commit: 0,
                    timestamp: Some(clock.now()),
                },
            )
            .await;

        assert!(resp.success);
        assert!(resp.timestamp.is_some());
        assert_eq!(group.node_state().await, NodeState::Follower);
        assert_eq!(group.current_term().await, 5);
    }

    #[async_std::test]
    async fn data_bearing_append_entries_carries_no_timestamp() {
        let sm = Arc::new(FakeStateMachine::new());
        let group = RaftGroup::new(1, [1, 2, 3], 10, sm);
        let clock = hlc::HybridClock::new();

        let resp = group
            .handle_append_entries(
                &clock,
                AppendEntriesRequest {
                    term: 1,
                    leader_id: 2,
                    prev_log_index: 0,
                    prev_log_term: 0,
                    entries: vec![LogEntry {
                        term: 1,
                        index: 1,
                        payload: EntryPayload::Normal(b"x".to_vec()),
                    }],
                    leader_commit: 0,
                    timestamp: None,
                },
            )
            .await;

        assert!(resp.success);
        assert!(resp.timestamp.is_none());
    }

    #[async_std::test]
    async fn config_change_is_idempotent_on_identical_resubmission() {
        let sm = Arc::new(FakeStateMachine::new());
        let group = RaftGroup::new(1, [1, 2, 3], 10, sm);
        let physical = [1, 2, 3].into_iter().collect();

        let outcome = group.propose_config_change([1, 2, 3], 0, &physical).await.unwrap();
        assert_eq!(outcome, ConfigChangeOutcome::NoopIdentical);
    }

    #[async_std::test]
    async fn config_change_rejects_peers_outside_physical_topology() {
        let sm = Arc::new(FakeStateMachine::new());
        let group = RaftGroup::new(1, [1, 2, 3], 10, sm);
        let physical = [1, 2, 3].into_iter().collect();

        let err = group
            .propose_config_change([1, 2, 3, 9], 0, &physical)
            .await
            .unwrap_err();
        assert_eq!(err, RaftError::CatchUp);
    }

    #[async_std::test]
    async fn config_change_busy_while_one_is_in_flight() {
        let sm = Arc::new(FakeStateMachine::new());
        let group = RaftGroup::new(1, [1, 2, 3], 10, sm);
        let physical = [1, 2, 3, 4].into_iter().collect();

        group.propose_config_change([1, 2, 4], 0, &physical).await.unwrap();
        let err = group.propose_config_change([1, 2, 4], 0, &physical).await.unwrap_err();
        assert_eq!(err, RaftError::Busy);
    }

    #[async_std::test]
    async fn joint_config_commit_requires_majority_of_both_old_and_new_voters() {
        let sm = Arc::new(FakeStateMachine::new());
        let group = RaftGroup::new(1, [1, 2, 3], 10, sm);

        group.try_become_candidate().await.unwrap();
        group.on_election_round_complete(true).await;

        let physical = [1, 2, 3, 4, 5].into_iter().collect();
        group.propose_config_change([3, 4, 5], 1, &physical).await.unwrap();

        let index = group.submit(b"op".to_vec()).await.unwrap();

        // Node 2 is only in the old set {1,2,3}; self (1) plus 2 is a
        // majority there, but nobody from the new set {3,4,5} has acked.
        assert_eq!(group.record_match_index(2, index).await, 0);

        // Node 4 is only in the new set; still short of a majority there.
        assert_eq!(group.record_match_index(4, index).await, 0);

        // Node 3 sits in both halves, tipping the new set to a 2-of-3
        // majority while the old half remains satisfied.
        assert_eq!(group.record_match_index(3, index).await, index);
    }

    #[async_std::test]
    async fn read_index_returns_commit_index_once_a_majority_reconfirms_leadership() {
        let sm = Arc::new(FakeStateMachine::new());
        let group = RaftGroup::new(1, [1, 2, 3], 10, sm);
        group.try_become_candidate().await.unwrap();
        group.on_election_round_complete(true).await;

        let index = group.submit(b"op".to_vec()).await.unwrap();
        group.record_match_index(2, index).await;
        group.record_match_index(3, index).await;

        let acked: std::collections::HashSet<NodeId> = [2, 3].into_iter().collect();
        let result = group
            .read_index(Duration::from_millis(50), async { acked })
            .await
            .unwrap();
        assert_eq!(result, index);
    }

    #[async_std::test]
    async fn read_index_times_out_if_heartbeat_round_does_not_complete() {
        let sm = Arc::new(FakeStateMachine::new());
        let group = RaftGroup::new(1, [1, 2, 3], 10, sm);
        group.try_become_candidate().await.unwrap();
        group.on_election_round_complete(true).await;

        let result = group
            .read_index(Duration::from_millis(10), async {
                async_std::task::sleep(Duration::from_secs(5)).await;
                std::collections::HashSet::new()
            })
            .await;
        assert_eq!(result.unwrap_err(), RaftError::Timeout);
    }

    #[async_std::test]
    async fn read_index_fails_if_heartbeat_round_lacks_a_majority() {
        let sm = Arc::new(FakeStateMachine::new());
        let group = RaftGroup::new(1, [1, 2, 3], 10, sm);
        group.try_become_candidate().await.unwrap();
        group.on_election_round_complete(true).await;

        let result = group
            .read_index(Duration::from_millis(50), async {
                std::collections::HashSet::new()
            })
            .await;
        assert_eq!(result.unwrap_err(), RaftError::Timeout);
    }
}
