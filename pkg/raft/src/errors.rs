use std::fmt;

/// Failure taxonomy for submissions against a running group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaftError {
    /// The submission queue (disruptor buffer) is full.
    Busy,
    /// A read-index request's deadline expired before a heartbeat round
    /// completed within the leader's lease.
    Timeout,
    /// A configuration change referenced peers outside the physical
    /// topology.
    CatchUp,
    /// The state machine reported a deterministic fault; the group is now
    /// in `NodeState::Error` until externally reset.
    StateMachine(String),
    /// A cooperative cancellation was observed (snapshot install, join).
    Cancelled,
    /// The operation requires a different node state (e.g. proposing a
    /// config change while not the leader).
    NotLeader,
}

impl fmt::Display for RaftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaftError::Busy => write!(f, "raft group is busy"),
            RaftError::Timeout => write!(f, "timed out"),
            RaftError::CatchUp => write!(f, "peer is not yet part of the physical topology"),
            RaftError::StateMachine(msg) => write!(f, "state machine fault: {}", msg),
            RaftError::Cancelled => write!(f, "cancelled"),
            RaftError::NotLeader => write!(f, "not the leader"),
        }
    }
}

impl std::error::Error for RaftError {}
