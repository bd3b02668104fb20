use std::fmt;

/// What a `Channel::call` can fail with below the envelope layer --
/// distinct from `RpcError` so `invoke` can tell "group not started" apart
/// from "node shutting down" instead of collapsing both into one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The remote reports the group is unknown or not yet started.
    GroupUnavailable,
    /// The local or remote node is shutting down.
    NodeStopping,
    /// Any other transport-level failure (connection reset, DNS, ...).
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::GroupUnavailable => write!(f, "replica group unavailable"),
            TransportError::NodeStopping => write!(f, "node stopping"),
            TransportError::Other(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Failure taxonomy for `invoke`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// No response arrived within `RPC_TIMEOUT`.
    ReplicationTimeout,
    /// The remote reports the group is unknown or not yet started.
    ReplicaUnavailable,
    /// The local or remote node is shutting down.
    NodeStopping,
    /// The remote's `ErrorReplicaResponse` envelope, unwrapped.
    Remote(String),
    /// The frame could not be decoded (truncated, bad magic, ...).
    Malformed(String),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::ReplicationTimeout => write!(f, "replication timeout"),
            RpcError::ReplicaUnavailable => write!(f, "replica unavailable"),
            RpcError::NodeStopping => write!(f, "node stopping"),
            RpcError::Remote(msg) => write!(f, "remote error: {}", msg),
            RpcError::Malformed(msg) => write!(f, "malformed frame: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}
