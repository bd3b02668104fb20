//! Replica Service & Dispatch: the client-facing invocation path and the
//! length-prefixed wire protocol it runs over.

pub mod envelope;
pub mod errors;
pub mod frame;
pub mod handshake;

pub use envelope::ReplicaResponseEnvelope;
pub use errors::{RpcError, TransportError};
pub use frame::{Frame, FrameHeader};

use std::time::Duration;

use hlc::HybridClock;

pub type NodeId = u64;

/// The default per-call deadline for replica invocations; CMG intra-group
/// calls use the shorter `CMG_RPC_TIMEOUT`.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(3);
pub const CMG_RPC_TIMEOUT: Duration = Duration::from_millis(500);

/// Operation codes the core must honor, a subset of the full client
/// surface. Each op takes an optional transaction id in its first field at
/// the payload level -- this crate does not interpret payload contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationCode {
    TablesGet,
    TableGet,
    SchemasGet,
    PartitionAssignmentGet,
    TupleGet,
    TupleGetAll,
    TupleUpsert,
    TupleUpsertAll,
    TupleInsert,
    TupleInsertAll,
    TupleReplace,
    TupleReplaceExact,
    TupleDelete,
    TupleDeleteExact,
    TupleDeleteAll,
    TupleDeleteAllExact,
    TupleGetAndUpsert,
    TupleGetAndReplace,
    TupleGetAndDelete,
    TupleContainsKey,
    TxBegin,
    TxCommit,
    ComputeExecute,
}

impl OperationCode {
    pub fn to_wire(self) -> u16 {
        self as u16
    }

    pub fn from_wire(code: u16) -> Option<Self> {
        const ALL: &[OperationCode] = &[
            OperationCode::TablesGet,
            OperationCode::TableGet,
            OperationCode::SchemasGet,
            OperationCode::PartitionAssignmentGet,
            OperationCode::TupleGet,
            OperationCode::TupleGetAll,
            OperationCode::TupleUpsert,
            OperationCode::TupleUpsertAll,
            OperationCode::TupleInsert,
            OperationCode::TupleInsertAll,
            OperationCode::TupleReplace,
            OperationCode::TupleReplaceExact,
            OperationCode::TupleDelete,
            OperationCode::TupleDeleteExact,
            OperationCode::TupleDeleteAll,
            OperationCode::TupleDeleteAllExact,
            OperationCode::TupleGetAndUpsert,
            OperationCode::TupleGetAndReplace,
            OperationCode::TupleGetAndDelete,
            OperationCode::TupleContainsKey,
            OperationCode::TxBegin,
            OperationCode::TxCommit,
            OperationCode::ComputeExecute,
        ];
        ALL.get(code as usize).copied()
    }
}

/// Transport abstraction `invoke` dispatches over. A real implementation
/// would carry `Frame`s over length-prefixed TCP; tests exercise `invoke`
/// against an in-memory fake. Returns a typed `TransportError` rather than
/// the catch-all `common::errors::Result` so `invoke` can distinguish a
/// not-yet-started group from a node that is shutting down.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    async fn call(&self, node: NodeId, frame: Frame) -> std::result::Result<Frame, TransportError>;
}

/// Single operation exposed by the replica dispatch layer: send
/// `request` to `node`, enforce `timeout`, unwrap the reply envelope, and
/// feed any carried HLC observation back into `clock`.
pub async fn invoke(
    channel: &dyn Channel,
    clock: &HybridClock,
    node: NodeId,
    request: Frame,
    timeout: Duration,
) -> std::result::Result<Vec<u8>, RpcError> {
    let call = channel.call(node, request);

    let response = match async_std::future::timeout(timeout, call).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(TransportError::NodeStopping)) => return Err(RpcError::NodeStopping),
        Ok(Err(TransportError::GroupUnavailable)) => return Err(RpcError::ReplicaUnavailable),
        Ok(Err(TransportError::Other(_))) => return Err(RpcError::ReplicaUnavailable),
        Err(_) => return Err(RpcError::ReplicationTimeout),
    };

    let envelope = envelope::decode_envelope(&response.payload)
        .map_err(|e| RpcError::Malformed(e.to_string()))?;

    if let Some(ts) = envelope.timestamp {
        clock.update(ts);
    }

    envelope.result.map_err(RpcError::Remote)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::sync::Mutex;
    use frame::FrameHeader;
    use hlc::Timestamp;

    struct FakeChannel {
        response: Mutex<Option<Frame>>,
        failure: Option<TransportError>,
    }

    #[async_trait::async_trait]
    impl Channel for FakeChannel {
        async fn call(&self, _node: NodeId, _frame: Frame) -> std::result::Result<Frame, TransportError> {
            if let Some(err) = &self.failure {
                return Err(err.clone());
            }
            Ok(self.response.lock().await.take().unwrap())
        }
    }

    fn sample_request() -> Frame {
        Frame {
            header: FrameHeader {
                message_type: OperationCode::TupleGet.to_wire(),
                request_id: 1,
                flags: 0,
            },
            payload: vec![],
        }
    }

    #[async_std::test]
    async fn invoke_unwraps_ok_body_and_updates_clock() {
        let envelope = ReplicaResponseEnvelope {
            timestamp: Some(Timestamp { physical_ms: 100, logical: 0 }),
            result: Ok(vec![42]),
        };
        let channel = FakeChannel {
            response: Mutex::new(Some(Frame {
                header: FrameHeader { message_type: 0, request_id: 1, flags: 0 },
                payload: envelope::encode_envelope(&envelope),
            })),
            failure: None,
        };

        let clock = HybridClock::new();
        let body = invoke(&channel, &clock, 1, sample_request(), RPC_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(body, vec![42]);
        assert!(clock.now().physical_ms >= 100);
    }

    #[async_std::test]
    async fn invoke_surfaces_remote_error() {
        let envelope = ReplicaResponseEnvelope {
            timestamp: None,
            result: Err("replica unavailable".into()),
        };
        let channel = FakeChannel {
            response: Mutex::new(Some(Frame {
                header: FrameHeader { message_type: 0, request_id: 1, flags: 0 },
                payload: envelope::encode_envelope(&envelope),
            })),
            failure: None,
        };

        let clock = HybridClock::new();
        let err = invoke(&channel, &clock, 1, sample_request(), RPC_TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::Remote("replica unavailable".into()));
    }

    #[async_std::test]
    async fn invoke_maps_group_unavailable_transport_failure() {
        let channel = FakeChannel {
            response: Mutex::new(None),
            failure: Some(TransportError::GroupUnavailable),
        };
        let clock = HybridClock::new();
        let err = invoke(&channel, &clock, 1, sample_request(), RPC_TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::ReplicaUnavailable);
    }

    #[async_std::test]
    async fn invoke_maps_node_stopping_transport_failure() {
        let channel = FakeChannel {
            response: Mutex::new(None),
            failure: Some(TransportError::NodeStopping),
        };
        let clock = HybridClock::new();
        let err = invoke(&channel, &clock, 1, sample_request(), RPC_TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::NodeStopping);
    }
}
