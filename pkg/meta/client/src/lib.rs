//! Thin client over the replica wire protocol: routes a request by its
//! key, invokes it, and pins the owning transaction to whatever node
//! served its first request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hlc::HybridClock;
use rpc::{Channel, Frame, FrameHeader, OperationCode, RpcError, RPC_TIMEOUT};

pub struct Client {
    channel: Arc<dyn Channel>,
    clock: HybridClock,
    router: router::Router,
    next_request_id: AtomicU64,
    next_tx_id: AtomicU64,
}

impl Client {
    pub fn new(channel: Arc<dyn Channel>, partition_count: u32) -> Self {
        Self {
            channel,
            clock: HybridClock::new(),
            router: router::Router::new(partition_count),
            next_request_id: AtomicU64::new(1),
            next_tx_id: AtomicU64::new(1),
        }
    }

    pub async fn refresh_assignments(
        &self,
        source: &dyn router::AssignmentSource,
    ) -> common::errors::Result<()> {
        self.router.refresh(source).await
    }

    pub async fn begin_transaction(&self) -> std::result::Result<u64, RpcError> {
        let tx_id = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .invoke(OperationCode::TxBegin, &[], Some(tx_id), Vec::new())
            .await?;
        Ok(tx_id)
    }

    pub async fn tuple_get(
        &self,
        tx_id: Option<u64>,
        key: &[u8],
    ) -> std::result::Result<Option<Vec<u8>>, RpcError> {
        let body = self.invoke(OperationCode::TupleGet, key, tx_id, key.to_vec()).await?;
        Ok(if body.is_empty() { None } else { Some(body) })
    }

    pub async fn tuple_upsert(
        &self,
        tx_id: Option<u64>,
        key: &[u8],
        value: &[u8],
    ) -> std::result::Result<(), RpcError> {
        let mut payload = Vec::with_capacity(4 + key.len() + value.len());
        payload.extend_from_slice(&(key.len() as u32).to_be_bytes());
        payload.extend_from_slice(key);
        payload.extend_from_slice(value);
        self.invoke(OperationCode::TupleUpsert, key, tx_id, payload).await?;
        Ok(())
    }

    async fn invoke(
        &self,
        op: OperationCode,
        routing_key: &[u8],
        tx_id: Option<u64>,
        payload: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, RpcError> {
        let node = self
            .router
            .route(routing_key, tx_id)
            .ok_or(RpcError::ReplicaUnavailable)?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let frame = Frame {
            header: FrameHeader {
                message_type: op.to_wire(),
                request_id,
                flags: 0,
            },
            payload,
        };

        let body = rpc::invoke(&*self.channel, &self.clock, node, frame, RPC_TIMEOUT).await?;

        if let Some(tx_id) = tx_id {
            self.router.pin_transaction(tx_id, node);
        }

        Ok(body)
    }

    pub async fn commit(&self, tx_id: u64) -> std::result::Result<(), RpcError> {
        self.invoke(OperationCode::TxCommit, &[], Some(tx_id), Vec::new())
            .await?;
        self.router.unpin_transaction(tx_id);
        Ok(())
    }
}

/// A transaction-scoped view over `Client`, mirroring the evidenced
/// `MetastoreClientInterface` shape: `get`/`put` against a pinned tx id,
/// with `commit` unpinning it once the server has durably applied it.
pub struct Transaction<'a> {
    client: &'a Client,
    tx_id: u64,
}

impl<'a> Transaction<'a> {
    pub fn id(&self) -> u64 {
        self.tx_id
    }

    pub async fn get(&self, key: &[u8]) -> std::result::Result<Option<Vec<u8>>, RpcError> {
        self.client.tuple_get(Some(self.tx_id), key).await
    }

    pub async fn put(&self, key: &[u8], value: &[u8]) -> std::result::Result<(), RpcError> {
        self.client.tuple_upsert(Some(self.tx_id), key, value).await
    }

    pub async fn commit(self) -> std::result::Result<(), RpcError> {
        self.client.commit(self.tx_id).await
    }
}

impl Client {
    pub async fn new_transaction(&self) -> std::result::Result<Transaction<'_>, RpcError> {
        let tx_id = self.begin_transaction().await?;
        Ok(Transaction { client: self, tx_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc::envelope::{encode_envelope, ReplicaResponseEnvelope};
    use async_std::sync::Mutex;

    struct FakeChannel {
        next_body: Mutex<Vec<u8>>,
    }

    #[async_trait::async_trait]
    impl Channel for FakeChannel {
        async fn call(
            &self,
            _node: rpc::NodeId,
            _frame: Frame,
        ) -> std::result::Result<Frame, rpc::TransportError> {
            let envelope = ReplicaResponseEnvelope {
                timestamp: None,
                result: Ok(self.next_body.lock().await.clone()),
            };
            Ok(Frame {
                header: FrameHeader { message_type: 0, request_id: 0, flags: 0 },
                payload: encode_envelope(&envelope),
            })
        }
    }

    #[async_std::test]
    async fn transaction_pins_to_the_node_that_served_begin() {
        let channel = Arc::new(FakeChannel { next_body: Mutex::new(Vec::new()) });
        let client = Client::new(channel, 4);
        client.router.set_assignment(0, 5);
        client.router.set_assignment(1, 6);
        client.router.set_assignment(2, 7);
        client.router.set_assignment(3, 8);

        let tx = client.new_transaction().await.unwrap();
        tx.put(b"k", b"v").await.unwrap();
        tx.commit().await.unwrap();
    }

    #[async_std::test]
    async fn tuple_get_returns_none_for_empty_body() {
        let channel = Arc::new(FakeChannel { next_body: Mutex::new(Vec::new()) });
        let client = Client::new(channel, 4);
        client.router.set_assignment(client.router.partition_for_key(b"missing"), 1);

        let value = client.tuple_get(None, b"missing").await.unwrap();
        assert!(value.is_none());
    }
}
