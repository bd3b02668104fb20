use common::errors::Result;

use crate::log::LogIndex;

/// What the replicated log applies entries into. Grounded on the evidenced
/// shape of a `raft::StateMachine<()>` consumer: apply by index, track how
/// far the applies have been durably flushed, and support snapshot/restore
/// for the C8 copier.
#[async_trait::async_trait]
pub trait StateMachine: Send + Sync {
    async fn apply(&self, index: LogIndex, operation: &[u8]) -> Result<()>;

    /// The highest index whose effects are guaranteed durable.
    fn last_flushed(&self) -> LogIndex;

    /// Suspends until `last_flushed() >= index`.
    async fn wait_for_flush(&self, index: LogIndex) -> Result<()>;

    async fn snapshot(&self) -> Result<Vec<u8>>;

    async fn restore(&self, data: Vec<u8>) -> Result<()>;
}
