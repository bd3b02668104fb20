use std::fmt;

/// Closed set of failure modes for the MVCC partition storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// An intent exists on the chain head owned by a different transaction.
    TxIdMismatch { row_id: u128, owner: u64, requester: u64 },
    /// `add_write_committed` was called while an intent is present.
    IntentExists { row_id: u128 },
    /// `commit_write` was called with a timestamp not greater than the
    /// chain's current newest committed version.
    CommitTsTooOld { row_id: u128 },
    /// A mutating call targeted a chain head that is not currently an
    /// intent (e.g. `commit_write`/`abort_write` with nothing pending).
    NoPendingIntent { row_id: u128 },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::TxIdMismatch { row_id, owner, requester } => write!(
                f,
                "row {} has an intent owned by tx {}, requested by tx {}",
                row_id, owner, requester
            ),
            StorageError::IntentExists { row_id } => {
                write!(f, "row {} already has a write intent", row_id)
            }
            StorageError::CommitTsTooOld { row_id } => write!(
                f,
                "commit timestamp for row {} is not newer than the latest committed version",
                row_id
            ),
            StorageError::NoPendingIntent { row_id } => {
                write!(f, "row {} has no pending write intent", row_id)
            }
        }
    }
}

impl std::error::Error for StorageError {}
