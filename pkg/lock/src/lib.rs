//! Index Lockers.
//!
//! Locks are keyed by `(index_id, byte_sequence)` and held until the owning
//! transaction commits or aborts (callers are expected to call `release`
//! from that path; there is no lease/timeout in this crate — the lock
//! manager only arbitrates compatibility, deadlock handling is left to
//! the transaction layer.

use std::collections::HashMap;
use std::sync::Mutex;

use async_std::channel;
use common::errors::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared: acquired on lookup.
    S,
    /// Exclusive: acquired on a unique-index insert/remove.
    X,
    /// Intent-exclusive: acquired on a non-unique-index insert/remove.
    IX,
}

impl LockMode {
    fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        matches!((self, other), (S, S) | (IX, IX))
    }
}

pub type TxId = u64;

#[derive(Clone, Hash, PartialEq, Eq)]
struct LockKey {
    index_id: u32,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct LockEntry {
    holders: Vec<(TxId, LockMode)>,
    waiters: Vec<channel::Sender<()>>,
}

/// A central lock manager shared by every index locker in a partition.
#[derive(Default)]
pub struct LockTable {
    state: Mutex<HashMap<LockKey, LockEntry>>,
}

/// RAII-ish handle identifying an acquired lock; callers release explicitly
/// via `LockTable::release` when their transaction commits or aborts (the
/// lock manager does not track transaction lifetime itself).
pub struct LockHandle {
    pub index_id: u32,
    pub key: Vec<u8>,
    pub tx_id: TxId,
    pub mode: LockMode,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires `mode` on `(index_id, key)` for `tx_id`, suspending the
    /// caller while an incompatible lock is held by another transaction.
    pub async fn acquire(
        &self,
        index_id: u32,
        key: &[u8],
        tx_id: TxId,
        mode: LockMode,
    ) -> Result<LockHandle> {
        let lock_key = LockKey {
            index_id,
            bytes: key.to_vec(),
        };

        loop {
            let wait_for = {
                let mut state = self.state.lock().unwrap();
                let entry = state.entry(lock_key.clone()).or_default();

                let conflict = entry
                    .holders
                    .iter()
                    .any(|(holder_tx, holder_mode)| {
                        *holder_tx != tx_id && !mode.compatible_with(*holder_mode)
                    });

                if !conflict {
                    entry.holders.push((tx_id, mode));
                    return Ok(LockHandle {
                        index_id,
                        key: key.to_vec(),
                        tx_id,
                        mode,
                    });
                }

                let (sender, receiver) = channel::bounded(1);
                entry.waiters.push(sender);
                receiver
            };

            // Another transaction must release before we can make progress;
            // block until notified and then re-check compatibility.
            let _ = wait_for.recv().await;
        }
    }

    pub fn release(&self, handle: &LockHandle) {
        let mut state = self.state.lock().unwrap();
        let lock_key = LockKey {
            index_id: handle.index_id,
            bytes: handle.key.clone(),
        };
        let Some(entry) = state.get_mut(&lock_key) else {
            return;
        };
        entry
            .holders
            .retain(|(tx_id, _)| *tx_id != handle.tx_id);

        if entry.holders.is_empty() {
            for waiter in entry.waiters.drain(..) {
                let _ = waiter.try_send(());
            }
        }
        if entry.holders.is_empty() && entry.waiters.is_empty() {
            state.remove(&lock_key);
        }
    }
}

/// Per-index lock acquisition discipline for lookup/insert/remove.
#[async_trait::async_trait]
pub trait IndexLocker {
    async fn lookup(&self, key: &[u8], tx_id: TxId) -> Result<LockHandle>;
    async fn insert(&self, key: &[u8], tx_id: TxId, unique: bool) -> Result<LockHandle>;
    async fn remove(&self, key: &[u8], tx_id: TxId, unique: bool) -> Result<LockHandle>;
}

pub struct HashIndexLocker<'a> {
    pub index_id: u32,
    pub table: &'a LockTable,
}

#[async_trait::async_trait]
impl<'a> IndexLocker for HashIndexLocker<'a> {
    async fn lookup(&self, key: &[u8], tx_id: TxId) -> Result<LockHandle> {
        self.table.acquire(self.index_id, key, tx_id, LockMode::S).await
    }

    async fn insert(&self, key: &[u8], tx_id: TxId, unique: bool) -> Result<LockHandle> {
        let mode = if unique { LockMode::X } else { LockMode::IX };
        self.table.acquire(self.index_id, key, tx_id, mode).await
    }

    async fn remove(&self, key: &[u8], tx_id: TxId, unique: bool) -> Result<LockHandle> {
        self.insert(key, tx_id, unique).await
    }
}

pub struct SortedIndexLocker<'a> {
    pub index_id: u32,
    pub table: &'a LockTable,
}

#[async_trait::async_trait]
impl<'a> IndexLocker for SortedIndexLocker<'a> {
    async fn lookup(&self, key: &[u8], tx_id: TxId) -> Result<LockHandle> {
        self.table.acquire(self.index_id, key, tx_id, LockMode::S).await
    }

    async fn insert(&self, key: &[u8], tx_id: TxId, _unique: bool) -> Result<LockHandle> {
        // TODO: additionally acquire an IX gap lock on the next-greater key
        // to prevent phantoms. Not yet wired up; the exact-key lock below
        // is the full public contract for now.
        self.table.acquire(self.index_id, key, tx_id, LockMode::X).await
    }

    async fn remove(&self, key: &[u8], tx_id: TxId, _unique: bool) -> Result<LockHandle> {
        self.table.acquire(self.index_id, key, tx_id, LockMode::IX).await
    }
}
