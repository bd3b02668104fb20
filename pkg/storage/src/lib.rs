//! MVCC Partition Storage.
//!
//! Version chains keyed by `RowId`; write intents; commit; scan at
//! timestamp; and the observer hook the snapshot copier hangs its
//! out-of-order send coordination off of.

pub mod errors;
pub mod ids;

pub use errors::StorageError;
pub use ids::{PartitionKey, RowId};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use common::errors::*;
use hlc::Timestamp;
use row::Row;

/// One version on a chain. `commit_ts == None` marks the write intent (if
/// any); it is always the chain head when present.
#[derive(Debug, Clone)]
pub struct RowVersion {
    pub row: Row,
    pub commit_ts: Option<Timestamp>,
    pub tx_id: Option<u64>,
    pub commit_table_id: Option<common::uuid::Uuid>,
    pub commit_partition_id: Option<u16>,
}

impl RowVersion {
    fn is_intent(&self) -> bool {
        self.commit_ts.is_none()
    }
}

#[derive(Debug, Clone)]
pub enum ReadResult {
    Empty,
    Committed(Row),
    WriteIntent {
        row: Row,
        newest_committed_ts: Option<Timestamp>,
    },
}

/// Called before a mutating call proceeds, while the partition's exclusive
/// write lease is held. Implemented by `snapshot::OutgoingSnapshot` to
/// capture a consistent view of `row_id` before the mutation changes it.
pub trait SnapshotObserver: Send + Sync {
    fn before_mutate(&self, row_id: RowId, chain: &[RowVersion]);
}

/// A non-paginating, in-memory iterator over `T`.
pub struct Cursor<T> {
    items: std::vec::IntoIter<T>,
}

impl<T> Cursor<T> {
    fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }
}

impl<T> Iterator for Cursor<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.items.next()
    }
}

pub struct PartitionStorage {
    chains: RwLock<BTreeMap<RowId, Vec<RowVersion>>>,
    observers: Mutex<Vec<Arc<dyn SnapshotObserver>>>,
}

impl PartitionStorage {
    pub fn new() -> Self {
        Self {
            chains: RwLock::new(BTreeMap::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn register_observer(&self, observer: Arc<dyn SnapshotObserver>) {
        self.observers.lock().unwrap().push(observer);
    }

    pub fn clear_observers(&self) {
        self.observers.lock().unwrap().clear();
    }

    fn notify_observers(&self, row_id: RowId, chain: &[RowVersion]) {
        for observer in self.observers.lock().unwrap().iter() {
            observer.before_mutate(row_id, chain);
        }
    }

    /// Holds a per-partition exclusive lease for the duration of `f`. No
    /// suspension may occur inside `f` -- it is a plain synchronous
    /// closure, never an `async` block.
    pub fn run_consistently<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut BTreeMap<RowId, Vec<RowVersion>>) -> R,
    {
        let mut guard = self.chains.write().unwrap();
        f(&mut guard)
    }

    /// Returns the version of `row_id` visible at `ts`: the write intent
    /// if the head is one and `ts` asks for the latest value, else the
    /// newest committed version with a commit timestamp `<= ts`.
    pub fn read(&self, row_id: RowId, ts: Timestamp) -> ReadResult {
        let chains = self.chains.read().unwrap();
        let Some(chain) = chains.get(&row_id) else {
            return ReadResult::Empty;
        };
        Self::read_chain(chain, ts)
    }

    fn read_chain(chain: &[RowVersion], ts: Timestamp) -> ReadResult {
        let Some(head) = chain.first() else {
            return ReadResult::Empty;
        };

        if head.is_intent() {
            if ts == Timestamp::MAX {
                let newest_committed_ts = chain.iter().find_map(|v| v.commit_ts);
                return ReadResult::WriteIntent {
                    row: head.row.clone(),
                    newest_committed_ts,
                };
            }
        }

        for version in chain {
            if let Some(commit_ts) = version.commit_ts {
                if commit_ts <= ts {
                    return ReadResult::Committed(version.row.clone());
                }
            }
        }

        ReadResult::Empty
    }

    pub fn scan(&self, ts: Timestamp) -> Cursor<(RowId, ReadResult)> {
        let chains = self.chains.read().unwrap();
        let items = chains
            .iter()
            .map(|(row_id, chain)| (*row_id, Self::read_chain(chain, ts)))
            .collect();
        Cursor::new(items)
    }

    pub fn scan_versions(&self, row_id: RowId) -> Cursor<RowVersion> {
        let chains = self.chains.read().unwrap();
        let items = chains.get(&row_id).cloned().unwrap_or_default();
        Cursor::new(items)
    }

    /// Installs or replaces the write intent on `row_id`. Returns the row
    /// previously intended by `tx_id` on this chain, if any.
    pub fn add_write(
        &self,
        row_id: RowId,
        row: Row,
        tx_id: u64,
        commit_table_id: common::uuid::Uuid,
        commit_partition_id: u16,
    ) -> Result<Option<Row>> {
        self.run_consistently(|chains| {
            let chain = chains.entry(row_id).or_insert_with(Vec::new);
            self.notify_observers(row_id, chain);

            if let Some(head) = chain.first() {
                if head.is_intent() {
                    if head.tx_id != Some(tx_id) {
                        return Err(StorageError::TxIdMismatch {
                            row_id: row_id.0,
                            owner: head.tx_id.unwrap(),
                            requester: tx_id,
                        }
                        .into());
                    }
                    let previous = chain[0].row.clone();
                    chain[0] = RowVersion {
                        row,
                        commit_ts: None,
                        tx_id: Some(tx_id),
                        commit_table_id: Some(commit_table_id),
                        commit_partition_id: Some(commit_partition_id),
                    };
                    return Ok(Some(previous));
                }
            }

            chain.insert(
                0,
                RowVersion {
                    row,
                    commit_ts: None,
                    tx_id: Some(tx_id),
                    commit_table_id: Some(commit_table_id),
                    commit_partition_id: Some(commit_partition_id),
                },
            );
            Ok(None)
        })
    }

    /// Removes the intent on `row_id`; drops the chain entirely if it was
    /// the only version.
    pub fn abort_write(&self, row_id: RowId) -> Result<()> {
        self.run_consistently(|chains| {
            if let Some(chain) = chains.get_mut(&row_id) {
                self.notify_observers(row_id, chain);

                match chain.first() {
                    Some(head) if head.is_intent() => {
                        chain.remove(0);
                    }
                    _ => return Err(StorageError::NoPendingIntent { row_id: row_id.0 }.into()),
                }

                if chain.is_empty() {
                    chains.remove(&row_id);
                }
            } else {
                return Err(StorageError::NoPendingIntent { row_id: row_id.0 }.into());
            }
            Ok(())
        })
    }

    /// Converts the chain head intent into a committed version at `ts`.
    pub fn commit_write(&self, row_id: RowId, ts: Timestamp) -> Result<()> {
        self.run_consistently(|chains| {
            let Some(chain) = chains.get_mut(&row_id) else {
                return Err(StorageError::NoPendingIntent { row_id: row_id.0 }.into());
            };
            self.notify_observers(row_id, chain);

            match chain.first() {
                Some(head) if head.is_intent() => {}
                _ => return Err(StorageError::NoPendingIntent { row_id: row_id.0 }.into()),
            }

            if let Some(newest_committed) = chain.get(1).and_then(|v| v.commit_ts) {
                if ts <= newest_committed {
                    return Err(StorageError::CommitTsTooOld { row_id: row_id.0 }.into());
                }
            }

            let head = &mut chain[0];
            head.commit_ts = Some(ts);
            head.tx_id = None;
            head.commit_table_id = None;
            head.commit_partition_id = None;
            Ok(())
        })
    }

    /// Installs a committed version directly, without going through the
    /// intent/commit two-step. Rejects if an intent is present.
    pub fn add_write_committed(&self, row_id: RowId, row: Row, ts: Timestamp) -> Result<()> {
        self.run_consistently(|chains| {
            let chain = chains.entry(row_id).or_insert_with(Vec::new);
            self.notify_observers(row_id, chain);

            if let Some(head) = chain.first() {
                if head.is_intent() {
                    return Err(StorageError::IntentExists { row_id: row_id.0 }.into());
                }
                if ts <= head.commit_ts.unwrap() {
                    return Err(StorageError::CommitTsTooOld { row_id: row_id.0 }.into());
                }
            }

            chain.insert(
                0,
                RowVersion {
                    row,
                    commit_ts: Some(ts),
                    tx_id: None,
                    commit_table_id: None,
                    commit_partition_id: None,
                },
            );
            Ok(())
        })
    }

    pub fn closest_row_id(&self, lower: RowId) -> Option<RowId> {
        let chains = self.chains.read().unwrap();
        chains.range(lower..).next().map(|(row_id, _)| *row_id)
    }
}

impl Default for PartitionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use row::{assemble, Column, NativeType, Schema, Value};

    fn sample_row(n: i64) -> Row {
        let schema = Schema {
            version: 1,
            key_columns: vec![Column::new("id", NativeType::Int64, false)],
            value_columns: vec![Column::new("val", NativeType::Int64, false)],
        };
        assemble(&schema, &[Value::Int64(n)], &[Value::Int64(n * 10)]).unwrap()
    }

    fn uuid() -> common::uuid::Uuid {
        common::uuid::Uuid::nil()
    }

    #[test]
    fn commit_then_read_at_or_after_ts_sees_value() {
        let storage = PartitionStorage::new();
        let row_id = RowId(1);
        storage
            .add_write(row_id, sample_row(1), 7, uuid(), 0)
            .unwrap();

        let ts = Timestamp {
            physical_ms: 100,
            logical: 0,
        };
        storage.commit_write(row_id, ts).unwrap();

        let later = Timestamp {
            physical_ms: 200,
            logical: 0,
        };
        match storage.read(row_id, later) {
            ReadResult::Committed(row) => assert_eq!(row, sample_row(1)),
            other => panic!("expected committed row, got {:?}", other),
        }
    }

    #[test]
    fn abort_leaves_prior_committed_version_unchanged() {
        let storage = PartitionStorage::new();
        let row_id = RowId(2);
        let ts0 = Timestamp { physical_ms: 10, logical: 0 };
        storage.add_write_committed(row_id, sample_row(2), ts0).unwrap();

        storage.add_write(row_id, sample_row(99), 3, uuid(), 0).unwrap();
        storage.abort_write(row_id).unwrap();

        match storage.read(row_id, Timestamp::MAX) {
            ReadResult::Committed(row) => assert_eq!(row, sample_row(2)),
            other => panic!("expected the pre-intent committed row, got {:?}", other),
        }
    }

    #[test]
    fn conflicting_intent_fails_with_tx_id_mismatch() {
        let storage = PartitionStorage::new();
        let row_id = RowId(3);
        storage.add_write(row_id, sample_row(3), 1, uuid(), 0).unwrap();
        let err = storage.add_write(row_id, sample_row(4), 2, uuid(), 0);
        assert!(err.is_err());
    }

    #[test]
    fn read_at_max_with_intent_reports_intent_and_prior_committed_ts() {
        let storage = PartitionStorage::new();
        let row_id = RowId(4);
        let ts0 = Timestamp { physical_ms: 5, logical: 0 };
        storage.add_write_committed(row_id, sample_row(10), ts0).unwrap();
        storage.add_write(row_id, sample_row(11), 9, uuid(), 0).unwrap();

        match storage.read(row_id, Timestamp::MAX) {
            ReadResult::WriteIntent { row, newest_committed_ts } => {
                assert_eq!(row, sample_row(11));
                assert_eq!(newest_committed_ts, Some(ts0));
            }
            other => panic!("expected write intent, got {:?}", other),
        }
    }

    #[test]
    fn closest_row_id_finds_least_geq() {
        let storage = PartitionStorage::new();
        let ts0 = Timestamp { physical_ms: 1, logical: 0 };
        storage.add_write_committed(RowId(5), sample_row(5), ts0).unwrap();
        storage.add_write_committed(RowId(10), sample_row(10), ts0).unwrap();

        assert_eq!(storage.closest_row_id(RowId(6)), Some(RowId(10)));
        assert_eq!(storage.closest_row_id(RowId(10)), Some(RowId(10)));
        assert_eq!(storage.closest_row_id(RowId(11)), None);
    }
}
