//! Snapshot Copier.
//!
//! Two halves: `OutgoingSnapshot`, a `storage::SnapshotObserver` that keeps
//! a consistent view of a partition while it streams out, and
//! `IncomingCopier`, which drives the phases a follower runs through to
//! install a snapshot it is sent.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use common::errors::*;
use storage::{PartitionStorage, RowId, RowVersion};

/// Tracks one outgoing snapshot's progress through a partition's row-id
/// space, and the set of rows it has already committed to sending. Register
/// with `PartitionStorage::register_observer` before starting the scan.
pub struct OutgoingSnapshot {
    cursor: Mutex<Option<RowId>>,
    finished: Mutex<bool>,
    sent_set: Mutex<HashSet<RowId>>,
    send_queue: Mutex<VecDeque<(RowId, Vec<RowVersion>)>>,
}

impl OutgoingSnapshot {
    pub fn new() -> Self {
        Self {
            cursor: Mutex::new(None),
            finished: Mutex::new(false),
            sent_set: Mutex::new(HashSet::new()),
            send_queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Drains rows that were pulled out of order because a concurrent
    /// mutation touched them before the in-order scan reached them. The
    /// copier should send these ahead of (or interleaved with) the regular
    /// page it is building.
    pub fn take_pending(&self) -> Vec<(RowId, Vec<RowVersion>)> {
        let mut queue = self.send_queue.lock().unwrap();
        queue.drain(..).collect()
    }

    /// Advances the in-order scan by one row, skipping rows already sent
    /// out of order. Returns `None` once the partition is exhausted.
    pub fn advance(&self, storage: &PartitionStorage) -> Option<(RowId, Vec<RowVersion>)> {
        loop {
            if *self.finished.lock().unwrap() {
                return None;
            }

            let lower = match *self.cursor.lock().unwrap() {
                Some(last) => RowId(last.0 + 1),
                None => RowId(0),
            };

            let Some(next_id) = storage.closest_row_id(lower) else {
                *self.finished.lock().unwrap() = true;
                return None;
            };
            *self.cursor.lock().unwrap() = Some(next_id);

            let mut sent_set = self.sent_set.lock().unwrap();
            if sent_set.contains(&next_id) {
                continue;
            }
            sent_set.insert(next_id);
            drop(sent_set);

            let chain: Vec<_> = storage.scan_versions(next_id).collect();
            return Some((next_id, chain));
        }
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.lock().unwrap()
    }
}

impl Default for OutgoingSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl storage::SnapshotObserver for OutgoingSnapshot {
    fn before_mutate(&self, row_id: RowId, chain: &[RowVersion]) {
        if *self.finished.lock().unwrap() {
            return;
        }

        let mut sent_set = self.sent_set.lock().unwrap();
        if sent_set.contains(&row_id) {
            return;
        }
        sent_set.insert(row_id);
        drop(sent_set);

        self.send_queue
            .lock()
            .unwrap()
            .push_back((row_id, chain.to_vec()));
    }
}

/// Sender-side meta describing the snapshot being copied.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotMeta {
    pub last_included_index: u64,
}

pub struct MvPage {
    pub rows: Vec<(RowId, Vec<RowVersion>)>,
    pub done: bool,
}

/// Opaque per-transaction state, keyed by tx id.
pub struct TxStatePage {
    pub entries: Vec<(u64, Vec<u8>)>,
    pub done: bool,
}

/// The remote side of a snapshot transfer, as seen by the copier. The `rpc`
/// crate provides the real implementation over the wire; tests use an
/// in-memory fake.
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn request_meta(&self) -> Result<SnapshotMeta>;
    async fn next_mv_page(&self) -> Result<MvPage>;
    async fn next_tx_state_page(&self) -> Result<TxStatePage>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyStatus {
    Running,
    Done,
    Cancelled,
    Failed(String),
}

/// Out-of-band metadata a `PartitionStorage` does not itself track: the
/// "full rebalance started" sentinel a restart checks for, and the raft
/// index the installed snapshot corresponds to.
#[derive(Debug, Default)]
pub struct PartitionMeta {
    pub rebalance_started: bool,
    pub last_included_index: Option<u64>,
}

/// Drives the phases an incoming snapshot transfer runs through.
/// Cancellation is cooperative: `cancel()` just flips a flag that every
/// phase checks before proceeding.
pub struct IncomingCopier {
    cancel: AtomicBool,
    status: Mutex<CopyStatus>,
}

impl IncomingCopier {
    pub fn new() -> Self {
        Self {
            cancel: AtomicBool::new(false),
            status: Mutex::new(CopyStatus::Running),
        }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(err_msg("snapshot copy cancelled"));
        }
        Ok(())
    }

    fn fail(&self, message: String) -> Error {
        let mut status = self.status.lock().unwrap();
        if *status == CopyStatus::Running {
            *status = CopyStatus::Failed(message.clone());
        }
        err_msg(message)
    }

    /// Runs all five phases against `source`, writing into `mv` and
    /// `tx_state`. On success both storages are stamped with the snapshot's
    /// `last_included_index`.
    pub async fn run(
        &self,
        source: &dyn SnapshotSource,
        mv: &PartitionStorage,
        tx_state: &PartitionStorage,
        mv_meta: &Mutex<PartitionMeta>,
        tx_meta: &Mutex<PartitionMeta>,
    ) -> Result<()> {
        // Phase 1: mark both target storages so a crash mid-stream is
        // detectable on restart.
        self.check_cancelled()?;
        mv_meta.lock().unwrap().rebalance_started = true;
        tx_meta.lock().unwrap().rebalance_started = true;

        // Phase 2: request snapshot meta from the sender.
        self.check_cancelled()?;
        let meta = source
            .request_meta()
            .await
            .map_err(|e| self.fail(e.to_string()))?;

        // Phase 3: stream MV data, applying each page consistently -- every
        // version for a row id lands inside one call to `run_consistently`.
        loop {
            self.check_cancelled()?;
            let page = source
                .next_mv_page()
                .await
                .map_err(|e| self.fail(e.to_string()))?;

            for (row_id, versions) in page.rows {
                self.check_cancelled()?;
                mv.run_consistently(move |chains| {
                    chains.insert(row_id, versions);
                });
            }

            if page.done {
                break;
            }
        }

        // Phase 4: stream tx-state pages. Represented as opaque committed
        // rows keyed by a synthetic row id derived from the tx id, since
        // transaction state shares the same version-chain storage shape.
        loop {
            self.check_cancelled()?;
            let page = source
                .next_tx_state_page()
                .await
                .map_err(|e| self.fail(e.to_string()))?;

            for (tx_id, blob) in page.entries {
                self.check_cancelled()?;
                let row_id = RowId(tx_id as u128);
                let row = row::Row {
                    schema_version: 0,
                    flags: 0,
                    key_hash: 0,
                    key_chunk: Vec::new(),
                    value_chunk: blob,
                };
                let _ = tx_state.add_write_committed(row_id, row, hlc::Timestamp::ZERO);
            }

            if page.done {
                break;
            }
        }

        // Phase 5: stamp both storages with the snapshot's index.
        self.check_cancelled()?;
        mv_meta.lock().unwrap().last_included_index = Some(meta.last_included_index);
        tx_meta.lock().unwrap().last_included_index = Some(meta.last_included_index);

        *self.status.lock().unwrap() = CopyStatus::Done;
        Ok(())
    }

    /// Surfaces the terminal status: `Cancelled` if `cancel()` was called
    /// and no other terminal error already won the race, otherwise whatever
    /// `run` last recorded.
    pub fn join(&self) -> CopyStatus {
        let mut status = self.status.lock().unwrap();
        if self.cancel.load(Ordering::SeqCst) && *status == CopyStatus::Running {
            *status = CopyStatus::Cancelled;
        }
        status.clone()
    }
}

impl Default for IncomingCopier {
    fn default() -> Self {
        Self::new()
    }
}
