//! Row sets: the units of storage that compactions read and produce.
//!
//! A tablet holds one mutable [`MemRowSet`] and any number of immutable
//! [`DiskRowSet`]s. Both are shared through `Arc<dyn RowSet>` between the
//! tablet and whatever compaction currently references them.

mod delta_tracker;
mod diskrowset;
mod memrowset;

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

pub use delta_tracker::DeltaTracker;
pub use diskrowset::{DiskRowSet, DiskRowSetWriter};
pub use memrowset::{MemRow, MemRowSet};

use crate::{
    compaction::{CompactionError, CompactionInput},
    id::RowSetId,
    mutation::RowChange,
    mvcc::{MvccSnapshot, Timestamp},
    option::TabletOption,
    row::RowKey,
    schema::SchemaRef,
};

/// Shared handle to a row set.
pub type RowSetRef = Arc<dyn RowSet>;

/// Capabilities every row set exposes to the tablet and to compactions.
pub trait RowSet: Send + Sync + fmt::Display {
    fn id(&self) -> RowSetId;

    fn schema(&self) -> &SchemaRef;

    /// Build an input yielding the rows inserted before `snap`, each with its
    /// full (unfiltered) mutation chain.
    fn new_compaction_input(
        self: Arc<Self>,
        snap: &MvccSnapshot,
        option: &TabletOption,
    ) -> Result<Box<dyn CompactionInput>, CompactionError>;

    /// Append `change` to the row with `key`.
    ///
    /// Returns `Ok(false)` if the row is not stored here or is already deleted.
    fn mutate_row(
        &self,
        key: &RowKey,
        ts: Timestamp,
        change: RowChange,
    ) -> Result<bool, CompactionError>;

    /// Whether a live (not deleted) row with `key` is stored here.
    fn check_row_present(&self, key: &RowKey) -> bool;

    fn count_rows(&self) -> u64;

    fn estimate_on_disk_size(&self) -> u64;

    /// Advisory lock marking the row set as taking part in a compaction.
    fn compaction_lock(&self) -> &CompactionLock;
}

/// Non-blocking, advisory mutual exclusion for compaction selection.
///
/// Acquisition is try-only; a compaction that cannot take a row set's lock
/// skips the row set instead of waiting on it.
#[derive(Debug, Default)]
pub struct CompactionLock {
    held: Arc<AtomicBool>,
}

impl CompactionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock if it is free.
    pub fn try_lock(&self) -> Option<CompactionLockGuard> {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| CompactionLockGuard {
                held: Arc::clone(&self.held),
            })
    }

    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof of a held [`CompactionLock`]; releases it on drop.
#[derive(Debug)]
pub struct CompactionLockGuard {
    held: Arc<AtomicBool>,
}

impl CompactionLockGuard {
    /// Whether this guard holds `lock`.
    pub fn guards(&self, lock: &CompactionLock) -> bool {
        Arc::ptr_eq(&self.held, &lock.held)
    }
}

impl Drop for CompactionLockGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::CompactionLock;

    #[test]
    fn try_lock_never_waits() {
        let lock = CompactionLock::new();
        let guard = lock.try_lock().expect("free lock");
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());
        assert!(guard.guards(&lock));
        assert!(!guard.guards(&CompactionLock::new()));
        drop(guard);
        assert!(!lock.is_locked());
        assert!(lock.try_lock().is_some());
    }
}
