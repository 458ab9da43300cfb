use std::{fmt, sync::Arc};

use super::{merge, CompactionError, CompactionInput};
use crate::{
    mvcc::MvccSnapshot,
    observability::log_info,
    option::TabletOption,
    rowset::{CompactionLockGuard, RowSetRef},
    schema::SchemaRef,
};

/// The row sets selected for one compaction, each held under its compaction
/// lock.
///
/// Dropping the selection releases every lock.
#[derive(Default)]
pub struct RowSetsInCompaction {
    rowsets: Vec<RowSetRef>,
    locks: Vec<CompactionLockGuard>,
}

impl RowSetsInCompaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `rowset`, whose compaction lock the caller already took.
    ///
    /// # Panics
    ///
    /// Panics if `lock` does not guard `rowset`'s compaction lock.
    pub fn add_rowset(&mut self, rowset: RowSetRef, lock: CompactionLockGuard) {
        assert!(
            lock.guards(rowset.compaction_lock()),
            "lock passed for {} does not guard it",
            rowset
        );
        self.rowsets.push(rowset);
        self.locks.push(lock);
    }

    /// Lock `rowset` and add it. Fails without waiting if another compaction
    /// holds the lock.
    pub fn try_add(&mut self, rowset: RowSetRef) -> Result<(), CompactionError> {
        let lock = rowset
            .compaction_lock()
            .try_lock()
            .ok_or_else(|| CompactionError::LockUnavailable(rowset.id()))?;
        self.add_rowset(rowset, lock);
        Ok(())
    }

    /// One input over every selected row set: the row set's own input when
    /// there is only one, a merge otherwise.
    pub fn create_compaction_input(
        &self,
        snap: &MvccSnapshot,
        schema: &SchemaRef,
        option: &TabletOption,
    ) -> Result<Box<dyn CompactionInput>, CompactionError> {
        if let [rowset] = self.rowsets.as_slice() {
            let input = Arc::clone(rowset).new_compaction_input(snap, option)?;
            if !input.schema().structurally_eq(schema) {
                return Err(CompactionError::SchemaMismatch(format!(
                    "{} does not match the compaction schema",
                    rowset
                )));
            }
            return Ok(input);
        }
        let inputs = self
            .rowsets
            .iter()
            .map(|rowset| Arc::clone(rowset).new_compaction_input(snap, option))
            .collect::<Result<Vec<_>, _>>()?;
        merge(inputs, Arc::clone(schema), option.block_size())
    }

    pub fn rowsets(&self) -> &[RowSetRef] {
        &self.rowsets
    }

    pub fn num_rowsets(&self) -> usize {
        self.rowsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rowsets.is_empty()
    }

    pub fn dump_to_log(&self) {
        log_info!(
            component = "compaction",
            event = "selection",
            rowsets = self.rowsets.len(),
            summary = %self,
        );
        for rowset in &self.rowsets {
            log_info!(
                component = "compaction",
                event = "selection_rowset",
                rowset = %rowset,
                rows = rowset.count_rows(),
                bytes = rowset.estimate_on_disk_size(),
            );
        }
    }
}

impl fmt::Display for RowSetsInCompaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total: u64 = self
            .rowsets
            .iter()
            .map(|rowset| rowset.estimate_on_disk_size())
            .sum();
        write!(
            f,
            "{} rowsets, {} bytes on disk",
            self.rowsets.len(),
            total
        )
    }
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::{DataType, Field};

    use super::*;
    use crate::{
        id::RowSetId,
        mvcc::Timestamp,
        row::{Row, Value},
        rowset::{MemRowSet, RowSet},
        schema::Schema,
    };

    fn schema() -> SchemaRef {
        Arc::new(Schema::try_new(vec![Field::new("id", DataType::Int64, false)], 1).unwrap())
    }

    fn rowset(ids: &[i64]) -> Arc<MemRowSet> {
        let mrs = Arc::new(MemRowSet::new(RowSetId::new(), schema()));
        for id in ids {
            mrs.insert(Row::new(vec![Value::Int64(*id)]), Timestamp::new(1))
                .unwrap();
        }
        mrs
    }

    #[test]
    fn locks_live_as_long_as_the_selection() {
        let a = rowset(&[1]);
        let mut selection = RowSetsInCompaction::new();
        selection.try_add(a.clone()).unwrap();
        assert!(a.compaction_lock().is_locked());
        assert_eq!(selection.rowsets()[0].id(), a.id());

        let mut rival = RowSetsInCompaction::new();
        let err = rival.try_add(a.clone()).unwrap_err();
        assert!(err.is_lock_unavailable());
        assert!(rival.is_empty());

        drop(selection);
        assert!(!a.compaction_lock().is_locked());
        rival.try_add(a).unwrap();
    }

    #[test]
    #[should_panic(expected = "does not guard")]
    fn add_rowset_requires_matching_lock() {
        let a = rowset(&[1]);
        let b = rowset(&[2]);
        let guard = b.compaction_lock().try_lock().unwrap();
        RowSetsInCompaction::new().add_rowset(a, guard);
    }

    #[test]
    fn input_merges_many_and_passes_one_through() {
        let option = TabletOption::from("/unused");
        let snap = MvccSnapshot::including_all();

        let mut single = RowSetsInCompaction::new();
        single.try_add(rowset(&[3, 1])).unwrap();
        let mut input = single
            .create_compaction_input(&snap, &schema(), &option)
            .unwrap();
        input.init().unwrap();
        assert_eq!(input.prepare_block().unwrap().len(), 2);

        let mut many = RowSetsInCompaction::new();
        many.try_add(rowset(&[1, 4])).unwrap();
        many.try_add(rowset(&[2])).unwrap();
        many.try_add(rowset(&[3])).unwrap();
        assert_eq!(many.num_rowsets(), 3);
        many.dump_to_log();
        let mut input = many
            .create_compaction_input(&snap, &schema(), &option)
            .unwrap();
        input.init().unwrap();
        let keys = input
            .prepare_block()
            .unwrap()
            .iter()
            .map(|r| r.row.values()[0].clone())
            .collect::<Vec<_>>();
        assert_eq!(keys, (1..=4).map(Value::Int64).collect::<Vec<_>>());
    }
}
