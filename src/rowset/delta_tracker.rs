use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use crate::{
    compaction::CompactionError,
    id::RowSetId,
    mutation::{Mutation, MutationChain, RowChange},
    mvcc::Timestamp,
};

/// Records mutations against the rows of an immutable row set without
/// rewriting it.
///
/// Rows are addressed by their ordinal in the row set. Updates from writers
/// and replays from a compaction may interleave with concurrent readers; each
/// row's chain is append-only.
pub struct DeltaTracker {
    rowset: RowSetId,
    row_count: u32,
    chains: SkipMap<u32, MutationChain>,
}

impl DeltaTracker {
    pub fn new(rowset: RowSetId, row_count: u32) -> Self {
        Self {
            rowset,
            row_count,
            chains: SkipMap::new(),
        }
    }

    /// Record `change` committed at `ts` against row `row_idx`.
    pub fn update(
        &self,
        row_idx: u32,
        ts: Timestamp,
        change: RowChange,
    ) -> Result<(), CompactionError> {
        if row_idx >= self.row_count {
            return Err(CompactionError::RowNotFound {
                rowset: self.rowset,
                row_idx,
                row_count: self.row_count,
            });
        }
        self.chains
            .get_or_insert(row_idx, MutationChain::new())
            .value()
            .append(ts, change);
        Ok(())
    }

    /// Replay an existing mutation, keeping its commit timestamp.
    pub fn apply(&self, row_idx: u32, mutation: &Mutation) -> Result<(), CompactionError> {
        self.update(row_idx, mutation.ts(), mutation.change().clone())
    }

    pub fn mutation_head(&self, row_idx: u32) -> Option<Arc<Mutation>> {
        self.chains
            .get(&row_idx)
            .and_then(|entry| entry.value().head().cloned())
    }

    pub fn is_deleted(&self, row_idx: u32) -> bool {
        self.chains
            .get(&row_idx)
            .map(|entry| entry.value().is_deleted())
            .unwrap_or(false)
    }

    /// Number of rows with at least one mutation.
    pub fn num_updated_rows(&self) -> usize {
        self.chains.len()
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }
}
