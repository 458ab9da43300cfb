//! Compaction and flush engine.
//!
//! A [`CompactionInput`] is a pull-based, block-batched producer of base rows
//! paired with their mutation chains. Leaf inputs read a single row set
//! ([`DiskRowSetCompactionInput`], [`MemRowSetCompactionInput`]);
//! [`MergeCompactionInput`] fans several inputs into one key-ordered stream.
//! Consumers ([`flush`], [`reupdate_missed_deltas`],
//! [`debug_dump_compaction_input`]) drain an input exactly once.

mod error;
mod flush;
mod input;
mod merge;
mod rowsets;

use std::sync::Arc;

pub use error::CompactionError;
pub use flush::{
    apply_mutations, debug_dump_compaction_input, flush, materialize_rows,
    reupdate_missed_deltas, FlushStats,
};
pub use input::{DiskRowSetCompactionInput, MemRowSetCompactionInput};
pub use merge::{merge, MergeCompactionInput};
pub use rowsets::RowSetsInCompaction;

use crate::{
    mutation::{Mutation, MutationIter},
    mvcc::Timestamp,
    row::Row,
    schema::SchemaRef,
};

/// One row yielded by [`CompactionInput::prepare_block`].
///
/// `mutation_head` is the head of the row's full mutation chain. It is not
/// filtered by the input's snapshot: consumers must test each mutation's
/// commit visibility themselves.
#[derive(Debug, Clone)]
pub struct CompactionInputRow {
    pub row: Row,
    /// Commit timestamp of the insert that created the base row.
    pub inserted_at: Timestamp,
    pub mutation_head: Option<Arc<Mutation>>,
}

impl CompactionInputRow {
    pub fn mutations(&self) -> MutationIter<'_> {
        MutationIter::from_head(self.mutation_head.as_ref())
    }
}

/// Interface for an input feeding into a compaction or flush.
///
/// Inputs are single-use: `init` once, then alternate `prepare_block` and
/// `finish_block` while `has_more_blocks` holds. Calls made out of that order
/// fail with [`CompactionError::NotInitialized`] or
/// [`CompactionError::OutOfOrder`]. Once drained, `prepare_block` yields an
/// empty block.
pub trait CompactionInput: Send {
    /// Open the underlying readers.
    fn init(&mut self) -> Result<(), CompactionError>;

    /// Produce the next block of rows. The rows stay valid until the matching
    /// [`CompactionInput::finish_block`].
    fn prepare_block(&mut self) -> Result<&[CompactionInputRow], CompactionError>;

    /// Release the most recent block.
    fn finish_block(&mut self) -> Result<(), CompactionError>;

    fn has_more_blocks(&self) -> bool;

    fn schema(&self) -> &SchemaRef;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrainState {
    Created,
    Initialized,
    /// A block has been handed out and not yet finished.
    Draining,
    Exhausted,
}

/// Block storage plus the drain state machine shared by every input.
#[derive(Debug)]
pub(crate) struct BlockBuffer {
    state: DrainState,
    rows: Vec<CompactionInputRow>,
}

impl BlockBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: DrainState::Created,
            rows: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn state(&self) -> DrainState {
        self.state
    }

    pub(crate) fn mark_initialized(&mut self) -> Result<(), CompactionError> {
        match self.state {
            DrainState::Created => {
                self.state = DrainState::Initialized;
                Ok(())
            }
            _ => Err(CompactionError::OutOfOrder("init called more than once")),
        }
    }

    /// Start a new block. Returns `false` when the input is already exhausted,
    /// in which case the (empty) block must be returned as is.
    pub(crate) fn begin_block(&mut self) -> Result<bool, CompactionError> {
        match self.state {
            DrainState::Created => Err(CompactionError::NotInitialized("prepare_block")),
            DrainState::Draining => Err(CompactionError::OutOfOrder(
                "prepare_block called before finish_block",
            )),
            DrainState::Exhausted => {
                self.rows.clear();
                Ok(false)
            }
            DrainState::Initialized => {
                self.rows.clear();
                self.state = DrainState::Draining;
                Ok(true)
            }
        }
    }

    pub(crate) fn end_block(&mut self, source_has_more: bool) -> Result<(), CompactionError> {
        match self.state {
            DrainState::Created => Err(CompactionError::NotInitialized("finish_block")),
            DrainState::Initialized => Err(CompactionError::OutOfOrder(
                "finish_block called without a prepared block",
            )),
            DrainState::Draining => {
                self.rows.clear();
                self.state = if source_has_more {
                    DrainState::Initialized
                } else {
                    DrainState::Exhausted
                };
                Ok(())
            }
            DrainState::Exhausted => Ok(()),
        }
    }

    /// An input that was never initialised still reports more blocks so the
    /// consumer reaches `prepare_block` and gets a `NotInitialized` error
    /// instead of silently seeing an empty source.
    pub(crate) fn has_more(&self, source_has_more: impl FnOnce() -> bool) -> bool {
        match self.state {
            DrainState::Created => true,
            DrainState::Exhausted => false,
            DrainState::Initialized | DrainState::Draining => source_has_more(),
        }
    }

    pub(crate) fn rows(&self) -> &[CompactionInputRow] {
        &self.rows
    }

    pub(crate) fn push(&mut self, row: CompactionInputRow) {
        self.rows.push(row);
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }
}
