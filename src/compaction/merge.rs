use std::{
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
};

use super::{BlockBuffer, CompactionError, CompactionInput, CompactionInputRow};
use crate::{row::RowKey, schema::SchemaRef};

/// N-way, key-ordered merge over other compaction inputs.
///
/// Each child is pulled one block at a time into a queue of pending rows; the
/// heap holds the front key of every non-empty queue. On equal keys the input
/// listed first wins.
pub struct MergeCompactionInput {
    schema: SchemaRef,
    children: Vec<MergeChild>,
    heap: BinaryHeap<CmpEntry>,
    block_size: usize,
    buffer: BlockBuffer,
}

struct MergeChild {
    input: Box<dyn CompactionInput>,
    pending: VecDeque<CompactionInputRow>,
}

impl MergeChild {
    /// Pull blocks until there is at least one pending row or the child is
    /// exhausted.
    fn refill(&mut self) -> Result<(), CompactionError> {
        while self.pending.is_empty() && self.input.has_more_blocks() {
            let block = self.input.prepare_block()?;
            self.pending.extend(block.iter().cloned());
            self.input.finish_block()?;
        }
        Ok(())
    }
}

impl MergeCompactionInput {
    /// Merge `inputs` under `schema`. Every input must share its structure.
    pub fn new(
        inputs: Vec<Box<dyn CompactionInput>>,
        schema: SchemaRef,
        block_size: usize,
    ) -> Result<Self, CompactionError> {
        if let Some((idx, _)) = inputs
            .iter()
            .enumerate()
            .find(|(_, input)| !input.schema().structurally_eq(&schema))
        {
            return Err(CompactionError::SchemaMismatch(format!(
                "merge input {} does not match the merge schema",
                idx
            )));
        }
        let block_size = block_size.max(1);
        Ok(Self {
            schema,
            heap: BinaryHeap::with_capacity(inputs.len()),
            children: inputs
                .into_iter()
                .map(|input| MergeChild {
                    input,
                    pending: VecDeque::new(),
                })
                .collect(),
            block_size,
            buffer: BlockBuffer::new(block_size),
        })
    }

    pub fn num_inputs(&self) -> usize {
        self.children.len()
    }

    fn push_front_key(&mut self, idx: usize) {
        if let Some(front) = self.children[idx].pending.front() {
            self.heap.push(CmpEntry {
                key: self.schema.key_of(&front.row),
                idx,
            });
        }
    }
}

/// Build a [`MergeCompactionInput`] over `inputs`.
pub fn merge(
    inputs: Vec<Box<dyn CompactionInput>>,
    schema: SchemaRef,
    block_size: usize,
) -> Result<Box<dyn CompactionInput>, CompactionError> {
    Ok(Box::new(MergeCompactionInput::new(
        inputs, schema, block_size,
    )?))
}

impl CompactionInput for MergeCompactionInput {
    fn init(&mut self) -> Result<(), CompactionError> {
        self.buffer.mark_initialized()?;
        for idx in 0..self.children.len() {
            let child = &mut self.children[idx];
            child.input.init()?;
            child.refill()?;
            self.push_front_key(idx);
        }
        Ok(())
    }

    fn prepare_block(&mut self) -> Result<&[CompactionInputRow], CompactionError> {
        if !self.buffer.begin_block()? {
            return Ok(self.buffer.rows());
        }
        while self.buffer.len() < self.block_size {
            let Some(CmpEntry { idx, .. }) = self.heap.pop() else {
                break;
            };
            let child = &mut self.children[idx];
            let Some(row) = child.pending.pop_front() else {
                continue;
            };
            child.refill()?;
            self.buffer.push(row);
            self.push_front_key(idx);
        }
        Ok(self.buffer.rows())
    }

    fn finish_block(&mut self) -> Result<(), CompactionError> {
        let has_more = !self.heap.is_empty();
        self.buffer.end_block(has_more)
    }

    fn has_more_blocks(&self) -> bool {
        self.buffer.has_more(|| !self.heap.is_empty())
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }
}

#[derive(Debug)]
struct CmpEntry {
    key: RowKey,
    idx: usize,
}

impl PartialEq for CmpEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CmpEntry {}

impl PartialOrd for CmpEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CmpEntry {
    // reversed: `BinaryHeap` is a max-heap
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}
