use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReader;

use super::{BlockBuffer, CompactionError, CompactionInput, CompactionInputRow};
use crate::{
    mvcc::MvccSnapshot,
    row::{arrows::batch_to_rows, RowKey},
    rowset::{DiskRowSet, MemRowSet, RowSet},
    schema::SchemaRef,
};

/// Reads the base data of a [`DiskRowSet`] one parquet batch per block.
///
/// Rows whose insert is not committed in the snapshot are skipped; every
/// yielded row carries the delta tracker's chain for its ordinal.
pub struct DiskRowSetCompactionInput {
    rowset: Arc<DiskRowSet>,
    snap: MvccSnapshot,
    block_size: usize,
    reader: Option<ParquetRecordBatchReader>,
    peeked: Option<RecordBatch>,
    next_ordinal: u32,
    buffer: BlockBuffer,
}

impl DiskRowSetCompactionInput {
    pub fn new(rowset: Arc<DiskRowSet>, snap: MvccSnapshot, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            rowset,
            snap,
            block_size,
            reader: None,
            peeked: None,
            next_ordinal: 0,
            buffer: BlockBuffer::new(block_size),
        }
    }

    fn read_next(&mut self) -> Result<(), CompactionError> {
        self.peeked = match self.reader.as_mut() {
            Some(reader) => reader.next().transpose()?,
            None => None,
        };
        Ok(())
    }
}

impl CompactionInput for DiskRowSetCompactionInput {
    fn init(&mut self) -> Result<(), CompactionError> {
        self.buffer.mark_initialized()?;
        self.reader = Some(self.rowset.open_reader(self.block_size)?);
        self.read_next()
    }

    fn prepare_block(&mut self) -> Result<&[CompactionInputRow], CompactionError> {
        if !self.buffer.begin_block()? {
            return Ok(self.buffer.rows());
        }
        if let Some(batch) = self.peeked.take() {
            let rows = batch_to_rows(self.rowset.schema(), &batch).map_err(|err| {
                CompactionError::Corruption(format!(
                    "{}: undecodable batch at row {}: {}",
                    self.rowset, self.next_ordinal, err
                ))
            })?;
            let tracker = self.rowset.delta_tracker();
            for (row, inserted_at) in rows {
                let ordinal = self.next_ordinal;
                self.next_ordinal += 1;
                if !self.snap.is_committed(inserted_at) {
                    continue;
                }
                self.buffer.push(CompactionInputRow {
                    row,
                    inserted_at,
                    mutation_head: tracker.mutation_head(ordinal),
                });
            }
            self.read_next()?;
        }
        Ok(self.buffer.rows())
    }

    fn finish_block(&mut self) -> Result<(), CompactionError> {
        let has_more = self.peeked.is_some();
        self.buffer.end_block(has_more)
    }

    fn has_more_blocks(&self) -> bool {
        self.buffer.has_more(|| self.peeked.is_some())
    }

    fn schema(&self) -> &SchemaRef {
        self.rowset.schema()
    }
}

/// Walks a [`MemRowSet`] in key order, `block_size` entries at a time.
///
/// The skip list keeps accepting writes while the scan runs; the cursor is the
/// last key seen, so rows inserted ahead of it are picked up and filtered by
/// the snapshot like any other.
pub struct MemRowSetCompactionInput {
    rowset: Arc<MemRowSet>,
    snap: MvccSnapshot,
    block_size: usize,
    last_key: Option<RowKey>,
    buffer: BlockBuffer,
}

impl MemRowSetCompactionInput {
    pub fn new(rowset: Arc<MemRowSet>, snap: MvccSnapshot, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            rowset,
            snap,
            block_size,
            last_key: None,
            buffer: BlockBuffer::new(block_size),
        }
    }

    fn source_has_more(&self) -> bool {
        self.rowset
            .entries_after(self.last_key.as_ref())
            .next()
            .is_some()
    }
}

impl CompactionInput for MemRowSetCompactionInput {
    fn init(&mut self) -> Result<(), CompactionError> {
        self.buffer.mark_initialized()
    }

    fn prepare_block(&mut self) -> Result<&[CompactionInputRow], CompactionError> {
        if !self.buffer.begin_block()? {
            return Ok(self.buffer.rows());
        }
        let mut last = None;
        for entry in self
            .rowset
            .entries_after(self.last_key.as_ref())
            .take(self.block_size)
        {
            let mem_row = entry.value();
            if self.snap.is_committed(mem_row.inserted_at()) {
                self.buffer.push(CompactionInputRow {
                    row: mem_row.row().clone(),
                    inserted_at: mem_row.inserted_at(),
                    mutation_head: mem_row.mutations().head().cloned(),
                });
            }
            last = Some(entry.key().clone());
        }
        if last.is_some() {
            self.last_key = last;
        }
        Ok(self.buffer.rows())
    }

    fn finish_block(&mut self) -> Result<(), CompactionError> {
        let has_more = self.source_has_more();
        self.buffer.end_block(has_more)
    }

    fn has_more_blocks(&self) -> bool {
        self.buffer.has_more(|| self.source_has_more())
    }

    fn schema(&self) -> &SchemaRef {
        self.rowset.schema()
    }
}
