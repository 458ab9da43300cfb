use std::{
    fmt,
    fs::{self, File},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use arrow::datatypes::SchemaRef as ArrowSchemaRef;
use parquet::arrow::{
    arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder},
    ArrowWriter, ProjectionMask,
};

use super::{CompactionLock, DeltaTracker, RowSet};
use crate::{
    compaction::{CompactionError, CompactionInput, DiskRowSetCompactionInput},
    id::RowSetId,
    mutation::RowChange,
    mvcc::{MvccSnapshot, Timestamp},
    observability::{log_debug, log_warn},
    option::TabletOption,
    row::{
        arrows::{batch_to_keys, rows_to_batch, storage_schema},
        Row, RowKey,
    },
    schema::SchemaRef,
};

/// Immutable, on-disk row set.
///
/// Base rows live in a parquet file sorted by primary key, each with the
/// commit timestamp of its insert. Later changes are kept in memory by the
/// row set's [`DeltaTracker`], addressed by row ordinal.
pub struct DiskRowSet {
    id: RowSetId,
    path: PathBuf,
    schema: SchemaRef,
    keys: Vec<RowKey>,
    file_size: u64,
    delta_tracker: DeltaTracker,
    compaction_lock: CompactionLock,
    obsolete: AtomicBool,
}

impl DiskRowSet {
    /// Open the row set stored at `path`, loading its key index.
    pub fn open(
        id: RowSetId,
        path: impl Into<PathBuf>,
        schema: SchemaRef,
    ) -> Result<Self, CompactionError> {
        let path = path.into();
        let file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        check_storage_schema(&schema, builder.schema(), &path)?;

        let mask = ProjectionMask::roots(builder.parquet_schema(), 0..schema.num_key_columns());
        let reader = builder.with_projection(mask).build()?;
        let mut keys = Vec::new();
        for batch in reader {
            let batch = batch?;
            let batch_keys = batch_to_keys(&schema, &batch).map_err(|err| {
                CompactionError::Corruption(format!(
                    "rowset {}: invalid key data: {}",
                    path.display(),
                    err
                ))
            })?;
            keys.extend(batch_keys);
        }
        if let Some(idx) = keys.windows(2).position(|pair| pair[0] > pair[1]) {
            return Err(CompactionError::Corruption(format!(
                "rowset {}: keys out of order at row {}",
                path.display(),
                idx + 1
            )));
        }
        let row_count = u32::try_from(keys.len()).map_err(|_| {
            CompactionError::Corruption(format!(
                "rowset {}: {} rows exceed the addressable range",
                path.display(),
                keys.len()
            ))
        })?;

        log_debug!(
            component = "rowset",
            event = "disk_rowset_opened",
            rowset = %id,
            rows = row_count,
            bytes = file_size,
        );
        Ok(Self {
            id,
            path,
            schema,
            keys,
            file_size,
            delta_tracker: DeltaTracker::new(id, row_count),
            compaction_lock: CompactionLock::new(),
            obsolete: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn delta_tracker(&self) -> &DeltaTracker {
        &self.delta_tracker
    }

    /// Ordinal of the row with `key`, if stored here.
    pub fn find_row(&self, key: &RowKey) -> Option<u32> {
        self.keys
            .binary_search(key)
            .ok()
            .and_then(|idx| u32::try_from(idx).ok())
    }

    /// Stream the base data in blocks of `batch_size` rows.
    pub(crate) fn open_reader(
        &self,
        batch_size: usize,
    ) -> Result<ParquetRecordBatchReader, CompactionError> {
        let file = File::open(&self.path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        Ok(builder.with_batch_size(batch_size).build()?)
    }

    /// Remove the backing file once the last handle to this row set drops.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }
}

impl Drop for DiskRowSet {
    fn drop(&mut self) {
        if !self.obsolete.load(Ordering::Acquire) {
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            log_warn!(
                component = "rowset",
                event = "obsolete_rowset_remove_failed",
                rowset = %self.id,
                path = %self.path.display(),
                error = %err,
            );
        }
    }
}

fn check_storage_schema(
    schema: &SchemaRef,
    file_schema: &ArrowSchemaRef,
    path: &Path,
) -> Result<(), CompactionError> {
    let expected = storage_schema(schema);
    let matches = expected.fields().len() == file_schema.fields().len()
        && expected
            .fields()
            .iter()
            .zip(file_schema.fields().iter())
            .all(|(a, b)| {
                a.name() == b.name()
                    && a.data_type() == b.data_type()
                    && a.is_nullable() == b.is_nullable()
            });
    if matches {
        Ok(())
    } else {
        Err(CompactionError::SchemaMismatch(format!(
            "rowset {} does not match the tablet schema",
            path.display()
        )))
    }
}

impl RowSet for DiskRowSet {
    fn id(&self) -> RowSetId {
        self.id
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn new_compaction_input(
        self: Arc<Self>,
        snap: &MvccSnapshot,
        option: &TabletOption,
    ) -> Result<Box<dyn CompactionInput>, CompactionError> {
        Ok(Box::new(DiskRowSetCompactionInput::new(
            self,
            snap.clone(),
            option.block_size(),
        )))
    }

    fn mutate_row(
        &self,
        key: &RowKey,
        ts: Timestamp,
        change: RowChange,
    ) -> Result<bool, CompactionError> {
        let Some(row_idx) = self.find_row(key) else {
            return Ok(false);
        };
        if self.delta_tracker.is_deleted(row_idx) {
            return Ok(false);
        }
        change
            .validate(&self.schema)
            .map_err(|err| CompactionError::corruption("invalid mutation", err))?;
        self.delta_tracker.update(row_idx, ts, change)?;
        Ok(true)
    }

    fn check_row_present(&self, key: &RowKey) -> bool {
        self.find_row(key)
            .map(|row_idx| !self.delta_tracker.is_deleted(row_idx))
            .unwrap_or(false)
    }

    fn count_rows(&self) -> u64 {
        self.keys.len() as u64
    }

    fn estimate_on_disk_size(&self) -> u64 {
        self.file_size
    }

    fn compaction_lock(&self) -> &CompactionLock {
        &self.compaction_lock
    }
}

impl fmt::Display for DiskRowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiskRowSet({})", self.id)
    }
}

/// Streams rows, in key order, into a new [`DiskRowSet`].
pub struct DiskRowSetWriter {
    id: RowSetId,
    path: PathBuf,
    schema: SchemaRef,
    storage_schema: ArrowSchemaRef,
    writer: ArrowWriter<File>,
    buffer: Vec<(Row, Timestamp)>,
    batch_size: usize,
    written: u64,
    last_key: Option<RowKey>,
}

impl DiskRowSetWriter {
    /// Create the file for row set `id` under the tablet directory.
    pub fn open(
        id: RowSetId,
        schema: SchemaRef,
        option: &TabletOption,
    ) -> Result<Self, CompactionError> {
        fs::create_dir_all(option.dir())?;
        let path = option.rowset_path(&id);
        let file = File::create(&path)?;
        let storage_schema = storage_schema(&schema);
        let writer = ArrowWriter::try_new(
            file,
            Arc::clone(&storage_schema),
            option.write_parquet_option.clone(),
        )?;
        Ok(Self {
            id,
            path,
            schema,
            storage_schema,
            writer,
            buffer: Vec::with_capacity(option.write_batch_size),
            batch_size: option.write_batch_size,
            written: 0,
            last_key: None,
        })
    }

    pub fn id(&self) -> RowSetId {
        self.id
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Rows appended so far.
    pub fn written_count(&self) -> u64 {
        self.written
    }

    /// Append `row`, inserted at `inserted_at`. Rows must arrive in
    /// non-decreasing key order.
    pub fn append_row(&mut self, row: &Row, inserted_at: Timestamp) -> Result<(), CompactionError> {
        self.schema
            .validate_row(row)
            .map_err(|err| CompactionError::corruption("row does not match rowset schema", err))?;
        let key = self.schema.key_of(row);
        if let Some(last) = &self.last_key {
            if &key < last {
                return Err(CompactionError::Corruption(format!(
                    "rows out of key order: {} after {}",
                    key, last
                )));
            }
        }
        self.last_key = Some(key);
        self.buffer.push((row.clone(), inserted_at));
        self.written += 1;
        if self.buffer.len() >= self.batch_size {
            self.flush_buffer()?;
        }
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<(), CompactionError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = rows_to_batch(&self.schema, &self.storage_schema, &self.buffer)?;
        self.writer.write(&batch)?;
        self.buffer.clear();
        Ok(())
    }

    /// Close the file and open it as a [`DiskRowSet`].
    pub fn finish(mut self) -> Result<DiskRowSet, CompactionError> {
        self.flush_buffer()?;
        let DiskRowSetWriter {
            id,
            path,
            schema,
            writer,
            written,
            ..
        } = self;
        writer.close()?;
        log_debug!(
            component = "rowset",
            event = "disk_rowset_written",
            rowset = %id,
            rows = written,
        );
        DiskRowSet::open(id, path, schema)
    }

    /// Discard the partially written file.
    pub fn abort(self) -> Result<(), CompactionError> {
        let DiskRowSetWriter { path, writer, .. } = self;
        drop(writer);
        fs::remove_file(&path)?;
        Ok(())
    }
}
