//! A single tablet: one active [`MemRowSet`] plus the on-disk row sets it was
//! flushed and compacted into.
//!
//! Flushes and compactions run in two phases. The bulk of the work drains the
//! inputs under a start snapshot while writers keep going. Then, with writers
//! paused on the commit clock, whatever they committed in between is replayed
//! into the output and the row sets are swapped.

use std::{fs, mem, sync::Arc};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::{
    compaction::{
        flush, materialize_rows, merge, reupdate_missed_deltas, CompactionError, FlushStats,
        RowSetsInCompaction,
    },
    id::RowSetIdGenerator,
    mutation::{ColumnUpdate, RowChange},
    mvcc::{CommitClock, MvccSnapshot, Timestamp},
    observability::{log_debug, log_error, log_info, log_warn},
    option::TabletOption,
    row::{Row, RowKey},
    rowset::{DiskRowSet, DiskRowSetWriter, MemRowSet, RowSet, RowSetRef},
    schema::{SchemaError, SchemaRef},
};

#[derive(Debug, Error)]
pub enum TabletError {
    #[error("row {0} already present")]
    AlreadyPresent(RowKey),
    #[error("row {0} not found")]
    NotFound(RowKey),
    #[error("tablet schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("tablet compaction error: {0}")]
    Compaction(#[from] CompactionError),
}

struct Components {
    memrowset: Arc<MemRowSet>,
    /// Memrowsets swapped out by a flush still in progress.
    flushing: Vec<Arc<MemRowSet>>,
    disk: Vec<Arc<DiskRowSet>>,
}

impl Components {
    fn all(&self) -> Vec<RowSetRef> {
        let mut all: Vec<RowSetRef> = Vec::with_capacity(1 + self.flushing.len() + self.disk.len());
        all.push(self.memrowset.clone() as RowSetRef);
        all.extend(self.flushing.iter().map(|mrs| mrs.clone() as RowSetRef));
        all.extend(self.disk.iter().map(|drs| drs.clone() as RowSetRef));
        all
    }
}

/// The row sets a flush or compaction replaces.
enum Retiring {
    MemRowSet(Arc<MemRowSet>),
    DiskRowSets(Vec<Arc<DiskRowSet>>),
}

pub struct Tablet {
    schema: SchemaRef,
    option: TabletOption,
    ids: RowSetIdGenerator,
    /// Serialises writes. Always taken before `components`.
    clock: Mutex<CommitClock>,
    components: RwLock<Components>,
}

impl Tablet {
    /// Create an empty tablet storing its row sets under `option`'s directory.
    pub fn open(schema: SchemaRef, option: TabletOption) -> Result<Self, TabletError> {
        fs::create_dir_all(option.dir()).map_err(CompactionError::from)?;
        let ids = RowSetIdGenerator::new();
        let memrowset = Arc::new(MemRowSet::new(ids.generate(), Arc::clone(&schema)));
        log_info!(
            component = "tablet",
            event = "tablet_opened",
            path = %option.dir().display(),
            columns = schema.num_columns(),
        );
        Ok(Self {
            schema,
            option,
            ids,
            clock: Mutex::new(CommitClock::default()),
            components: RwLock::new(Components {
                memrowset,
                flushing: Vec::new(),
                disk: Vec::new(),
            }),
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn option(&self) -> &TabletOption {
        &self.option
    }

    /// Snapshot including every write committed so far.
    pub fn snapshot(&self) -> MvccSnapshot {
        MvccSnapshot::new(self.clock.lock().peek())
    }

    pub fn memrowset(&self) -> Arc<MemRowSet> {
        Arc::clone(&self.components.read().memrowset)
    }

    pub fn disk_rowsets(&self) -> Vec<Arc<DiskRowSet>> {
        self.components.read().disk.clone()
    }

    pub fn insert(&self, row: Row) -> Result<Timestamp, TabletError> {
        self.schema.validate_row(&row)?;
        let key = self.schema.key_of(&row);
        let mut clock = self.clock.lock();
        let components = self.components.read();
        if components
            .all()
            .iter()
            .any(|rowset| rowset.check_row_present(&key))
        {
            return Err(TabletError::AlreadyPresent(key));
        }
        let ts = clock.peek();
        // a row deleted while still in the active memrowset keeps its key
        // reserved until that memrowset is flushed
        if !components.memrowset.insert(row, ts)? {
            return Err(TabletError::AlreadyPresent(key));
        }
        clock.advance();
        Ok(ts)
    }

    pub fn update(&self, key: RowKey, updates: Vec<ColumnUpdate>) -> Result<Timestamp, TabletError> {
        let change = RowChange::Update(updates);
        change.validate(&self.schema)?;
        self.mutate(key, change)
    }

    pub fn delete(&self, key: RowKey) -> Result<Timestamp, TabletError> {
        self.mutate(key, RowChange::Delete)
    }

    fn mutate(&self, key: RowKey, change: RowChange) -> Result<Timestamp, TabletError> {
        let mut clock = self.clock.lock();
        let components = self.components.read();
        let ts = clock.peek();
        for rowset in components.all() {
            if rowset.mutate_row(&key, ts, change.clone())? {
                clock.advance();
                return Ok(ts);
            }
        }
        Err(TabletError::NotFound(key))
    }

    /// Rows visible under `snap`, in key order.
    pub fn scan(&self, snap: &MvccSnapshot) -> Result<Vec<Row>, TabletError> {
        let rowsets = self.components.read().all();
        let inputs = rowsets
            .into_iter()
            .map(|rowset| rowset.new_compaction_input(snap, &self.option))
            .collect::<Result<Vec<_>, _>>()?;
        let mut input = merge(inputs, Arc::clone(&self.schema), self.option.block_size())?;
        input.init()?;
        Ok(materialize_rows(input.as_mut(), snap)?)
    }

    /// Write the active memrowset out as a new on-disk row set.
    pub fn flush(&self) -> Result<FlushStats, TabletError> {
        let (old, start) = {
            let clock = self.clock.lock();
            let mut components = self.components.write();
            if components.memrowset.is_empty() {
                return Ok(FlushStats::default());
            }
            let fresh = Arc::new(MemRowSet::new(self.ids.generate(), Arc::clone(&self.schema)));
            let old = mem::replace(&mut components.memrowset, fresh);
            components.flushing.push(Arc::clone(&old));
            (old, MvccSnapshot::new(clock.peek()))
        };

        let mut selection = RowSetsInCompaction::new();
        let result = selection
            .try_add(old.clone())
            .and_then(|()| self.run(&selection, &start, Retiring::MemRowSet(Arc::clone(&old))));
        if let Err(err) = &result {
            log_error!(
                component = "tablet",
                event = "flush_failed",
                rowset = %old.id(),
                error = %err,
            );
        }
        Ok(result?)
    }

    /// Merge every on-disk row set that is not already taking part in another
    /// compaction. Returns `None` when fewer than two could be selected.
    pub fn compact(&self) -> Result<Option<FlushStats>, TabletError> {
        let candidates = self.disk_rowsets();
        let mut selection = RowSetsInCompaction::new();
        let mut selected = Vec::with_capacity(candidates.len());
        for rowset in candidates {
            match selection.try_add(rowset.clone()) {
                Ok(()) => selected.push(rowset),
                Err(err) if err.is_lock_unavailable() => {
                    log_info!(
                        component = "tablet",
                        event = "compaction_candidate_skipped",
                        rowset = %rowset.id(),
                        reason = %err,
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        if selection.num_rowsets() < 2 {
            log_debug!(
                component = "tablet",
                event = "compaction_not_needed",
                selected = selection.num_rowsets(),
            );
            return Ok(None);
        }
        let start = self.snapshot();
        let stats = self
            .run(&selection, &start, Retiring::DiskRowSets(selected))
            .inspect_err(|err| {
                log_error!(
                    component = "tablet",
                    event = "compaction_failed",
                    error = %err,
                );
            })?;
        Ok(Some(stats))
    }

    fn run(
        &self,
        selection: &RowSetsInCompaction,
        start: &MvccSnapshot,
        retiring: Retiring,
    ) -> Result<FlushStats, CompactionError> {
        selection.dump_to_log();
        let output_id = self.ids.generate();
        let mut writer = DiskRowSetWriter::open(output_id, Arc::clone(&self.schema), &self.option)?;
        let stats = match selection
            .create_compaction_input(start, &self.schema, &self.option)
            .and_then(|mut input| {
                input.init()?;
                flush(input.as_mut(), start, &mut writer)
            }) {
            Ok(stats) => stats,
            Err(err) => {
                discard(writer);
                return Err(err);
            }
        };
        let output = if stats.rows_written == 0 {
            discard(writer);
            None
        } else {
            Some(Arc::new(writer.finish()?))
        };

        let clock = self.clock.lock();
        let include = MvccSnapshot::new(clock.peek());
        let replayed = match &output {
            Some(output) => selection
                .create_compaction_input(start, &self.schema, &self.option)
                .and_then(|mut input| {
                    input.init()?;
                    reupdate_missed_deltas(input.as_mut(), start, &include, output.delta_tracker())
                })
                .inspect_err(|_| output.mark_obsolete())?,
            None => 0,
        };

        let mut components = self.components.write();
        match &retiring {
            Retiring::MemRowSet(old) => components
                .flushing
                .retain(|mrs| !Arc::ptr_eq(mrs, old)),
            Retiring::DiskRowSets(old) => components
                .disk
                .retain(|drs| !old.iter().any(|o| Arc::ptr_eq(drs, o))),
        }
        if let Some(output) = output {
            let pos = components
                .disk
                .partition_point(|drs| drs.id() < output.id());
            components.disk.insert(pos, output);
        }
        drop(components);
        drop(clock);

        if let Retiring::DiskRowSets(old) = retiring {
            for rowset in old {
                rowset.mark_obsolete();
            }
        }
        log_info!(
            component = "tablet",
            event = "rowsets_swapped",
            output = %output_id,
            start = %start,
            include = %include,
            rows_written = stats.rows_written,
            rows_deleted = stats.rows_deleted,
            replayed = replayed,
        );
        Ok(stats)
    }
}

fn discard(writer: DiskRowSetWriter) {
    let id = writer.id();
    if let Err(err) = writer.abort() {
        log_warn!(
            component = "tablet",
            event = "output_discard_failed",
            rowset = %id,
            error = %err,
        );
    }
}
