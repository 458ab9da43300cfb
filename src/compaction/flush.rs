//! Terminal consumers of a [`CompactionInput`].
//!
//! Each function here drains its input to exhaustion and aborts on the first
//! error; the input is spent afterwards whether or not the call succeeded.

use std::sync::Arc;

use super::{CompactionError, CompactionInput, CompactionInputRow};
use crate::{
    mutation::{Mutation, MutationIter},
    mvcc::MvccSnapshot,
    observability::{log_debug, log_info},
    row::Row,
    rowset::{DeltaTracker, DiskRowSetWriter},
    schema::Schema,
};

/// Outcome of a [`flush`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub rows_written: u64,
    /// Rows dropped because a delete was visible under the flush snapshot.
    pub rows_deleted: u64,
}

fn drain<F>(input: &mut dyn CompactionInput, mut f: F) -> Result<(), CompactionError>
where
    F: FnMut(&CompactionInputRow) -> Result<(), CompactionError>,
{
    while input.has_more_blocks() {
        for row in input.prepare_block()? {
            f(row)?;
        }
        input.finish_block()?;
    }
    Ok(())
}

/// Apply the mutations of `head` committed under `snap` to a copy of `row`.
///
/// Returns `None` if a visible delete removes the row.
pub fn apply_mutations(
    schema: &Schema,
    row: &Row,
    head: Option<&Arc<Mutation>>,
    snap: &MvccSnapshot,
) -> Result<Option<Row>, CompactionError> {
    let mut out = row.clone();
    for mutation in MutationIter::from_head(head) {
        if !snap.is_committed(mutation.ts()) {
            continue;
        }
        mutation.change().validate(schema).map_err(|err| {
            CompactionError::corruption(
                format_args!(
                    "mutation @{} on row {}",
                    mutation.ts(),
                    schema.debug_row(row)
                ),
                err,
            )
        })?;
        if !mutation.change().apply_to(&mut out) {
            return Ok(None);
        }
    }
    Ok(Some(out))
}

/// Write every row of `input` visible under `snap`, with its visible
/// mutations applied, to `writer`.
pub fn flush(
    input: &mut dyn CompactionInput,
    snap: &MvccSnapshot,
    writer: &mut DiskRowSetWriter,
) -> Result<FlushStats, CompactionError> {
    let schema = Arc::clone(input.schema());
    if !schema.structurally_eq(writer.schema()) {
        return Err(CompactionError::SchemaMismatch(format!(
            "flush input does not match output rowset {}",
            writer.id()
        )));
    }
    let mut stats = FlushStats::default();
    drain(input, |input_row| {
        if !snap.is_committed(input_row.inserted_at) {
            return Ok(());
        }
        match apply_mutations(
            &schema,
            &input_row.row,
            input_row.mutation_head.as_ref(),
            snap,
        )? {
            Some(row) => {
                writer.append_row(&row, input_row.inserted_at)?;
                stats.rows_written += 1;
            }
            None => stats.rows_deleted += 1,
        }
        Ok(())
    })?;
    log_debug!(
        component = "compaction",
        event = "flush_drained",
        rowset = %writer.id(),
        snapshot = %snap,
        rows_written = stats.rows_written,
        rows_deleted = stats.rows_deleted,
    );
    Ok(stats)
}

/// Replay into `tracker` every mutation committed under `include` but not
/// under `exclude`, addressed by the ordinal the row received when `input`
/// was flushed under `exclude`.
///
/// Returns the number of replayed mutations.
pub fn reupdate_missed_deltas(
    input: &mut dyn CompactionInput,
    exclude: &MvccSnapshot,
    include: &MvccSnapshot,
    tracker: &DeltaTracker,
) -> Result<usize, CompactionError> {
    debug_assert!(
        include.includes_all_of(exclude),
        "{} does not include {}",
        include,
        exclude
    );
    let mut row_idx: u32 = 0;
    let mut replayed = 0;
    drain(input, |input_row| {
        if !exclude.is_committed(input_row.inserted_at) {
            return Ok(());
        }
        // rows deleted as of the flush were never written and own no ordinal
        let flushed_as_deleted = input_row
            .mutations()
            .any(|m| m.change().is_delete() && exclude.is_committed(m.ts()));
        if flushed_as_deleted {
            return Ok(());
        }
        for mutation in input_row.mutations() {
            if exclude.is_committed(mutation.ts()) || !include.is_committed(mutation.ts()) {
                continue;
            }
            tracker.apply(row_idx, mutation)?;
            replayed += 1;
        }
        row_idx += 1;
        Ok(())
    })?;
    if replayed > 0 {
        log_info!(
            component = "compaction",
            event = "missed_deltas_reupdated",
            exclude = %exclude,
            include = %include,
            mutations = replayed,
        );
    }
    Ok(replayed)
}

/// Drain `input` into its rows as seen under `snap`, in input order.
pub fn materialize_rows(
    input: &mut dyn CompactionInput,
    snap: &MvccSnapshot,
) -> Result<Vec<Row>, CompactionError> {
    let schema = Arc::clone(input.schema());
    let mut rows = Vec::new();
    drain(input, |input_row| {
        if !snap.is_committed(input_row.inserted_at) {
            return Ok(());
        }
        if let Some(row) = apply_mutations(
            &schema,
            &input_row.row,
            input_row.mutation_head.as_ref(),
            snap,
        )? {
            rows.push(row);
        }
        Ok(())
    })?;
    Ok(rows)
}

/// Render every row of `input` with its full mutation chain.
///
/// Lines go to `lines` when given, otherwise to the log.
pub fn debug_dump_compaction_input(
    input: &mut dyn CompactionInput,
    mut lines: Option<&mut Vec<String>>,
) -> Result<(), CompactionError> {
    let schema = Arc::clone(input.schema());
    drain(input, |input_row| {
        let mutations = input_row
            .mutations()
            .map(|m| format!("@{}({})", m.ts(), m.change().to_string_with(&schema)))
            .collect::<Vec<_>>();
        let line = format!(
            "{} inserted@{} mutations=[{}]",
            schema.debug_row(&input_row.row),
            input_row.inserted_at,
            mutations.join(", ")
        );
        match lines.as_deref_mut() {
            Some(lines) => lines.push(line),
            None => log_info!(component = "compaction", event = "dump_row", row = %line),
        }
        Ok(())
    })
}
