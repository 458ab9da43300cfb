mod common;

use std::{fs, sync::Arc};

use arrow::datatypes::{DataType, Field};
use common::{drain_ids, int_at, key, row, schema, write_rowset};
use tablet::{
    compaction::{
        debug_dump_compaction_input, flush, materialize_rows, reupdate_missed_deltas, FlushStats,
        MergeCompactionInput, RowSetsInCompaction,
    },
    id::RowSetId,
    rowset::{DiskRowSet, DiskRowSetWriter, MemRowSet, RowSet, RowSetRef},
    ColumnUpdate, CompactionError, CompactionInput, MvccSnapshot, RowChange, Schema, TabletOption, Timestamp, Value,
};
use tempfile::TempDir;

fn set_score(score: i64) -> RowChange {
    RowChange::Update(vec![ColumnUpdate::new(2, score)])
}

fn at(ts: u64) -> MvccSnapshot {
    MvccSnapshot::new(Timestamp::new(ts))
}

#[test]
fn merge_of_disk_and_memory_inputs_is_globally_ordered() {
    let dir = TempDir::new().unwrap();
    let option = TabletOption::from(dir.path()).compaction_block_size(3);

    let mut selection = RowSetsInCompaction::new();
    for offset in 0..3_i64 {
        let rows = (0..5)
            .map(|i| (row(i * 4 + offset, "disk", 0), 1))
            .collect::<Vec<_>>();
        selection.try_add(write_rowset(&option, &rows)).unwrap();
    }
    let mrs = Arc::new(MemRowSet::new(RowSetId::new(), schema()));
    for i in 0..5_i64 {
        mrs.insert(row(i * 4 + 3, "mem", 0), Timestamp::new(2))
            .unwrap();
    }
    selection.try_add(mrs).unwrap();

    let mut input = selection
        .create_compaction_input(&MvccSnapshot::including_all(), &schema(), &option)
        .unwrap();
    input.init().unwrap();
    assert_eq!(drain_ids(input.as_mut()), (0..20).collect::<Vec<_>>());
}

#[test]
fn duplicate_keys_keep_input_order() {
    let dir = TempDir::new().unwrap();
    let option = TabletOption::from(dir.path());
    let first = write_rowset(&option, &[(row(1, "first", 0), 1), (row(2, "first", 0), 1)]);
    let second = write_rowset(&option, &[(row(1, "second", 0), 1)]);

    let snap = MvccSnapshot::including_all();
    let inputs = vec![
        first.new_compaction_input(&snap, &option).unwrap(),
        second.new_compaction_input(&snap, &option).unwrap(),
    ];
    let mut merged = MergeCompactionInput::new(inputs, schema(), 1).unwrap();
    merged.init().unwrap();
    let names = materialize_rows(&mut merged, &snap)
        .unwrap()
        .iter()
        .map(|r| r.get(1).cloned().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            Value::from("first"),
            Value::from("second"),
            Value::from("first")
        ]
    );
}

/// Rows 0..5 inserted at 1; row 1 updated at 10, row 2 deleted at 20,
/// row 3 updated at 30 and deleted at 40.
fn mutated_rowset(option: &TabletOption) -> Arc<DiskRowSet> {
    let rowset = write_rowset(
        option,
        &(0..5).map(|i| (row(i, "r", i), 1)).collect::<Vec<_>>(),
    );
    let mutations = [
        (1, 10, set_score(100)),
        (2, 20, RowChange::Delete),
        (3, 30, set_score(300)),
        (3, 40, RowChange::Delete),
    ];
    for (id, ts, change) in mutations {
        assert!(rowset
            .mutate_row(&key(id), Timestamp::new(ts), change)
            .unwrap());
    }
    rowset
}

fn flush_at(
    source: &Arc<DiskRowSet>,
    snap: &MvccSnapshot,
    option: &TabletOption,
) -> (FlushStats, Vec<(i64, i64)>) {
    let mut input = Arc::clone(source)
        .new_compaction_input(snap, option)
        .unwrap();
    input.init().unwrap();
    let mut writer = DiskRowSetWriter::open(RowSetId::new(), schema(), option).unwrap();
    let stats = flush(input.as_mut(), snap, &mut writer).unwrap();
    let output = Arc::new(writer.finish().unwrap());

    let mut check = output
        .new_compaction_input(&MvccSnapshot::including_all(), option)
        .unwrap();
    check.init().unwrap();
    let rows = materialize_rows(check.as_mut(), &MvccSnapshot::including_all())
        .unwrap()
        .iter()
        .map(|r| (int_at(r, 0), int_at(r, 2)))
        .collect();
    (stats, rows)
}

#[test]
fn flush_applies_exactly_the_mutations_visible_at_its_snapshot() {
    let dir = TempDir::new().unwrap();
    let option = TabletOption::from(dir.path());
    let source = mutated_rowset(&option);

    let (stats, rows) = flush_at(&source, &at(5), &option);
    assert_eq!(stats.rows_written, 5);
    assert_eq!(rows, vec![(0, 0), (1, 1), (2, 2), (3, 3), (4, 4)]);

    let (stats, rows) = flush_at(&source, &at(35), &option);
    assert_eq!(
        stats,
        FlushStats {
            rows_written: 4,
            rows_deleted: 1
        }
    );
    assert_eq!(rows, vec![(0, 0), (1, 100), (3, 300), (4, 4)]);

    let (stats, rows) = flush_at(&source, &MvccSnapshot::including_all(), &option);
    assert_eq!(stats.rows_deleted, 2);
    assert_eq!(rows, vec![(0, 0), (1, 100), (4, 4)]);

    // rows inserted after the snapshot are not flushed at all
    let (stats, rows) = flush_at(&source, &MvccSnapshot::including_none(), &option);
    assert_eq!(stats, FlushStats::default());
    assert!(rows.is_empty());
}

#[test]
fn flush_honours_out_of_order_commits() {
    let dir = TempDir::new().unwrap();
    let option = TabletOption::from(dir.path());
    let source = mutated_rowset(&option);

    // 30 committed, 10 and 20 still in flight
    let snap = at(5).with_committed([Timestamp::new(30)]);
    let (_, rows) = flush_at(&source, &snap, &option);
    assert_eq!(rows, vec![(0, 0), (1, 1), (2, 2), (3, 300), (4, 4)]);
}

#[test]
fn reupdate_after_flush_matches_an_uncompacted_read() {
    let seed = fastrand::u64(..);
    fastrand::seed(seed);
    let dir = TempDir::new().unwrap();
    let option = TabletOption::from(dir.path()).compaction_block_size(7);
    let mrs = Arc::new(MemRowSet::new(RowSetId::new(), schema()));
    for id in 0..64 {
        mrs.insert(row(id, "m", 0), Timestamp::new(1)).unwrap();
    }
    // per-row chains with increasing timestamps in 2..200
    for id in 0..64 {
        let mut ts = 1;
        for _ in 0..fastrand::usize(0..6) {
            ts += fastrand::u64(1..40);
            let change = if fastrand::u8(0..8) == 0 {
                RowChange::Delete
            } else {
                set_score(ts as i64)
            };
            mrs.mutate_row(&key(id), Timestamp::new(ts), change).unwrap();
        }
    }

    let exclude = at(fastrand::u64(2..100));
    let include = at(fastrand::u64(100..300));
    assert!(include.includes_all_of(&exclude));

    let mut input = Arc::clone(&mrs).new_compaction_input(&exclude, &option).unwrap();
    input.init().unwrap();
    let mut writer = DiskRowSetWriter::open(RowSetId::new(), schema(), &option).unwrap();
    let stats = flush(input.as_mut(), &exclude, &mut writer).unwrap();
    assert_eq!(stats.rows_written + stats.rows_deleted, 64, "seed {seed}");
    let output = Arc::new(writer.finish().unwrap());

    let mut input = Arc::clone(&mrs).new_compaction_input(&exclude, &option).unwrap();
    input.init().unwrap();
    let replayed =
        reupdate_missed_deltas(input.as_mut(), &exclude, &include, output.delta_tracker()).unwrap();

    let mut expected_replays = 0;
    for id in 0..64 {
        let mem_row = mrs.get(&key(id)).unwrap();
        let deleted_before = mem_row
            .mutations()
            .iter()
            .any(|m| m.change().is_delete() && exclude.is_committed(m.ts()));
        if !deleted_before {
            expected_replays += mem_row
                .mutations()
                .iter()
                .filter(|m| !exclude.is_committed(m.ts()) && include.is_committed(m.ts()))
                .count();
        }
    }
    assert_eq!(replayed, expected_replays, "seed {seed}");

    let read = |rowset: RowSetRef| {
        let mut input = rowset.new_compaction_input(&include, &option).unwrap();
        input.init().unwrap();
        materialize_rows(input.as_mut(), &include).unwrap()
    };
    assert_eq!(
        read(output as RowSetRef),
        read(mrs as RowSetRef),
        "seed {seed}"
    );
}

#[test]
fn reupdate_replays_in_commit_order() {
    let dir = TempDir::new().unwrap();
    let option = TabletOption::from(dir.path());
    let source = mutated_rowset(&option);
    let exclude = at(15);
    let include = MvccSnapshot::including_all();

    let mut input = Arc::clone(&source).new_compaction_input(&exclude, &option).unwrap();
    input.init().unwrap();
    let mut writer = DiskRowSetWriter::open(RowSetId::new(), schema(), &option).unwrap();
    flush(input.as_mut(), &exclude, &mut writer).unwrap();
    let output = writer.finish().unwrap();

    let mut input = Arc::clone(&source).new_compaction_input(&exclude, &option).unwrap();
    input.init().unwrap();
    let replayed =
        reupdate_missed_deltas(input.as_mut(), &exclude, &include, output.delta_tracker()).unwrap();
    assert_eq!(replayed, 3);

    let tracker = output.delta_tracker();
    assert_eq!(tracker.num_updated_rows(), 2);
    let chain = tracker
        .mutation_head(3)
        .unwrap()
        .iter()
        .map(|m| m.ts().get())
        .collect::<Vec<_>>();
    assert_eq!(chain, vec![30, 40]);
}

#[test]
fn spent_inputs_yield_nothing() {
    let dir = TempDir::new().unwrap();
    let option = TabletOption::from(dir.path()).compaction_block_size(2);
    let source = mutated_rowset(&option);
    let snap = MvccSnapshot::including_all();

    let mut input = Arc::clone(&source).new_compaction_input(&snap, &option).unwrap();
    input.init().unwrap();
    assert_eq!(drain_ids(input.as_mut()), vec![0, 1, 2, 3, 4]);
    assert!(!input.has_more_blocks());
    assert!(input.prepare_block().unwrap().is_empty());
    input.finish_block().unwrap();

    let mut writer = DiskRowSetWriter::open(RowSetId::new(), schema(), &option).unwrap();
    assert_eq!(
        flush(input.as_mut(), &snap, &mut writer).unwrap(),
        FlushStats::default()
    );
    writer.abort().unwrap();
    assert!(matches!(
        input.init(),
        Err(CompactionError::OutOfOrder(_))
    ));
}

#[test]
fn merge_over_mismatched_schemas_fails_at_construction() {
    let dir = TempDir::new().unwrap();
    let option = TabletOption::from(dir.path());
    let other_schema = Arc::new(
        Schema::try_new(
            vec![
                Field::new("id", DataType::Int64, false),
                Field::new("name", DataType::Utf8, true),
            ],
            1,
        )
        .unwrap(),
    );
    let mut selection = RowSetsInCompaction::new();
    selection
        .try_add(write_rowset(&option, &[(row(1, "a", 1), 1)]))
        .unwrap();
    selection
        .try_add(Arc::new(MemRowSet::new(RowSetId::new(), other_schema)))
        .unwrap();
    let err = selection
        .create_compaction_input(&MvccSnapshot::including_all(), &schema(), &option)
        .err()
        .unwrap();
    assert!(matches!(err, CompactionError::SchemaMismatch(_)));
}

#[test]
fn unreadable_rowset_surfaces_as_io_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.parquet");
    fs::write(&path, b"definitely not parquet").unwrap();
    let err = DiskRowSet::open(RowSetId::new(), &path, schema())
        .err()
        .unwrap();
    assert!(err.is_io());
}

#[test]
fn debug_dump_lists_rows_with_unfiltered_chains() {
    let dir = TempDir::new().unwrap();
    let option = TabletOption::from(dir.path());
    let source = mutated_rowset(&option);
    let mut input = Arc::clone(&source)
        .new_compaction_input(&MvccSnapshot::including_all(), &option)
        .unwrap();
    input.init().unwrap();
    let mut lines = Vec::new();
    debug_dump_compaction_input(input.as_mut(), Some(&mut lines)).unwrap();

    assert_eq!(lines.len(), 5);
    assert_eq!(
        lines[3],
        "(int64 id=3, string name=\"r\", int64 score=3) inserted@1 \
         mutations=[@30(SET score=300), @40(DELETE)]"
    );
    assert!(lines[0].ends_with("mutations=[]"));
}
