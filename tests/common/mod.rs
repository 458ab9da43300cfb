//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use arrow::datatypes::{DataType, Field};
use tablet::{
    id::RowSetId,
    rowset::{DiskRowSet, DiskRowSetWriter},
    CompactionInput, Row, RowKey, Schema, SchemaRef, TabletOption, Timestamp, Value,
};

/// `(id int64 key, name utf8 null, score int64 null)`
pub fn schema() -> SchemaRef {
    Arc::new(
        Schema::try_new(
            vec![
                Field::new("id", DataType::Int64, false),
                Field::new("name", DataType::Utf8, true),
                Field::new("score", DataType::Int64, true),
            ],
            1,
        )
        .expect("test schema should be valid"),
    )
}

pub fn row(id: i64, name: &str, score: i64) -> Row {
    Row::new(vec![
        Value::Int64(id),
        Value::from(name),
        Value::Int64(score),
    ])
}

pub fn key(id: i64) -> RowKey {
    RowKey::from(Value::Int64(id))
}

pub fn int_at(row: &Row, column: usize) -> i64 {
    match row.get(column) {
        Some(Value::Int64(v)) => *v,
        other => panic!("column {column} is not an int64: {other:?}"),
    }
}

/// Write `rows`, each with its insertion timestamp, into a new disk row set.
pub fn write_rowset(option: &TabletOption, rows: &[(Row, u64)]) -> Arc<DiskRowSet> {
    let mut writer =
        DiskRowSetWriter::open(RowSetId::new(), schema(), option).expect("open writer");
    for (row, ts) in rows {
        writer
            .append_row(row, Timestamp::new(*ts))
            .expect("append row");
    }
    Arc::new(writer.finish().expect("finish rowset"))
}

/// Drain `input` and return the key of every yielded row.
pub fn drain_ids(input: &mut dyn CompactionInput) -> Vec<i64> {
    let mut ids = Vec::new();
    while input.has_more_blocks() {
        let block = input.prepare_block().expect("prepare block");
        ids.extend(block.iter().map(|r| int_at(&r.row, 0)));
        input.finish_block().expect("finish block");
    }
    ids
}
