//! Conversions between [`Row`]s and arrow `RecordBatch`es.
//!
//! On-disk row sets store the user columns followed by a `_commit_ts` column
//! holding the insertion timestamp of each row.

use std::sync::Arc;

use arrow::{
    array::{
        Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Float64Array, Int32Array,
        Int64Array, StringArray, UInt32Array, UInt64Array,
    },
    datatypes::{
        DataType, Field, Float64Type, Int32Type, Int64Type, Schema as ArrowSchema,
        SchemaRef as ArrowSchemaRef, UInt32Type, UInt64Type,
    },
    error::ArrowError,
    record_batch::RecordBatch,
};

use crate::{
    mvcc::Timestamp,
    row::{Row, RowKey, Value},
    schema::Schema,
};

/// Name of the insertion timestamp column appended to persisted batches.
pub(crate) const COMMIT_TS_COL: &str = "_commit_ts";

/// Arrow schema of persisted batches: user columns plus [`COMMIT_TS_COL`].
pub(crate) fn storage_schema(schema: &Schema) -> ArrowSchemaRef {
    let fields = schema
        .arrow_schema()
        .fields()
        .iter()
        .map(|field| field.as_ref().clone())
        .chain(std::iter::once(Field::new(
            COMMIT_TS_COL,
            DataType::UInt64,
            false,
        )))
        .collect::<Vec<_>>();
    Arc::new(ArrowSchema::new(fields))
}

/// Encode `rows` (with their insertion timestamps) as one record batch.
pub(crate) fn rows_to_batch(
    schema: &Schema,
    storage_schema: &ArrowSchemaRef,
    rows: &[(Row, Timestamp)],
) -> Result<RecordBatch, ArrowError> {
    let mut columns = Vec::with_capacity(schema.num_columns() + 1);
    for (idx, field) in schema.arrow_schema().fields().iter().enumerate() {
        let cells = rows.iter().map(|(row, _)| row.get(idx));
        columns.push(build_column(field.name(), field.data_type(), cells)?);
    }
    let commit_ts = UInt64Array::from_iter_values(rows.iter().map(|(_, ts)| ts.get()));
    columns.push(Arc::new(commit_ts) as ArrayRef);
    RecordBatch::try_new(Arc::clone(storage_schema), columns)
}

fn build_column<'a>(
    name: &str,
    data_type: &DataType,
    cells: impl Iterator<Item = Option<&'a Value>>,
) -> Result<ArrayRef, ArrowError> {
    macro_rules! collect_cells {
        ($variant:ident, $array:ty, $conv:expr) => {{
            let values = cells
                .map(|cell| match cell {
                    Some(Value::$variant(v)) => Ok(Some($conv(v))),
                    Some(Value::Null) | None => Ok(None),
                    Some(other) => Err(ArrowError::InvalidArgumentError(format!(
                        "column {} expects {}, got {}",
                        name, data_type, other
                    ))),
                })
                .collect::<Result<Vec<_>, ArrowError>>()?;
            Arc::new(<$array>::from(values)) as ArrayRef
        }};
    }

    Ok(match data_type {
        DataType::Boolean => collect_cells!(Boolean, BooleanArray, |v: &bool| *v),
        DataType::Int32 => collect_cells!(Int32, Int32Array, |v: &i32| *v),
        DataType::Int64 => collect_cells!(Int64, Int64Array, |v: &i64| *v),
        DataType::UInt32 => collect_cells!(UInt32, UInt32Array, |v: &u32| *v),
        DataType::UInt64 => collect_cells!(UInt64, UInt64Array, |v: &u64| *v),
        DataType::Float64 => collect_cells!(Float64, Float64Array, |v: &f64| *v),
        DataType::Utf8 => collect_cells!(String, StringArray, |v: &'a String| v.as_str()),
        DataType::Binary => collect_cells!(Binary, BinaryArray, |v: &'a Vec<u8>| v.as_slice()),
        other => {
            return Err(ArrowError::NotYetImplemented(format!(
                "column {} has unsupported type {}",
                name, other
            )))
        }
    })
}

/// Decode a persisted batch back into rows and their insertion timestamps.
pub(crate) fn batch_to_rows(
    schema: &Schema,
    batch: &RecordBatch,
) -> Result<Vec<(Row, Timestamp)>, ArrowError> {
    let num_columns = schema.num_columns();
    if batch.num_columns() != num_columns + 1 {
        return Err(ArrowError::SchemaError(format!(
            "expected {} columns, batch has {}",
            num_columns + 1,
            batch.num_columns()
        )));
    }
    let commit_ts = batch
        .column(num_columns)
        .as_primitive_opt::<UInt64Type>()
        .ok_or_else(|| {
            ArrowError::SchemaError(format!("{} column is not uint64", COMMIT_TS_COL))
        })?;

    let mut rows = (0..batch.num_rows())
        .map(|_| Vec::with_capacity(num_columns))
        .collect::<Vec<Vec<Value>>>();
    for (idx, field) in schema.arrow_schema().fields().iter().enumerate() {
        let column = batch.column(idx);
        for (row_idx, values) in rows.iter_mut().enumerate() {
            values.push(read_cell(field.name(), column, row_idx)?);
        }
    }
    Ok(rows
        .into_iter()
        .zip(commit_ts.values().iter())
        .map(|(values, ts)| (Row::new(values), Timestamp::new(*ts)))
        .collect())
}

/// Decode the key columns of a batch projected to the leading key columns.
pub(crate) fn batch_to_keys(
    schema: &Schema,
    batch: &RecordBatch,
) -> Result<Vec<RowKey>, ArrowError> {
    let num_key_columns = schema.num_key_columns();
    if batch.num_columns() != num_key_columns {
        return Err(ArrowError::SchemaError(format!(
            "expected {} key columns, batch has {}",
            num_key_columns,
            batch.num_columns()
        )));
    }
    let mut keys = (0..batch.num_rows())
        .map(|_| Vec::with_capacity(num_key_columns))
        .collect::<Vec<Vec<Value>>>();
    for (idx, field) in schema
        .arrow_schema()
        .fields()
        .iter()
        .take(num_key_columns)
        .enumerate()
    {
        let column = batch.column(idx);
        for (row_idx, values) in keys.iter_mut().enumerate() {
            values.push(read_cell(field.name(), column, row_idx)?);
        }
    }
    Ok(keys.into_iter().map(RowKey::new).collect())
}

fn read_cell(name: &str, column: &ArrayRef, idx: usize) -> Result<Value, ArrowError> {
    if column.is_null(idx) {
        return Ok(Value::Null);
    }
    let mismatch = || {
        ArrowError::SchemaError(format!(
            "column {} has unexpected type {}",
            name,
            column.data_type()
        ))
    };
    Ok(match column.data_type() {
        DataType::Boolean => {
            Value::Boolean(column.as_boolean_opt().ok_or_else(mismatch)?.value(idx))
        }
        DataType::Int32 => Value::Int32(
            column
                .as_primitive_opt::<Int32Type>()
                .ok_or_else(mismatch)?
                .value(idx),
        ),
        DataType::Int64 => Value::Int64(
            column
                .as_primitive_opt::<Int64Type>()
                .ok_or_else(mismatch)?
                .value(idx),
        ),
        DataType::UInt32 => Value::UInt32(
            column
                .as_primitive_opt::<UInt32Type>()
                .ok_or_else(mismatch)?
                .value(idx),
        ),
        DataType::UInt64 => Value::UInt64(
            column
                .as_primitive_opt::<UInt64Type>()
                .ok_or_else(mismatch)?
                .value(idx),
        ),
        DataType::Float64 => Value::Float64(
            column
                .as_primitive_opt::<Float64Type>()
                .ok_or_else(mismatch)?
                .value(idx),
        ),
        DataType::Utf8 => Value::String(
            column
                .as_string_opt::<i32>()
                .ok_or_else(mismatch)?
                .value(idx)
                .to_string(),
        ),
        DataType::Binary => Value::Binary(
            column
                .as_binary_opt::<i32>()
                .ok_or_else(mismatch)?
                .value(idx)
                .to_vec(),
        ),
        _ => return Err(mismatch()),
    })
}
