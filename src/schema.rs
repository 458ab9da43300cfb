//! Row layout shared by every row set of a tablet.

use std::{fmt::Write as _, sync::Arc};

use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef as ArrowSchemaRef};
use thiserror::Error;

use crate::row::{Row, RowKey, Value};

/// Shared handle to a [`Schema`].
pub type SchemaRef = Arc<Schema>;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema must have at least one key column")]
    NoKeyColumns,
    #[error("{num_key_columns} key columns requested but schema has {num_columns} columns")]
    TooManyKeyColumns {
        num_key_columns: usize,
        num_columns: usize,
    },
    #[error("key column {0} must not be nullable")]
    NullableKey(String),
    #[error("column {name} has unsupported type {data_type}")]
    UnsupportedType { name: String, data_type: DataType },
    #[error("column name {0} is reserved")]
    ReservedName(String),
    #[error("column index {0} is out of range")]
    UnknownColumn(usize),
    #[error("key column {0} cannot be updated")]
    KeyColumnUpdate(String),
    #[error("row has {actual} values but schema has {expected} columns")]
    Arity { expected: usize, actual: usize },
    #[error("value {value} does not fit column {name} ({data_type}, nullable={nullable})")]
    TypeMismatch {
        name: String,
        data_type: DataType,
        nullable: bool,
        value: String,
    },
}

/// Column layout plus the width of the primary key.
///
/// The first `num_key_columns` columns form the primary key. Two schemas are
/// interchangeable for compaction purposes when [`Schema::structurally_eq`]
/// holds.
#[derive(Debug, Clone)]
pub struct Schema {
    arrow_schema: ArrowSchemaRef,
    num_key_columns: usize,
}

impl Schema {
    /// Build a schema from `fields` whose leading `num_key_columns` form the key.
    pub fn try_new(fields: Vec<Field>, num_key_columns: usize) -> Result<Self, SchemaError> {
        Self::from_arrow_schema(ArrowSchema::new(fields), num_key_columns)
    }

    /// create [`Schema`] from [`arrow::datatypes::Schema`]
    pub fn from_arrow_schema(
        arrow_schema: ArrowSchema,
        num_key_columns: usize,
    ) -> Result<Self, SchemaError> {
        if num_key_columns == 0 {
            return Err(SchemaError::NoKeyColumns);
        }
        let num_columns = arrow_schema.fields().len();
        if num_key_columns > num_columns {
            return Err(SchemaError::TooManyKeyColumns {
                num_key_columns,
                num_columns,
            });
        }
        for (idx, field) in arrow_schema.fields().iter().enumerate() {
            if !is_supported(field.data_type()) {
                return Err(SchemaError::UnsupportedType {
                    name: field.name().clone(),
                    data_type: field.data_type().clone(),
                });
            }
            if field.name() == crate::row::arrows::COMMIT_TS_COL {
                return Err(SchemaError::ReservedName(field.name().clone()));
            }
            if idx < num_key_columns && field.is_nullable() {
                return Err(SchemaError::NullableKey(field.name().clone()));
            }
        }
        Ok(Self {
            arrow_schema: Arc::new(arrow_schema),
            num_key_columns,
        })
    }

    pub fn arrow_schema(&self) -> &ArrowSchemaRef {
        &self.arrow_schema
    }

    pub fn num_columns(&self) -> usize {
        self.arrow_schema.fields().len()
    }

    pub fn num_key_columns(&self) -> usize {
        self.num_key_columns
    }

    pub fn column(&self, idx: usize) -> Option<&Field> {
        self.arrow_schema.fields().get(idx).map(|field| field.as_ref())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.arrow_schema.index_of(name).ok()
    }

    pub fn is_key_column(&self, idx: usize) -> bool {
        idx < self.num_key_columns
    }

    /// Same columns in the same order with the same types and nullability,
    /// and the same key width. Schema metadata is ignored.
    pub fn structurally_eq(&self, other: &Schema) -> bool {
        if self.num_key_columns != other.num_key_columns
            || self.num_columns() != other.num_columns()
        {
            return false;
        }
        self.arrow_schema
            .fields()
            .iter()
            .zip(other.arrow_schema.fields().iter())
            .all(|(a, b)| {
                a.name() == b.name()
                    && a.data_type() == b.data_type()
                    && a.is_nullable() == b.is_nullable()
            })
    }

    /// Extract the primary key of `row`.
    pub fn key_of(&self, row: &Row) -> RowKey {
        RowKey::new(
            row.values()
                .iter()
                .take(self.num_key_columns)
                .cloned()
                .collect(),
        )
    }

    /// Check arity, types and nullability of every cell in `row`.
    pub fn validate_row(&self, row: &Row) -> Result<(), SchemaError> {
        if row.len() != self.num_columns() {
            return Err(SchemaError::Arity {
                expected: self.num_columns(),
                actual: row.len(),
            });
        }
        for (idx, value) in row.values().iter().enumerate() {
            self.validate_value(idx, value)?;
        }
        Ok(())
    }

    /// Check that `value` may be stored in column `idx`.
    pub fn validate_value(&self, idx: usize, value: &Value) -> Result<(), SchemaError> {
        let field = self.column(idx).ok_or(SchemaError::UnknownColumn(idx))?;
        if !value.fits(field.data_type(), field.is_nullable()) {
            return Err(SchemaError::TypeMismatch {
                name: field.name().clone(),
                data_type: field.data_type().clone(),
                nullable: field.is_nullable(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    /// Render `row` as `(int64 id=1, string name="a")`.
    pub fn debug_row(&self, row: &Row) -> String {
        let mut out = String::from("(");
        for (idx, value) in row.values().iter().enumerate() {
            if idx > 0 {
                out.push_str(", ");
            }
            match self.column(idx) {
                Some(field) => {
                    let _ = write!(
                        out,
                        "{} {}={}",
                        type_name(field.data_type()),
                        field.name(),
                        value
                    );
                }
                None => {
                    let _ = write!(out, "?={}", value);
                }
            }
        }
        out.push(')');
        out
    }
}

fn is_supported(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Boolean
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float64
            | DataType::Utf8
            | DataType::Binary
    )
}

fn type_name(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::Boolean => "bool",
        DataType::Int32 => "int32",
        DataType::Int64 => "int64",
        DataType::UInt32 => "uint32",
        DataType::UInt64 => "uint64",
        DataType::Float64 => "double",
        DataType::Utf8 => "string",
        DataType::Binary => "binary",
        _ => "unknown",
    }
}
