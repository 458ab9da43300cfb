use arrow::error::ArrowError;
use thiserror::Error;

use crate::{id::RowSetId, schema::SchemaError};

/// Failure kinds surfaced by compaction inputs, flushes and delta replay.
#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("compaction input not initialized: {0}")]
    NotInitialized(&'static str),
    #[error("compaction input used out of order: {0}")]
    OutOfOrder(&'static str),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("compaction io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("compaction parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("compaction arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("rowset {0} is already taking part in another compaction")]
    LockUnavailable(RowSetId),
    #[error("row {row_idx} not found in rowset {rowset} with {row_count} rows")]
    RowNotFound {
        rowset: RowSetId,
        row_idx: u32,
        row_count: u32,
    },
}

impl CompactionError {
    /// Whether the failure came from the underlying source or writer.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            CompactionError::Io(_) | CompactionError::Parquet(_) | CompactionError::Arrow(_)
        )
    }

    /// Row set selection lost a lock race; callers skip the candidate for now.
    pub fn is_lock_unavailable(&self) -> bool {
        matches!(self, CompactionError::LockUnavailable(_))
    }

    pub(crate) fn corruption(context: impl std::fmt::Display, err: SchemaError) -> Self {
        CompactionError::Corruption(format!("{}: {}", context, err))
    }
}
