use std::path::PathBuf;

use parquet::file::properties::WriterProperties;

use crate::id::RowSetId;

/// Rows yielded per compaction block unless overridden.
pub const DEFAULT_COMPACTION_BLOCK_SIZE: usize = 100;

/// Rows buffered by a [`DiskRowSetWriter`](crate::rowset::DiskRowSetWriter) before a record
/// batch is handed to parquet.
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 1024;

/// Tablet-wide configuration.
#[derive(Debug, Clone)]
pub struct TabletOption {
    pub(crate) path: PathBuf,
    pub(crate) compaction_block_size: usize,
    pub(crate) write_batch_size: usize,
    pub(crate) write_parquet_option: Option<WriterProperties>,
}

impl<P> From<P> for TabletOption
where
    P: Into<PathBuf>,
{
    fn from(path: P) -> Self {
        TabletOption {
            path: path.into(),
            compaction_block_size: DEFAULT_COMPACTION_BLOCK_SIZE,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            write_parquet_option: None,
        }
    }
}

impl TabletOption {
    pub fn path(self, path: impl Into<PathBuf>) -> Self {
        TabletOption {
            path: path.into(),
            ..self
        }
    }

    /// Number of rows a compaction input yields per block. Clamped to at least one.
    pub fn compaction_block_size(self, compaction_block_size: usize) -> Self {
        TabletOption {
            compaction_block_size: compaction_block_size.max(1),
            ..self
        }
    }

    pub fn write_batch_size(self, write_batch_size: usize) -> Self {
        TabletOption {
            write_batch_size: write_batch_size.max(1),
            ..self
        }
    }

    pub fn write_parquet_option(self, write_parquet_option: WriterProperties) -> Self {
        TabletOption {
            write_parquet_option: Some(write_parquet_option),
            ..self
        }
    }
}

impl TabletOption {
    pub(crate) fn rowset_path(&self, id: &RowSetId) -> PathBuf {
        self.path.join(format!("{}.parquet", id))
    }

    pub fn dir(&self) -> &PathBuf {
        &self.path
    }

    pub fn block_size(&self) -> usize {
        self.compaction_block_size
    }
}
