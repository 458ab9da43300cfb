//! Row-set storage for a single tablet, with the flush and compaction engine
//! that rewrites row sets while writers keep committing.
//!
//! Rows land in a [`MemRowSet`](rowset::MemRowSet) and are later flushed into
//! parquet-backed [`DiskRowSet`](rowset::DiskRowSet)s. Updates and deletes are
//! recorded as append-only mutation chains next to the base rows. The
//! [`compaction`] module drains row sets through [`CompactionInput`]s and
//! replays the mutations that race with it into the output.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use arrow::datatypes::{DataType, Field};
//! use tablet::{Row, Schema, Tablet, TabletOption, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Arc::new(Schema::try_new(
//!     vec![
//!         Field::new("id", DataType::Int64, false),
//!         Field::new("name", DataType::Utf8, true),
//!     ],
//!     1,
//! )?);
//! let tablet = Tablet::open(schema, TabletOption::from("/tmp/tablet"))?;
//! tablet.insert(Row::new(vec![Value::Int64(1), Value::from("a")]))?;
//! tablet.flush()?;
//! let rows = tablet.scan(&tablet.snapshot())?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod compaction;
pub mod id;
pub mod mutation;
/// MVCC primitives shared across modules.
pub mod mvcc;
mod observability;
pub mod option;
pub mod row;
pub mod rowset;
pub mod schema;
pub mod tablet;

pub use compaction::{CompactionError, CompactionInput, CompactionInputRow};
pub use mutation::{ColumnUpdate, RowChange};
pub use mvcc::{MvccSnapshot, Timestamp};
pub use option::TabletOption;
pub use row::{Row, RowKey, Value};
pub use schema::{Schema, SchemaError, SchemaRef};
pub use tablet::{Tablet, TabletError};
