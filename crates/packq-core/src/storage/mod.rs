//! Storage layer for PackQ.
//!
//! Defines the read-only packed table contract the query engine runs
//! against, plus an in-memory implementation of it.

mod memory;
mod table;
mod table_set;

pub use memory::{MemoryTable, MemoryTableBuilder};
pub use table::{
    Db2File, Db2FileExt, DenseStringIndex, FromField, ReadKind, RowHandle, TableFlags, TableId,
};
pub use table_set::TableSet;
