//! PackQ Core - catalog, packed tables and pushdown query execution.
//!
//! This crate runs query pipelines over read-only, columnar tables. Each
//! query is compiled as far down as it can go: predicates and projections
//! become closures over row handles, navigation predicates become
//! semi-joins, and only what is left is evaluated over materialized
//! entities.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod config;
pub mod error;
pub mod query;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use catalog::{
    Catalog, CollectionShape, ElementType, EntityDef, EntityType, FieldSchema, MemberType,
    NavigationDef, SchemaBundle, TableSchema,
};
pub use config::EngineConfig;
pub use error::Error;
pub use query::{
    DefaultEntityFactory, EntityFactory, ExecutionStrategy, QueryExplain, QueryOutput,
    QueryProvider, Rows,
};
pub use storage::{Db2File, MemoryTable, RowHandle, TableSet};

/// Re-export protocol types.
pub use packq_proto as proto;
