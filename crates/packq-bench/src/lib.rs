//! PackQ Benchmark Suite
//!
//! Criterion benchmarks for the query engine over generated Author/Book tables.
//!
//! # Benchmark Categories
//!
//! - **Pushdown**: the same query at each execution tier
//! - **Dense string**: offset scans and the needle cache
//! - **Reducers**: `Count`, `Any` and `First` with and without row handles

pub mod fixtures;
pub mod harness;

pub use fixtures::{generate_authors, generate_books, Scale};
pub use harness::{init_tracing, TestContext};
