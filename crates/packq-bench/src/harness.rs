//! Benchmark harness helpers.

use std::sync::Arc;

use packq_core::catalog::Catalog;
use packq_core::query::DenseStringCacheRegistry;
use packq_core::storage::TableSet;
use packq_core::{EngineConfig, Error, QueryProvider};

use crate::fixtures::{
    author_table, book_table, generate_authors, generate_books, library_catalog, Scale,
};

/// Test context for benchmarks.
///
/// Holds the packed tables and catalog shared by every provider built from it.
pub struct TestContext {
    pub catalog: Arc<Catalog>,
    pub tables: Arc<TableSet>,
    pub scale: Scale,
}

impl TestContext {
    /// Create a test context with populated tables.
    pub fn with_scale(scale: Scale) -> Self {
        Self::try_with_scale(scale).expect("benchmark fixtures should pack")
    }

    pub fn try_with_scale(scale: Scale) -> Result<Self, Error> {
        init_tracing();
        let authors = generate_authors(scale.count());
        let books = generate_books(scale.count() * scale.books_per_author(), authors.len());
        let tables = TableSet::new()
            .with_table(author_table(&authors)?)
            .with_table(book_table(&books)?);
        tracing::debug!(
            authors = authors.len(),
            books = books.len(),
            "packed benchmark tables"
        );
        Ok(Self {
            catalog: Arc::new(library_catalog()?),
            tables: Arc::new(tables),
            scale,
        })
    }

    /// Provider with its own dense string cache so runs do not share state.
    pub fn provider(&self, config: EngineConfig) -> QueryProvider {
        let capacity = config.dense_string_cache_capacity;
        QueryProvider::new(Arc::clone(&self.catalog), Arc::clone(&self.tables), config)
            .with_string_cache(Arc::new(DenseStringCacheRegistry::new(capacity)))
    }
}

/// Install a subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
