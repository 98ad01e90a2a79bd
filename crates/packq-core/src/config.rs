//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Default number of cached needle lookups per table.
pub const DEFAULT_STRING_CACHE_CAPACITY: usize = 256;

/// Default number of entities buffered per include or projection page.
pub const DEFAULT_PAGE_SIZE: usize = 128;

/// Switches and sizes for query execution.
///
/// Every pushdown switch only changes how a query runs, never what it
/// returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Compile predicates and projections into row-level reads.
    pub row_pushdown: bool,

    /// Turn predicates over navigations into semi-joins.
    pub navigation_pushdown: bool,

    /// Use the dense string offset index for string matches.
    pub dense_string_index: bool,

    /// Cached needle lookups per table.
    /// A non-default capacity gives the provider its own cache registry.
    pub dense_string_cache_capacity: usize,

    /// Entities buffered per include or batched projection page.
    pub page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            row_pushdown: true,
            navigation_pushdown: true,
            dense_string_index: true,
            dense_string_cache_capacity: DEFAULT_STRING_CACHE_CAPACITY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Configuration that materializes every row and evaluates in memory.
    pub fn materialize_only() -> Self {
        Self {
            row_pushdown: false,
            navigation_pushdown: false,
            dense_string_index: false,
            ..Default::default()
        }
    }

    /// Set row pushdown.
    pub fn row_pushdown(mut self, enabled: bool) -> Self {
        self.row_pushdown = enabled;
        self
    }

    /// Set navigation pushdown.
    pub fn navigation_pushdown(mut self, enabled: bool) -> Self {
        self.navigation_pushdown = enabled;
        self
    }

    /// Set use of the dense string index.
    pub fn dense_string_index(mut self, enabled: bool) -> Self {
        self.dense_string_index = enabled;
        self
    }

    /// Set the per-table string cache capacity.
    pub fn dense_string_cache_capacity(mut self, capacity: usize) -> Self {
        self.dense_string_cache_capacity = capacity.max(1);
        self
    }

    /// Set the page size.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, crate::Error> {
        serde_json::from_str(json).map_err(|e| crate::Error::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.row_pushdown && config.navigation_pushdown && config.dense_string_index);
        assert_eq!(config.dense_string_cache_capacity, 256);
        assert_eq!(config.page_size, 128);
    }

    #[test]
    fn test_materialize_only() {
        let config = EngineConfig::materialize_only();
        assert!(!config.row_pushdown);
        assert!(!config.navigation_pushdown);
        assert!(!config.dense_string_index);
    }

    #[test]
    fn test_builder_clamps() {
        let config = EngineConfig::default().page_size(0).dense_string_cache_capacity(0);
        assert_eq!(config.page_size, 1);
        assert_eq!(config.dense_string_cache_capacity, 1);
    }

    #[test]
    fn test_partial_json() {
        let config = EngineConfig::from_json(r#"{"page_size": 16}"#).unwrap();
        assert_eq!(config.page_size, 16);
        assert!(config.row_pushdown);
    }
}
