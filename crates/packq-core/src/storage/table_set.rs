//! Named collection of tables a provider queries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::table::Db2File;
use crate::error::Error;

/// Tables by name.
#[derive(Clone, Default)]
pub struct TableSet {
    tables: HashMap<String, Arc<dyn Db2File>>,
}

impl TableSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table under its own name.
    pub fn with_table(mut self, table: impl Db2File + 'static) -> Self {
        let name = table.name().to_string();
        self.tables.insert(name, Arc::new(table));
        self
    }

    /// Add or replace a shared table, returning the previous one.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        table: Arc<dyn Db2File>,
    ) -> Option<Arc<dyn Db2File>> {
        self.tables.insert(name.into(), table)
    }

    /// Get a table by name.
    pub fn get(&self, name: &str) -> Result<&Arc<dyn Db2File>, Error> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl fmt::Debug for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("TableSet").field("tables", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableSchema;
    use crate::storage::MemoryTable;

    #[test]
    fn test_lookup() {
        let set = TableSet::new()
            .with_table(MemoryTable::builder(TableSchema::new("A")).build().unwrap());
        assert_eq!(set.len(), 1);
        assert!(set.get("A").is_ok());
        assert!(matches!(set.get("B"), Err(Error::UnknownTable(_))));
    }
}
