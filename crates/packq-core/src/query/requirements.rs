//! Columns a compiled closure reads.

use crate::catalog::{FieldSchema, ValueKind};

/// How a compiled closure uses a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Usage {
    Scalar,
    String,
    JoinKey,
}

/// One field read by a compiled closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub field: String,
    pub column: u32,
    pub usage: Usage,
    pub is_virtual: bool,
}

/// The set of field reads a compiled predicate or projector performs.
///
/// A virtual string read vetoes row-level compilation: virtual strings
/// have no stored value a row handle can reach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRequirements {
    entries: Vec<Requirement>,
}

impl SourceRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a field read. Repeated reads are recorded once.
    pub fn record(&mut self, field: &FieldSchema, usage: Usage) {
        let exists = self
            .entries
            .iter()
            .any(|r| r.field == field.name && r.usage == usage);
        if !exists {
            self.entries.push(Requirement {
                field: field.name.clone(),
                column: field.column,
                usage,
                is_virtual: field.flags.is_virtual,
            });
        }
    }

    /// Record a field read with the usage its kind implies.
    pub fn record_read(&mut self, field: &FieldSchema) {
        let usage = match field.kind {
            ValueKind::String => Usage::String,
            ValueKind::Scalar(_) => Usage::Scalar,
        };
        self.record(field, usage);
    }

    /// Add every read of another set.
    pub fn merge(&mut self, other: &SourceRequirements) {
        for entry in &other.entries {
            if !self.entries.contains(entry) {
                self.entries.push(entry.clone());
            }
        }
    }

    /// Check whether any read is a virtual string.
    pub fn has_virtual_string(&self) -> bool {
        self.entries
            .iter()
            .any(|r| r.is_virtual && r.usage == Usage::String)
    }

    /// Iterate over the recorded reads.
    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.entries.iter()
    }

    /// Distinct columns read.
    pub fn columns(&self) -> Vec<u32> {
        let mut columns: Vec<u32> = self.entries.iter().map(|r| r.column).collect();
        columns.sort_unstable();
        columns.dedup();
        columns
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packq_proto::ScalarKind;

    #[test]
    fn test_dedup_and_columns() {
        let level = FieldSchema::scalar("Level", ScalarKind::I32, 2);
        let name = FieldSchema::string("Name", 1);
        let mut reqs = SourceRequirements::new();
        reqs.record_read(&level);
        reqs.record_read(&level);
        reqs.record_read(&name);
        reqs.record(&level, Usage::JoinKey);

        assert_eq!(reqs.len(), 3);
        assert_eq!(reqs.columns(), vec![1, 2]);
        assert!(!reqs.has_virtual_string());
    }

    #[test]
    fn test_virtual_string_veto() {
        let mut reqs = SourceRequirements::new();
        reqs.record_read(&FieldSchema::scalar("Score", ScalarKind::I32, 3).derived());
        assert!(!reqs.has_virtual_string());

        let mut other = SourceRequirements::new();
        other.record_read(&FieldSchema::string("Title", 4).derived());
        reqs.merge(&other);
        assert!(reqs.has_virtual_string());
    }
}
