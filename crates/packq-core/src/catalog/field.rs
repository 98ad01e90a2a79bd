//! Physical field and table schemas.

use super::types::ValueKind;
use packq_proto::ScalarKind;
use rkyv::{Archive, Deserialize, Serialize};

/// Per-field flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct FieldFlags {
    /// Value is derived at read time, not stored in the row.
    pub is_virtual: bool,
    /// Field holds the row id.
    pub is_id: bool,
    /// Field holds a key into another table.
    pub is_relation: bool,
}

/// Physical description of one field of a table.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name.
    pub name: String,
    /// Stored kind.
    pub kind: ValueKind,
    /// Column index.
    pub column: u32,
    /// Number of elements; greater than one for arrays.
    pub element_count: u16,
    /// Flags.
    pub flags: FieldFlags,
    /// Table a relation field points into.
    pub referenced_table: Option<String>,
}

impl FieldSchema {
    /// Create a single-valued field.
    pub fn new(name: impl Into<String>, kind: ValueKind, column: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            column,
            element_count: 1,
            flags: FieldFlags::default(),
            referenced_table: None,
        }
    }

    /// Create a primitive field.
    pub fn scalar(name: impl Into<String>, kind: ScalarKind, column: u32) -> Self {
        Self::new(name, ValueKind::Scalar(kind), column)
    }

    /// Create a string field.
    pub fn string(name: impl Into<String>, column: u32) -> Self {
        Self::new(name, ValueKind::String, column)
    }

    /// Create the row id field.
    pub fn id(name: impl Into<String>, column: u32) -> Self {
        let mut field = Self::scalar(name, ScalarKind::I32, column);
        field.flags.is_id = true;
        field
    }

    /// Turn this field into a fixed-size array of `count` elements.
    pub fn with_elements(mut self, count: u16) -> Self {
        self.element_count = count;
        self
    }

    /// Mark this field virtual.
    pub fn derived(mut self) -> Self {
        self.flags.is_virtual = true;
        self
    }

    /// Mark this field as a key into another table.
    pub fn references(mut self, table: impl Into<String>) -> Self {
        self.flags.is_relation = true;
        self.referenced_table = Some(table.into());
        self
    }

    /// Check if this is an array field.
    pub fn is_array(&self) -> bool {
        self.element_count > 1
    }

    /// Column index as `usize`.
    pub fn column_index(&self) -> usize {
        self.column as usize
    }
}

/// Physical schema of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Fields in column order.
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    /// Create an empty table schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field.
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up the row id field.
    pub fn id_field(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.flags.is_id)
    }

    /// Number of columns covered by the fields.
    pub fn column_count(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.column_index() + 1)
            .max()
            .unwrap_or(0)
    }
}
