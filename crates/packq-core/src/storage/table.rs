//! The packed table contract.
//!
//! A table is a read-only set of rows addressed by [`RowHandle`]. Rows are
//! read one column at a time with [`Db2File::read_field`]; nothing ever
//! builds a whole record at this layer.

use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::catalog::{FieldSchema, ValueKind};
use crate::error::Error;
use packq_proto::{ScalarKind, ScalarType, Value};

/// Opaque address of one row in one table instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowHandle {
    section: u16,
    position: u32,
    id: i32,
}

impl RowHandle {
    /// Create a handle. Only table implementations should call this.
    pub fn new(section: u16, position: u32, id: i32) -> Self {
        Self {
            section,
            position,
            id,
        }
    }

    /// Storage section holding the row.
    pub fn section(&self) -> u16 {
        self.section
    }

    /// Position of the row within its section.
    pub fn position(&self) -> u32 {
        self.position
    }

    /// Logical row id.
    pub fn id(&self) -> i32 {
        self.id
    }
}

/// Table layout flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TableFlags(u16);

impl TableFlags {
    pub const NONE: TableFlags = TableFlags(0);
    /// Strings are stored inline per row instead of in a packed region.
    pub const SPARSE: TableFlags = TableFlags(0x1);

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn contains(&self, other: TableFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_sparse(&self) -> bool {
        self.contains(TableFlags::SPARSE)
    }
}

impl BitOr for TableFlags {
    type Output = TableFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        TableFlags(self.0 | rhs.0)
    }
}

/// Identifier of a table instance, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(u64);

impl TableId {
    /// Allocate a fresh identifier.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TableId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table#{}", self.0)
    }
}

/// What to read out of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    /// One primitive, converted to the requested kind.
    Scalar(ScalarKind),
    /// One string.
    String,
    /// A fixed array of primitives.
    Array { element: ScalarKind, len: u16 },
    /// A fixed array of strings.
    StringArray { len: u16 },
}

impl ReadKind {
    /// Read kind of a field as physically stored.
    pub fn of_field(field: &FieldSchema) -> Self {
        match (field.kind, field.is_array()) {
            (ValueKind::Scalar(kind), false) => ReadKind::Scalar(kind),
            (ValueKind::Scalar(element), true) => ReadKind::Array {
                element,
                len: field.element_count,
            },
            (ValueKind::String, false) => ReadKind::String,
            (ValueKind::String, true) => ReadKind::StringArray {
                len: field.element_count,
            },
        }
    }
}

impl fmt::Display for ReadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadKind::Scalar(kind) => write!(f, "{kind}"),
            ReadKind::String => f.write_str("string"),
            ReadKind::Array { element, len } => write!(f, "[{element}; {len}]"),
            ReadKind::StringArray { len } => write!(f, "[string; {len}]"),
        }
    }
}

/// A packed, read-only table.
pub trait Db2File: Send + Sync {
    /// Identifier of this instance.
    fn table_id(&self) -> TableId;

    /// Table name.
    fn name(&self) -> &str;

    /// Number of rows.
    fn records_count(&self) -> usize;

    /// Layout flags.
    fn flags(&self) -> TableFlags;

    /// The packed string region; empty for sparse tables.
    fn dense_string_table_bytes(&self) -> &[u8];

    /// All rows in ascending row id order.
    fn rows(&self) -> Box<dyn Iterator<Item = RowHandle> + '_>;

    /// Find the row with the given id.
    ///
    /// Ids that cannot be row ids fail with [`Error::IdOutOfRange`]; valid
    /// ids without a row return `Ok(None)`.
    fn try_get_row_handle(&self, id: i64) -> Result<Option<RowHandle>, Error>;

    /// Read one column of one row.
    fn read_field(&self, row: RowHandle, column: usize, kind: ReadKind) -> Result<Value, Error>;

    /// The dense string offset capability, when the table has it.
    fn as_dense_string_index(&self) -> Option<&dyn DenseStringIndex> {
        None
    }
}

/// Exposes where a row's string starts in the packed string region.
pub trait DenseStringIndex {
    /// Offset of the string stored at `column` of `row`, if it has one.
    fn try_get_dense_string_table_index(&self, row: RowHandle, column: usize) -> Option<usize>;
}

/// Rust types that can be read from a column.
pub trait FromField: Sized {
    fn read_kind() -> ReadKind;
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! scalar_from_field {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromField for $ty {
                fn read_kind() -> ReadKind {
                    ReadKind::Scalar(<$ty as ScalarType>::KIND)
                }

                fn from_value(value: Value) -> Option<Self> {
                    value.as_scalar().and_then(<$ty as ScalarType>::from_scalar)
                }
            }
        )*
    };
}

scalar_from_field!(bool, i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

impl FromField for String {
    fn read_kind() -> ReadKind {
        ReadKind::String
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl<T: ScalarType, const N: usize> FromField for [T; N] {
    fn read_kind() -> ReadKind {
        ReadKind::Array {
            element: T::KIND,
            len: N as u16,
        }
    }

    fn from_value(value: Value) -> Option<Self> {
        let items = value
            .elements()?
            .iter()
            .map(|v| v.as_scalar().and_then(T::from_scalar))
            .collect::<Option<Vec<T>>>()?;
        items.try_into().ok()
    }
}

/// Typed and key-oriented reads on top of [`Db2File`].
pub trait Db2FileExt: Db2File {
    /// Read a column as a Rust type.
    fn read<T: FromField>(&self, row: RowHandle, column: usize) -> Result<T, Error> {
        let kind = T::read_kind();
        let value = self.read_field(row, column, kind)?;
        T::from_value(value).ok_or_else(|| Error::FieldType {
            column,
            requested: kind.to_string(),
        })
    }

    /// Read a key field. Id fields yield the row id.
    fn read_key(&self, row: RowHandle, field: &FieldSchema) -> Result<Option<i64>, Error> {
        if field.flags.is_id {
            return Ok(Some(row.id().into()));
        }
        match field.kind {
            ValueKind::Scalar(kind) if kind.is_integer() && !field.is_array() => Ok(self
                .read_field(row, field.column_index(), ReadKind::Scalar(kind))?
                .as_key()),
            _ => Ok(None),
        }
    }

    /// Read every element of a key array field.
    fn read_key_array(&self, row: RowHandle, field: &FieldSchema) -> Result<Vec<i64>, Error> {
        match field.kind {
            ValueKind::Scalar(element) if element.is_integer() => {
                let value = self.read_field(
                    row,
                    field.column_index(),
                    ReadKind::Array {
                        element,
                        len: field.element_count,
                    },
                )?;
                Ok(value
                    .elements()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(Value::as_key)
                    .collect())
            }
            _ => Ok(Vec::new()),
        }
    }
}

impl<T: Db2File + ?Sized> Db2FileExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = TableFlags::NONE | TableFlags::SPARSE;
        assert!(flags.is_sparse());
        assert!(!TableFlags::default().is_sparse());
        assert_eq!(TableFlags::from_bits(1), TableFlags::SPARSE);
    }

    #[test]
    fn test_table_ids_unique() {
        let a = TableId::next();
        let b = TableId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_read_kind_of_field() {
        let field = FieldSchema::scalar("Slots", ScalarKind::U16, 2).with_elements(4);
        assert_eq!(
            ReadKind::of_field(&field),
            ReadKind::Array {
                element: ScalarKind::U16,
                len: 4
            }
        );
        assert_eq!(ReadKind::of_field(&field).to_string(), "[u16; 4]");
    }
}
