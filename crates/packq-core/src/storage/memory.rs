//! In-process packed table.
//!
//! Dense tables keep every stored string once in a zero-terminated string
//! region and store offsets in their rows, the same layout a packed file
//! uses. Sparse tables keep strings inline per row. Virtual fields are kept
//! inline in both layouts, so they never have a string offset.

use std::collections::HashMap;

use super::table::{Db2File, DenseStringIndex, ReadKind, RowHandle, TableFlags, TableId};
use crate::catalog::{FieldSchema, TableSchema, ValueKind};
use crate::error::Error;
use crate::query::DenseStringCacheRegistry;
use packq_proto::{Scalar, ScalarKind, Value};
use tracing::debug;

#[derive(Debug, Clone)]
struct Column {
    kind: ValueKind,
    element_count: u16,
    is_id: bool,
}

#[derive(Debug, Clone)]
enum Cell {
    Empty,
    Scalar(Scalar),
    Scalars(Vec<Scalar>),
    Offset(usize),
    Offsets(Vec<usize>),
    Inline(String),
    Inlines(Vec<String>),
}

#[derive(Debug, Clone)]
struct StoredRow {
    id: i32,
    cells: Vec<Cell>,
}

/// A read-only table held in memory.
#[derive(Debug)]
pub struct MemoryTable {
    id: TableId,
    name: String,
    flags: TableFlags,
    columns: Vec<Option<Column>>,
    rows: Vec<StoredRow>,
    positions: HashMap<i32, u32>,
    strings: Vec<u8>,
}

impl MemoryTable {
    /// Start building a table for a schema.
    pub fn builder(schema: TableSchema) -> MemoryTableBuilder {
        MemoryTableBuilder::new(schema)
    }

    fn stored(&self, row: RowHandle) -> Result<&StoredRow, Error> {
        self.rows
            .get(row.position() as usize)
            .filter(|r| r.id == row.id())
            .ok_or(Error::RowNotFound(row.id().into()))
    }

    fn string_at(&self, offset: usize) -> String {
        let tail = self.strings.get(offset..).unwrap_or_default();
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        String::from_utf8_lossy(&tail[..end]).into_owned()
    }
}

impl Db2File for MemoryTable {
    fn table_id(&self) -> TableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn records_count(&self) -> usize {
        self.rows.len()
    }

    fn flags(&self) -> TableFlags {
        self.flags
    }

    fn dense_string_table_bytes(&self) -> &[u8] {
        &self.strings
    }

    fn rows(&self) -> Box<dyn Iterator<Item = RowHandle> + '_> {
        Box::new(
            self.rows
                .iter()
                .enumerate()
                .map(|(position, row)| RowHandle::new(0, position as u32, row.id)),
        )
    }

    fn try_get_row_handle(&self, id: i64) -> Result<Option<RowHandle>, Error> {
        let id = i32::try_from(id).map_err(|_| Error::IdOutOfRange(id))?;
        Ok(self
            .positions
            .get(&id)
            .map(|&position| RowHandle::new(0, position, id)))
    }

    fn read_field(&self, row: RowHandle, column: usize, kind: ReadKind) -> Result<Value, Error> {
        let stored = self.stored(row)?;
        let layout = self
            .columns
            .get(column)
            .and_then(Option::as_ref)
            .ok_or(Error::ColumnOutOfRange(column))?;
        let mismatch = || Error::FieldType {
            column,
            requested: kind.to_string(),
        };

        if layout.is_id {
            return match kind {
                ReadKind::Scalar(k) => Scalar::I32(row.id())
                    .convert(k)
                    .map(Value::Scalar)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            };
        }

        let cell = stored.cells.get(column).unwrap_or(&Cell::Empty);
        match (cell, kind) {
            (Cell::Scalar(s), ReadKind::Scalar(k)) => {
                s.convert(k).map(Value::Scalar).ok_or_else(mismatch)
            }
            (Cell::Offset(offset), ReadKind::String) => Ok(Value::String(self.string_at(*offset))),
            (Cell::Inline(s), ReadKind::String) => Ok(Value::String(s.clone())),
            (Cell::Scalars(items), ReadKind::Array { element, len })
                if usize::from(len) == items.len() =>
            {
                items
                    .iter()
                    .map(|s| s.convert(element).map(Value::Scalar))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::Array)
                    .ok_or_else(mismatch)
            }
            (Cell::Offsets(offsets), ReadKind::StringArray { len })
                if usize::from(len) == offsets.len() =>
            {
                Ok(Value::Array(
                    offsets
                        .iter()
                        .map(|&o| Value::String(self.string_at(o)))
                        .collect(),
                ))
            }
            (Cell::Inlines(items), ReadKind::StringArray { len })
                if usize::from(len) == items.len() =>
            {
                Ok(Value::Array(
                    items.iter().map(|s| Value::String(s.clone())).collect(),
                ))
            }
            _ => {
                debug!(
                    table = %self.name,
                    column,
                    stored = ?layout.kind,
                    elements = layout.element_count,
                    %kind,
                    "undefined field read"
                );
                Err(mismatch())
            }
        }
    }

    fn as_dense_string_index(&self) -> Option<&dyn DenseStringIndex> {
        if self.flags.is_sparse() {
            None
        } else {
            Some(self)
        }
    }
}

impl DenseStringIndex for MemoryTable {
    fn try_get_dense_string_table_index(&self, row: RowHandle, column: usize) -> Option<usize> {
        match self.stored(row).ok()?.cells.get(column)? {
            Cell::Offset(offset) => Some(*offset),
            _ => None,
        }
    }
}

impl Drop for MemoryTable {
    fn drop(&mut self) {
        DenseStringCacheRegistry::global().invalidate(self.id);
    }
}

/// Builds a [`MemoryTable`] from named row values.
#[derive(Debug, Clone)]
pub struct MemoryTableBuilder {
    schema: TableSchema,
    flags: TableFlags,
    rows: Vec<(i32, Vec<(String, Value)>)>,
}

impl MemoryTableBuilder {
    /// Create a builder for a schema.
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            flags: TableFlags::NONE,
            rows: Vec::new(),
        }
    }

    /// Store strings inline instead of in a packed region.
    pub fn sparse(mut self) -> Self {
        self.flags = self.flags | TableFlags::SPARSE;
        self
    }

    /// Add a row. Fields not given take their zero value.
    pub fn row<N: Into<String>>(
        mut self,
        id: i32,
        values: impl IntoIterator<Item = (N, Value)>,
    ) -> Self {
        let values = values.into_iter().map(|(n, v)| (n.into(), v)).collect();
        self.rows.push((id, values));
        self
    }

    /// Pack the rows.
    pub fn build(self) -> Result<MemoryTable, Error> {
        let sparse = self.flags.is_sparse();
        let mut columns = vec![None; self.schema.column_count()];
        for field in &self.schema.fields {
            columns[field.column_index()] = Some(Column {
                kind: field.kind,
                element_count: field.element_count,
                is_id: field.flags.is_id,
            });
        }

        let mut strings = StringRegion::new(sparse);
        let mut rows = Vec::with_capacity(self.rows.len());
        let mut rows_in = self.rows;
        rows_in.sort_by_key(|(id, _)| *id);

        for (id, values) in rows_in {
            if rows.last().is_some_and(|r: &StoredRow| r.id == id) {
                return Err(Error::Schema(format!(
                    "row id {id} appears twice in table `{}`",
                    self.schema.name
                )));
            }
            if let Some((name, _)) = values
                .iter()
                .find(|(name, _)| self.schema.field(name).is_none())
            {
                return Err(Error::Schema(format!(
                    "table `{}` has no field `{name}`",
                    self.schema.name
                )));
            }

            let mut cells = vec![Cell::Empty; columns.len()];
            for field in &self.schema.fields {
                if field.flags.is_id {
                    continue;
                }
                let value = values
                    .iter()
                    .find(|(name, _)| *name == field.name)
                    .map(|(_, v)| v);
                cells[field.column_index()] = pack_cell(field, value, &mut strings)?;
            }
            rows.push(StoredRow { id, cells });
        }

        let positions = rows
            .iter()
            .enumerate()
            .map(|(position, row)| (row.id, position as u32))
            .collect();

        let table = MemoryTable {
            id: TableId::next(),
            name: self.schema.name,
            flags: self.flags,
            columns,
            rows,
            positions,
            strings: strings.bytes,
        };
        debug!(
            table = %table.name,
            id = %table.id,
            rows = table.rows.len(),
            string_bytes = table.strings.len(),
            sparse,
            "memory table built"
        );
        Ok(table)
    }
}

/// Zero-terminated, deduplicated string storage.
struct StringRegion {
    sparse: bool,
    bytes: Vec<u8>,
    offsets: HashMap<String, usize>,
}

impl StringRegion {
    fn new(sparse: bool) -> Self {
        let mut offsets = HashMap::new();
        let bytes = if sparse {
            Vec::new()
        } else {
            offsets.insert(String::new(), 0);
            vec![0]
        };
        Self {
            sparse,
            bytes,
            offsets,
        }
    }

    fn intern(&mut self, s: &str) -> usize {
        if let Some(&offset) = self.offsets.get(s) {
            return offset;
        }
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        self.offsets.insert(s.to_string(), offset);
        offset
    }
}

fn pack_cell(
    field: &FieldSchema,
    value: Option<&Value>,
    strings: &mut StringRegion,
) -> Result<Cell, Error> {
    let invalid = |value: &Value| {
        Error::Schema(format!(
            "field `{}` cannot store a {} value",
            field.name,
            value.type_name()
        ))
    };
    let inline = strings.sparse || field.flags.is_virtual;

    match (field.kind, field.is_array()) {
        (ValueKind::Scalar(kind), false) => match value {
            None | Some(Value::Null) => Ok(Cell::Scalar(kind.default_value())),
            Some(v) => Ok(Cell::Scalar(pack_scalar(kind, v).ok_or_else(|| invalid(v))?)),
        },
        (ValueKind::Scalar(kind), true) => {
            let items = elements(field, value)?;
            let mut packed = Vec::with_capacity(usize::from(field.element_count));
            for item in items {
                packed.push(pack_scalar(kind, item).ok_or_else(|| invalid(item))?);
            }
            packed.resize(usize::from(field.element_count), kind.default_value());
            Ok(Cell::Scalars(packed))
        }
        (ValueKind::String, false) => {
            let text = match value {
                None | Some(Value::Null) => "",
                Some(Value::String(s)) => s.as_str(),
                Some(v) => return Err(invalid(v)),
            };
            check_text(field, text)?;
            Ok(if inline {
                Cell::Inline(text.to_string())
            } else {
                Cell::Offset(strings.intern(text))
            })
        }
        (ValueKind::String, true) => {
            let mut texts = Vec::with_capacity(usize::from(field.element_count));
            for item in elements(field, value)? {
                let text = item.as_str().ok_or_else(|| invalid(item))?;
                check_text(field, text)?;
                texts.push(text.to_string());
            }
            texts.resize(usize::from(field.element_count), String::new());
            Ok(if inline {
                Cell::Inlines(texts)
            } else {
                Cell::Offsets(texts.iter().map(|t| strings.intern(t)).collect())
            })
        }
    }
}

fn pack_scalar(kind: ScalarKind, value: &Value) -> Option<Scalar> {
    value.as_scalar()?.convert(kind)
}

fn elements<'v>(field: &FieldSchema, value: Option<&'v Value>) -> Result<&'v [Value], Error> {
    let items: &[Value] = match value {
        None | Some(Value::Null) => &[],
        Some(v) => v.elements().ok_or_else(|| {
            Error::Schema(format!("field `{}` needs an array value", field.name))
        })?,
    };
    if items.len() > usize::from(field.element_count) {
        return Err(Error::Schema(format!(
            "field `{}` holds {} elements, got {}",
            field.name,
            field.element_count,
            items.len()
        )));
    }
    Ok(items)
}

fn check_text(field: &FieldSchema, text: &str) -> Result<(), Error> {
    if text.as_bytes().contains(&0) {
        return Err(Error::Schema(format!(
            "string stored in `{}` contains a zero byte",
            field.name
        )));
    }
    Ok(())
}
