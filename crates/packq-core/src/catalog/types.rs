//! Core type definitions for the catalog.

use packq_proto::ScalarKind;
use rkyv::{Archive, Deserialize, Serialize};

/// Physical kind of a column as stored in a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum ValueKind {
    /// Primitive column.
    Scalar(ScalarKind),
    /// Zero-terminated string column.
    String,
}

/// Declared type of an element of an array member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum ElementType {
    /// Primitive element.
    Scalar(ScalarKind),
    /// Enum element stored as its underlying primitive.
    Enum(ScalarKind),
    /// String element.
    String,
}

/// Shape an array-like member or collection navigation is declared as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum CollectionShape {
    /// Native fixed-size array.
    Array,
    /// Read-only collection interface.
    ReadOnlyCollection,
    /// Mutable list.
    List,
}

impl CollectionShape {
    /// Shape name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            CollectionShape::Array => "an array",
            CollectionShape::ReadOnlyCollection => "a read-only collection",
            CollectionShape::List => "a list",
        }
    }
}

/// Declared type of an entity member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum MemberType {
    /// Primitive member.
    Scalar(ScalarKind),
    /// Enum member with its underlying primitive.
    Enum { underlying: ScalarKind },
    /// String member.
    String,
    /// Fixed-size array member.
    Array {
        element: ElementType,
        shape: CollectionShape,
    },
}

impl MemberType {
    /// Primitive kind read for this member, if it is scalar-like.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            MemberType::Scalar(kind) | MemberType::Enum { underlying: kind } => Some(*kind),
            _ => None,
        }
    }

    /// Check whether a column of the given physical kind can back this member.
    pub fn accepts(&self, kind: ValueKind, element_count: u16) -> bool {
        match (self, kind) {
            (MemberType::String, ValueKind::String) => element_count <= 1,
            (MemberType::Scalar(k) | MemberType::Enum { underlying: k }, ValueKind::Scalar(p)) => {
                element_count <= 1 && k.is_numeric() == p.is_numeric()
            }
            (MemberType::Array { element, .. }, kind) => {
                element_count > 1
                    && match (element, kind) {
                        (ElementType::String, ValueKind::String) => true,
                        (
                            ElementType::Scalar(k) | ElementType::Enum(k),
                            ValueKind::Scalar(p),
                        ) => k.is_numeric() == p.is_numeric(),
                        _ => false,
                    }
            }
            _ => false,
        }
    }
}
