//! Runtime value types produced by query evaluation.

use std::cmp::Ordering;
use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::entity::Entity;

/// Primitive storage kinds a packed column can hold.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
pub enum ScalarKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ScalarKind {
    /// Every scalar kind, ordered by width.
    pub const ALL: [ScalarKind; 11] = [
        ScalarKind::Bool,
        ScalarKind::I8,
        ScalarKind::U8,
        ScalarKind::I16,
        ScalarKind::U16,
        ScalarKind::I32,
        ScalarKind::U32,
        ScalarKind::I64,
        ScalarKind::U64,
        ScalarKind::F32,
        ScalarKind::F64,
    ];

    /// Check if this kind is an integer kind.
    pub fn is_integer(&self) -> bool {
        !matches!(self, ScalarKind::Bool | ScalarKind::F32 | ScalarKind::F64)
    }

    /// Check if this kind is a floating point kind.
    pub fn is_float(&self) -> bool {
        matches!(self, ScalarKind::F32 | ScalarKind::F64)
    }

    /// Check if this kind is numeric (integer or float).
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ScalarKind::Bool)
    }

    /// Check if this kind is an unsigned integer kind.
    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            ScalarKind::U8 | ScalarKind::U16 | ScalarKind::U32 | ScalarKind::U64
        )
    }

    /// Get the size of one value of this kind in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            ScalarKind::Bool | ScalarKind::I8 | ScalarKind::U8 => 1,
            ScalarKind::I16 | ScalarKind::U16 => 2,
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F32 => 4,
            ScalarKind::I64 | ScalarKind::U64 | ScalarKind::F64 => 8,
        }
    }

    /// The zero value of this kind.
    pub fn default_value(&self) -> Scalar {
        match self {
            ScalarKind::Bool => Scalar::Bool(false),
            other => Scalar::I32(0).convert(*other).unwrap_or(Scalar::I32(0)),
        }
    }

    /// Get the name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::I8 => "i8",
            ScalarKind::U8 => "u8",
            ScalarKind::I16 => "i16",
            ScalarKind::U16 => "u16",
            ScalarKind::I32 => "i32",
            ScalarKind::U32 => "u32",
            ScalarKind::I64 => "i64",
            ScalarKind::U64 => "u64",
            ScalarKind::F32 => "f32",
            ScalarKind::F64 => "f64",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single primitive value.
///
/// Comparisons between scalars promote both sides: integers compare
/// exactly regardless of width and signedness, floats compare as `f64`.
#[derive(
    Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub enum Scalar {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    /// Get the kind of this scalar.
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Bool(_) => ScalarKind::Bool,
            Scalar::I8(_) => ScalarKind::I8,
            Scalar::U8(_) => ScalarKind::U8,
            Scalar::I16(_) => ScalarKind::I16,
            Scalar::U16(_) => ScalarKind::U16,
            Scalar::I32(_) => ScalarKind::I32,
            Scalar::U32(_) => ScalarKind::U32,
            Scalar::I64(_) => ScalarKind::I64,
            Scalar::U64(_) => ScalarKind::U64,
            Scalar::F32(_) => ScalarKind::F32,
            Scalar::F64(_) => ScalarKind::F64,
        }
    }

    /// Get the value as a wide integer, if this is an integer scalar.
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Scalar::I8(v) => Some(v.into()),
            Scalar::U8(v) => Some(v.into()),
            Scalar::I16(v) => Some(v.into()),
            Scalar::U16(v) => Some(v.into()),
            Scalar::I32(v) => Some(v.into()),
            Scalar::U32(v) => Some(v.into()),
            Scalar::I64(v) => Some(v.into()),
            Scalar::U64(v) => Some(v.into()),
            Scalar::Bool(_) | Scalar::F32(_) | Scalar::F64(_) => None,
        }
    }

    /// Get the value as `f64`, if this is a numeric scalar.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Scalar::F32(v) => Some(v.into()),
            Scalar::F64(v) => Some(v),
            Scalar::Bool(_) => None,
            other => other.as_i128().map(|v| v as f64),
        }
    }

    /// Get the value as a row key.
    ///
    /// Only integer scalars that fit in `i64` are keys.
    pub fn as_key(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    /// Get the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert to another kind with primitive cast semantics.
    ///
    /// Numeric conversions truncate or wrap like `as`. Booleans only
    /// convert to themselves.
    pub fn convert(self, kind: ScalarKind) -> Option<Scalar> {
        if self.kind() == kind {
            return Some(self);
        }
        match self {
            Scalar::Bool(_) => None,
            _ if kind == ScalarKind::Bool => None,
            Scalar::F32(v) => Some(Self::from_f64(v.into(), kind)),
            Scalar::F64(v) => Some(Self::from_f64(v, kind)),
            other => other.as_i128().map(|v| Self::from_i128(v, kind)),
        }
    }

    /// Compare two scalars with numeric promotion.
    ///
    /// Returns `None` when the values are not comparable (a boolean against
    /// a number, or a NaN).
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            (Scalar::Bool(_), _) | (_, Scalar::Bool(_)) => None,
            _ => match (self.as_i128(), other.as_i128()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
            },
        }
    }

    fn from_i128(v: i128, kind: ScalarKind) -> Scalar {
        match kind {
            ScalarKind::Bool => Scalar::Bool(v != 0),
            ScalarKind::I8 => Scalar::I8(v as i8),
            ScalarKind::U8 => Scalar::U8(v as u8),
            ScalarKind::I16 => Scalar::I16(v as i16),
            ScalarKind::U16 => Scalar::U16(v as u16),
            ScalarKind::I32 => Scalar::I32(v as i32),
            ScalarKind::U32 => Scalar::U32(v as u32),
            ScalarKind::I64 => Scalar::I64(v as i64),
            ScalarKind::U64 => Scalar::U64(v as u64),
            ScalarKind::F32 => Scalar::F32(v as f32),
            ScalarKind::F64 => Scalar::F64(v as f64),
        }
    }

    fn from_f64(v: f64, kind: ScalarKind) -> Scalar {
        match kind {
            ScalarKind::Bool => Scalar::Bool(v != 0.0),
            ScalarKind::I8 => Scalar::I8(v as i8),
            ScalarKind::U8 => Scalar::U8(v as u8),
            ScalarKind::I16 => Scalar::I16(v as i16),
            ScalarKind::U16 => Scalar::U16(v as u16),
            ScalarKind::I32 => Scalar::I32(v as i32),
            ScalarKind::U32 => Scalar::U32(v as u32),
            ScalarKind::I64 => Scalar::I64(v as i64),
            ScalarKind::U64 => Scalar::U64(v as u64),
            ScalarKind::F32 => Scalar::F32(v as f32),
            ScalarKind::F64 => Scalar::F64(v),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::I8(v) => write!(f, "{v}"),
            Scalar::U8(v) => write!(f, "{v}"),
            Scalar::I16(v) => write!(f, "{v}"),
            Scalar::U16(v) => write!(f, "{v}"),
            Scalar::I32(v) => write!(f, "{v}"),
            Scalar::U32(v) => write!(f, "{v}"),
            Scalar::I64(v) => write!(f, "{v}"),
            Scalar::U64(v) => write!(f, "{v}"),
            Scalar::F32(v) => write!(f, "{v}"),
            Scalar::F64(v) => write!(f, "{v}"),
        }
    }
}

/// Rust primitives that map one-to-one onto a [`ScalarKind`].
pub trait ScalarType: Copy + Sized {
    /// The kind this primitive is stored as.
    const KIND: ScalarKind;

    /// Extract the primitive, converting from other numeric kinds.
    fn from_scalar(scalar: Scalar) -> Option<Self>;
}

macro_rules! scalar_type {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl ScalarType for $ty {
                const KIND: ScalarKind = ScalarKind::$variant;

                fn from_scalar(scalar: Scalar) -> Option<Self> {
                    match scalar.convert(ScalarKind::$variant)? {
                        Scalar::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Scalar {
                fn from(v: $ty) -> Self {
                    Scalar::$variant(v)
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Scalar(Scalar::$variant(v))
                }
            }
        )*
    };
}

scalar_type! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

/// A runtime value.
///
/// `Array` is a fixed-size native array read from a packed column,
/// `Collection` is a read-only sequence (a collection-typed member or a
/// loaded collection navigation), and `Record` is an anonymous object
/// built by a projection or captured from the caller's environment.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Primitive value.
    Scalar(Scalar),
    /// Single character.
    Char(char),
    /// UTF-8 string.
    String(String),
    /// Native fixed-size array.
    Array(Vec<Value>),
    /// Read-only collection.
    Collection(Vec<Value>),
    /// Materialized entity.
    Entity(Box<Entity>),
    /// Anonymous record of named values.
    Record(Vec<(String, Value)>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as a scalar.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Value::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    /// Try to get as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_scalar().and_then(|s| s.as_bool())
    }

    /// Try to get as a row key.
    pub fn as_key(&self) -> Option<i64> {
        self.as_scalar().and_then(|s| s.as_key())
    }

    /// Try to get as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as an entity reference.
    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Try to get the elements of an array or collection.
    pub fn elements(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::Collection(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a named field on an entity or record.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Entity(e) => e.get(name),
            Value::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Take a named field out of an owned entity or record.
    pub fn into_field(self, name: &str) -> Option<Value> {
        match self {
            Value::Entity(e) => e.into_field(name),
            Value::Record(fields) => fields.into_iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Short name of the value's variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Scalar(s) => s.kind().name(),
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Collection(_) => "collection",
            Value::Entity(_) => "entity",
            Value::Record(_) => "record",
        }
    }
}

impl From<Scalar> for Value {
    fn from(v: Scalar) -> Self {
        Value::Scalar(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Char(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Entity> for Value {
    fn from(v: Entity) -> Self {
        Value::Entity(Box::new(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
