//! Value semantics shared by compiled closures and the in-memory evaluator.
//!
//! Every tier compares, converts and matches through these functions, which
//! is what keeps pushed-down and materialized execution in agreement.

use std::cmp::Ordering;

use crate::catalog::{CollectionShape, ElementType, MemberType};
use crate::error::Error;
use packq_proto::{BinaryOp, Expr, Scalar, ScalarKind, Value};

use super::dense_string::MatchKind;

/// Equality with numeric promotion. Null equals only null.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Scalar(a), Value::Scalar(b)) => a.compare(b) == Some(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Char(a), Value::Char(b)) => a == b,
        (Value::Entity(a), Value::Entity(b)) => a == b,
        (Value::Record(a), Value::Record(b)) => a == b,
        (Value::Array(a), Value::Array(b)) | (Value::Collection(a), Value::Collection(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        _ => false,
    }
}

/// Ordering with numeric promotion; strings compare ordinally.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Scalar(a), Value::Scalar(b)) => a.compare(b),
        (Value::String(a), Value::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Apply a comparison operator. Incomparable operands compare false,
/// except under `!=`.
pub(crate) fn compare(op: BinaryOp, a: &Value, b: &Value) -> bool {
    match op {
        BinaryOp::Equal => values_equal(a, b),
        BinaryOp::NotEqual => !values_equal(a, b),
        BinaryOp::LessThan => compare_values(a, b) == Some(Ordering::Less),
        BinaryOp::LessThanOrEqual => matches!(
            compare_values(a, b),
            Some(Ordering::Less | Ordering::Equal)
        ),
        BinaryOp::GreaterThan => compare_values(a, b) == Some(Ordering::Greater),
        BinaryOp::GreaterThanOrEqual => matches!(
            compare_values(a, b),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        _ => false,
    }
}

/// Convert a value to a primitive kind. Null stays null.
pub(crate) fn convert(value: Value, kind: ScalarKind) -> Result<Value, Error> {
    let scalar = match &value {
        Value::Null => return Ok(Value::Null),
        Value::Scalar(s) => *s,
        Value::Char(c) => Scalar::U32(u32::from(*c)),
        other => {
            return Err(Error::type_mismatch(format!(
                "cannot convert {} to {kind}",
                other.type_name()
            )))
        }
    };
    scalar.convert(kind).map(Value::Scalar).ok_or_else(|| {
        Error::type_mismatch(format!("cannot convert {} to {kind}", scalar.kind()))
    })
}

/// Interpret a value as a predicate result.
pub(crate) fn truthy(value: &Value) -> Result<bool, Error> {
    match value {
        Value::Scalar(Scalar::Bool(b)) => Ok(*b),
        other => Err(Error::type_mismatch(format!(
            "expected bool, found {}",
            other.type_name()
        ))),
    }
}

/// Arithmetic with C-style numeric promotion. Null operands yield null.
pub(crate) fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, Error> {
    match (a, b) {
        (Value::String(_), _) | (_, Value::String(_)) if op == BinaryOp::Add => {
            Ok(Value::String(format!("{}{}", text_of(a), text_of(b))))
        }
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Scalar(x), Value::Scalar(y)) if x.kind().is_numeric() && y.kind().is_numeric() => {
            let kind = promoted_kind(x.kind(), y.kind());
            if kind.is_float() {
                let (x, y) = (x.as_f64().unwrap_or_default(), y.as_f64().unwrap_or_default());
                let result = match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Subtract => x - y,
                    BinaryOp::Multiply => x * y,
                    BinaryOp::Divide => x / y,
                    BinaryOp::Modulo => x % y,
                    _ => return Err(Error::type_mismatch(format!("`{}` is not arithmetic", op.symbol()))),
                };
                return convert(Value::Scalar(Scalar::F64(result)), kind);
            }

            let (x, y) = (x.as_i128().unwrap_or_default(), y.as_i128().unwrap_or_default());
            let result = match op {
                BinaryOp::Add => x.wrapping_add(y),
                BinaryOp::Subtract => x.wrapping_sub(y),
                BinaryOp::Multiply => x.wrapping_mul(y),
                BinaryOp::Divide | BinaryOp::Modulo if y == 0 => {
                    return Err(Error::Arithmetic("division by zero".into()))
                }
                BinaryOp::Divide => x.wrapping_div(y),
                BinaryOp::Modulo => x.wrapping_rem(y),
                _ => return Err(Error::type_mismatch(format!("`{}` is not arithmetic", op.symbol()))),
            };
            convert(Value::Scalar(Scalar::I64(result as i64)), kind)
        }
        _ => Err(Error::type_mismatch(format!(
            "cannot apply `{}` to {} and {}",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn promoted_kind(a: ScalarKind, b: ScalarKind) -> ScalarKind {
    use ScalarKind::*;
    match (a, b) {
        (F64, _) | (_, F64) => F64,
        (F32, _) | (_, F32) => F32,
        (U64, U64) => U64,
        (I64 | U64, _) | (_, I64 | U64) => I64,
        (U32, U32) => U32,
        (U32, _) | (_, U32) => I64,
        _ => I32,
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Char(c) => c.to_string(),
        Value::Scalar(s) => s.to_string(),
        other => other.type_name().to_string(),
    }
}

/// Ordinal string match.
pub(crate) fn string_match(kind: MatchKind, haystack: &str, needle: &str) -> bool {
    match kind {
        MatchKind::Contains => haystack.contains(needle),
        MatchKind::StartsWith => haystack.starts_with(needle),
        MatchKind::EndsWith => haystack.ends_with(needle),
    }
}

/// Text of a string or char needle.
pub(crate) fn needle_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Char(c) => Some(c.to_string()),
        _ => None,
    }
}

/// Evaluate literals, captured variables and conversions of them.
pub(crate) fn fold_constant(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Constant(value) => Some(value.clone()),
        Expr::Member { target, member } => fold_constant(target)?.into_field(member),
        Expr::Convert { operand, kind } => convert(fold_constant(operand)?, *kind).ok(),
        _ => None,
    }
}

/// The value a member takes when there is nothing to read it from.
pub(crate) fn default_value(member_type: &MemberType) -> Value {
    match member_type.scalar_kind() {
        Some(kind) => Value::Scalar(kind.default_value()),
        None => Value::Null,
    }
}

/// Whether an array member can be produced by a row-level read.
///
/// Primitive elements can. Enum and string elements declared as native
/// arrays cannot, and the caller falls back. String elements declared
/// through a collection interface can never be produced soundly.
pub(crate) fn row_array_supported(
    member: &str,
    element: ElementType,
    shape: CollectionShape,
) -> Result<bool, Error> {
    match element {
        ElementType::Scalar(_) => Ok(true),
        ElementType::Enum(_) => Ok(false),
        ElementType::String if shape == CollectionShape::Array => Ok(false),
        ElementType::String => Err(Error::StringArrayCollection {
            member: member.to_string(),
        }),
    }
}

/// Wrap a native array read in the member's declared shape.
pub(crate) fn shape_collection(value: Value, shape: CollectionShape) -> Value {
    match (value, shape) {
        (Value::Array(items), CollectionShape::ReadOnlyCollection | CollectionShape::List) => {
            Value::Collection(items)
        }
        (value, _) => value,
    }
}

/// Split a predicate body on top-level `&&`.
pub(crate) fn split_conjuncts(expr: &Expr) -> Vec<&Expr> {
    let mut out = Vec::new();
    collect_conjuncts(expr, &mut out);
    out
}

fn collect_conjuncts<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::Binary {
            op: BinaryOp::AndAlso,
            left,
            right,
        } => {
            collect_conjuncts(left, out);
            collect_conjuncts(right, out);
        }
        other => out.push(other),
    }
}
