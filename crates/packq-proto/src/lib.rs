//! PackQ query expressions and runtime values.
//!
//! This crate defines the data that flows into and out of the PackQ engine:
//! the expression tree a caller builds to describe a query, and the values
//! the engine produces when it runs one.
//!
//! # Modules
//!
//! - [`value`] - Scalars, scalar kinds and runtime values
//! - [`entity`] - Materialized entity instances
//! - [`expr`] - Expression tree nodes, operators and methods
//! - [`query`] - Fluent builder for query pipelines
//! - [`error`] - Protocol error types
//!
//! # Serialization
//!
//! [`ScalarKind`] and [`Scalar`] derive `rkyv::Archive` so schema bundles
//! can embed them. Expression trees and values derive serde and can be
//! carried as JSON:
//!
//! ```
//! use packq_proto::{Expr, Query};
//!
//! let query = Query::source("Creature").count().into_expr();
//! let json = query.to_json().unwrap();
//! assert_eq!(Expr::from_json(&json).unwrap(), query);
//! ```

pub mod entity;
pub mod error;
pub mod expr;
pub mod query;
pub mod value;

pub use entity::Entity;
pub use error::Error;
pub use expr::{BinaryOp, Expr, Method};
pub use query::Query;
pub use value::{Scalar, ScalarKind, ScalarType, Value};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_kind_roundtrip() {
        let kind = ScalarKind::U16;
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&kind).unwrap();
        let archived =
            rkyv::access::<value::ArchivedScalarKind, rkyv::rancor::Error>(&bytes).unwrap();
        let deserialized: ScalarKind =
            rkyv::deserialize::<ScalarKind, rkyv::rancor::Error>(archived).unwrap();
        assert_eq!(kind, deserialized);
    }

    #[test]
    fn test_value_json_roundtrip() {
        let value = Value::from(Entity::new("Item").with("Id", 3).with("Tags", "a"));
        let json = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, back);
    }
}
