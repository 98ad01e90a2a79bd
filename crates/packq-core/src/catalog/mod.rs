//! Semantic catalog for PackQ.
//!
//! The catalog binds declared entity types to the physical schemas of their
//! tables and derives how each navigation joins two tables.

mod catalog;
mod entity;
mod field;
mod relation;
mod schema;
mod types;

pub use catalog::Catalog;
pub use entity::{EntityDef, EntityType, MemberDef};
pub use field::{FieldFlags, FieldSchema, TableSchema};
pub use relation::{JoinKind, KeyRef, NavigationDef, NavigationJoinPlan, NavigationKind};
pub use schema::{SchemaBundle, TableSchemaResolver};
pub use types::{CollectionShape, ElementType, MemberType, ValueKind};
