//! Entity definitions.

use std::sync::Arc;

use super::field::{FieldSchema, TableSchema};
use super::relation::NavigationDef;
use super::types::MemberType;
use rkyv::{Archive, Deserialize, Serialize};

/// A declared data member of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct MemberDef {
    /// Member name; also the name of the backing field.
    pub name: String,
    /// Declared type.
    pub member_type: MemberType,
}

/// A declared entity type, before it is bound to a table schema.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name (unique within the bundle).
    pub name: String,
    /// Backing table name.
    pub table: String,
    /// Primary key member name.
    pub primary_key: String,
    /// Data members.
    pub members: Vec<MemberDef>,
    /// Navigation members.
    pub navigations: Vec<NavigationDef>,
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: primary_key.into(),
            members: Vec::new(),
            navigations: Vec::new(),
        }
    }

    /// Add a data member.
    pub fn with_member(mut self, name: impl Into<String>, member_type: MemberType) -> Self {
        self.members.push(MemberDef {
            name: name.into(),
            member_type,
        });
        self
    }

    /// Add a navigation member.
    pub fn with_navigation(mut self, navigation: NavigationDef) -> Self {
        self.navigations.push(navigation);
        self
    }
}

/// An entity type bound to its table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    pub name: String,
    pub table: String,
    pub schema: Arc<TableSchema>,
    pub primary_key: String,
    pub members: Vec<MemberDef>,
    pub navigations: Vec<NavigationDef>,
}

impl EntityType {
    /// Look up a data member.
    pub fn member(&self, name: &str) -> Option<&MemberDef> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Look up the field backing a data member.
    pub fn field(&self, member: &str) -> Option<&FieldSchema> {
        self.member(member)?;
        self.schema.field(member)
    }

    /// Look up a data member together with its field.
    pub fn member_field(&self, member: &str) -> Option<(&MemberDef, &FieldSchema)> {
        Some((self.member(member)?, self.schema.field(member)?))
    }

    /// Look up a navigation member.
    pub fn navigation(&self, name: &str) -> Option<&NavigationDef> {
        self.navigations.iter().find(|n| n.name == name)
    }

    /// Field backing the primary key.
    pub fn primary_key_field(&self) -> Option<&FieldSchema> {
        self.schema.field(&self.primary_key)
    }
}
