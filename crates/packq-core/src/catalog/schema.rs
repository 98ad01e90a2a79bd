//! Schema bundle - versioned snapshot of the declared model.

use std::collections::HashMap;

use super::entity::EntityDef;
use super::field::TableSchema;
use super::relation::NavigationDef;
use crate::error::Error;
use rkyv::{Archive, Deserialize, Serialize};

/// A versioned snapshot of all declared entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct SchemaBundle {
    /// Schema version.
    pub version: u64,
    /// Entity definitions in declaration order.
    pub entities: Vec<EntityDef>,
}

impl SchemaBundle {
    /// Create an empty schema bundle.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            entities: Vec::new(),
        }
    }

    /// Add an entity to the schema.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    /// Get an entity definition by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Navigations from any entity that point at `target`.
    pub fn navigations_to(&self, target: &str) -> Vec<(&str, &NavigationDef)> {
        self.entities
            .iter()
            .flat_map(|e| e.navigations.iter().map(move |n| (e.name.as_str(), n)))
            .filter(|(_, n)| n.target == target)
            .collect()
    }

    /// Get all entity names.
    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.name.as_str()).collect()
    }

    /// Serialize the schema bundle to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a schema bundle from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Supplies the physical schema of a table by name.
pub trait TableSchemaResolver {
    fn resolve(&self, table: &str) -> Option<TableSchema>;
}

impl TableSchemaResolver for HashMap<String, TableSchema> {
    fn resolve(&self, table: &str) -> Option<TableSchema> {
        self.get(table).cloned()
    }
}

impl TableSchemaResolver for [TableSchema] {
    fn resolve(&self, table: &str) -> Option<TableSchema> {
        self.iter().find(|t| t.name == table).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CollectionShape, FieldSchema, MemberType};
    use packq_proto::ScalarKind;

    fn sample_schema() -> SchemaBundle {
        let parent = EntityDef::new("Parent", "Parent", "Id")
            .with_member("Id", MemberType::Scalar(ScalarKind::I32))
            .with_member("Level", MemberType::Scalar(ScalarKind::I32))
            .with_navigation(NavigationDef::dependents(
                "Kids",
                "Child",
                "ParentId",
                CollectionShape::ReadOnlyCollection,
            ));

        let child = EntityDef::new("Child", "Child", "Id")
            .with_member("Id", MemberType::Scalar(ScalarKind::I32))
            .with_member("ParentId", MemberType::Scalar(ScalarKind::I32))
            .with_navigation(NavigationDef::reference("Parent", "Parent", "ParentId"));

        SchemaBundle::new(1).with_entity(parent).with_entity(child)
    }

    #[test]
    fn test_schema_bundle_builder() {
        let schema = sample_schema();

        assert_eq!(schema.version, 1);
        assert_eq!(schema.entity_names(), vec!["Parent", "Child"]);
        assert!(schema.get_entity("Child").is_some());
        assert!(schema.get_entity("NonExistent").is_none());
    }

    #[test]
    fn test_navigations_to() {
        let schema = sample_schema();
        let to_parent = schema.navigations_to("Parent");
        assert_eq!(to_parent.len(), 1);
        assert_eq!(to_parent[0].0, "Child");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let schema = sample_schema();
        let bytes = schema.to_bytes().unwrap();
        let decoded = SchemaBundle::from_bytes(&bytes).unwrap();
        assert_eq!(schema, decoded);
    }

    #[test]
    fn test_slice_resolver() {
        let tables = vec![TableSchema::new("Parent").with_field(FieldSchema::id("Id", 0))];
        assert!(tables.as_slice().resolve("Parent").is_some());
        assert!(tables.as_slice().resolve("Child").is_none());
    }
}
