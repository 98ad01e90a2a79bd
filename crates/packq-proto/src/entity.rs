//! Materialized entity instances.

use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::value::Value;

/// An entity instance: the name of its type plus named member values.
///
/// Members keep the order in which they were set, which is the declaration
/// order of the entity type when built by the materializer.
#[derive(Debug, Clone, Default, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct Entity {
    /// Entity type name.
    pub entity: String,
    /// Member values.
    pub fields: Vec<(String, Value)>,
}

impl Entity {
    /// Create an empty instance of an entity type.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            fields: Vec::new(),
        }
    }

    /// Set a member value (builder style).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Get a member value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Get a mutable member value.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Set a member value, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.get_mut(&name) {
            Some(slot) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Check whether a member has been set.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    /// Consume the entity and take one member value out.
    pub fn into_field(self, name: &str) -> Option<Value> {
        self.fields
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces() {
        let mut e = Entity::new("Item").with("Id", 1).with("Name", "sword");
        e.set("Name", "shield");
        assert_eq!(e.fields.len(), 2);
        assert_eq!(e.get("Name"), Some(&Value::from("shield")));
        assert!(e.contains("Id"));
        assert!(!e.contains("Level"));
    }

    #[test]
    fn test_into_field() {
        let e = Entity::new("Item").with("Id", 7);
        assert_eq!(e.into_field("Id"), Some(Value::from(7)));
    }
}
