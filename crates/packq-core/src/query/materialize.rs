//! Entity materialization and lazy navigation loading.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::catalog::{
    Catalog, ElementType, EntityType, FieldSchema, JoinKind, MemberDef, MemberType,
    NavigationJoinPlan,
};
use crate::error::Error;
use crate::storage::{Db2File, Db2FileExt, ReadKind, RowHandle, TableSet};
use packq_proto::{Entity, Value};
use tracing::debug;

use super::ops;

/// Creates empty entity instances for materialization.
pub trait EntityFactory: Send + Sync {
    fn create(&self, entity_type: &EntityType) -> Entity;
}

/// Creates plain [`Entity`] records.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEntityFactory;

impl EntityFactory for DefaultEntityFactory {
    fn create(&self, entity_type: &EntityType) -> Entity {
        Entity::new(entity_type.name.clone())
    }
}

/// Read one declared member of a row.
///
/// Unlike row compilation this reads every member shape, including virtual
/// strings and string arrays, which the table resolves itself.
pub(crate) fn read_member(
    table: &dyn Db2File,
    row: RowHandle,
    member: &MemberDef,
    field: &FieldSchema,
) -> Result<Value, Error> {
    let column = field.column_index();
    match member.member_type {
        MemberType::Scalar(kind) | MemberType::Enum { underlying: kind } => {
            if field.flags.is_id {
                ops::convert(Value::from(row.id()), kind)
            } else {
                table.read_field(row, column, ReadKind::Scalar(kind))
            }
        }
        MemberType::String => table.read_field(row, column, ReadKind::String),
        MemberType::Array { element, shape } => {
            let len = field.element_count;
            let kind = match element {
                ElementType::Scalar(kind) | ElementType::Enum(kind) => {
                    ReadKind::Array { element: kind, len }
                }
                ElementType::String => ReadKind::StringArray { len },
            };
            Ok(ops::shape_collection(table.read_field(row, column, kind)?, shape))
        }
    }
}

/// Builds entities of one type from its table rows.
pub struct Materializer<'a> {
    entity: &'a EntityType,
    table: &'a dyn Db2File,
    factory: &'a dyn EntityFactory,
}

impl<'a> Materializer<'a> {
    pub fn new(entity: &'a EntityType, table: &'a dyn Db2File, factory: &'a dyn EntityFactory) -> Self {
        Self {
            entity,
            table,
            factory,
        }
    }

    /// Materialize one row with every declared member populated.
    pub fn materialize(&self, row: RowHandle) -> Result<Entity, Error> {
        let mut entity = self.factory.create(self.entity);
        for member in &self.entity.members {
            let field = self.entity.schema.field(&member.name).ok_or_else(|| {
                Error::UnknownMember {
                    entity: self.entity.name.clone(),
                    member: member.name.clone(),
                }
            })?;
            entity.set(member.name.clone(), read_member(self.table, row, member, field)?);
        }
        Ok(entity)
    }
}

/// Loads navigation values of entities that were materialized without them.
pub trait NavigationSource {
    /// Value of `navigation` on `entity`, or `None` if it is not a navigation.
    fn resolve(&self, entity: &Entity, navigation: &str) -> Result<Option<Value>, Error>;
}

type KeyIndex = Rc<HashMap<i64, RowHandle>>;
type DependentIndex = Rc<HashMap<i64, Vec<RowHandle>>>;

/// Resolves navigations on demand for one query execution.
///
/// Key lookups use the table's row id lookup when the primary key is the id
/// field. Otherwise, and for dependent collections, an index over the
/// target table is built the first time it is needed and kept for the rest
/// of the execution.
pub struct NavigationResolver<'a> {
    catalog: &'a Catalog,
    tables: &'a TableSet,
    factory: &'a dyn EntityFactory,
    key_indexes: RefCell<HashMap<String, KeyIndex>>,
    dependent_indexes: RefCell<HashMap<(String, String), DependentIndex>>,
}

impl<'a> NavigationResolver<'a> {
    pub fn new(catalog: &'a Catalog, tables: &'a TableSet, factory: &'a dyn EntityFactory) -> Self {
        Self {
            catalog,
            tables,
            factory,
            key_indexes: RefCell::new(HashMap::new()),
            dependent_indexes: RefCell::new(HashMap::new()),
        }
    }

    fn find(&self, target: &EntityType, key: i64) -> Result<Option<RowHandle>, Error> {
        let table = self.tables.get(&target.table)?;
        let pk = target.primary_key_field().ok_or_else(|| Error::UnknownMember {
            entity: target.name.clone(),
            member: target.primary_key.clone(),
        })?;
        if pk.flags.is_id {
            return match table.try_get_row_handle(key) {
                Err(Error::IdOutOfRange(_)) => Ok(None),
                other => other,
            };
        }
        Ok(self.key_index(target, table.as_ref(), pk)?.get(&key).copied())
    }

    fn key_index(
        &self,
        target: &EntityType,
        table: &dyn Db2File,
        pk: &FieldSchema,
    ) -> Result<KeyIndex, Error> {
        if let Some(index) = self.key_indexes.borrow().get(&target.name) {
            return Ok(Rc::clone(index));
        }
        let mut index = HashMap::with_capacity(table.records_count());
        for row in table.rows() {
            if let Some(key) = table.read_key(row, pk)? {
                index.entry(key).or_insert(row);
            }
        }
        debug!(entity = %target.name, keys = index.len(), "navigation key index built");
        let index = Rc::new(index);
        self.key_indexes
            .borrow_mut()
            .insert(target.name.clone(), Rc::clone(&index));
        Ok(index)
    }

    fn dependent_index(&self, join: &NavigationJoinPlan) -> Result<DependentIndex, Error> {
        let cache_key = (join.target.name.clone(), join.target_key.member.clone());
        if let Some(index) = self.dependent_indexes.borrow().get(&cache_key) {
            return Ok(Rc::clone(index));
        }
        let table = self.tables.get(&join.target.table)?;
        let mut index: HashMap<i64, Vec<RowHandle>> = HashMap::new();
        for row in table.rows() {
            match table.read_key(row, &join.target_key.field)? {
                Some(key) if key != 0 => index.entry(key).or_default().push(row),
                _ => {}
            }
        }
        debug!(
            navigation = %join.qualified_name(),
            principals = index.len(),
            "dependent index built"
        );
        let index = Rc::new(index);
        self.dependent_indexes
            .borrow_mut()
            .insert(cache_key, Rc::clone(&index));
        Ok(index)
    }

    fn load(&self, target: &EntityType, row: RowHandle) -> Result<Value, Error> {
        let table = self.tables.get(&target.table)?;
        let entity = Materializer::new(target, table.as_ref(), self.factory).materialize(row)?;
        Ok(Value::from(entity))
    }

    fn load_key(&self, target: &EntityType, key: Option<i64>) -> Result<Value, Error> {
        match key {
            Some(key) if key != 0 => match self.find(target, key)? {
                Some(row) => self.load(target, row),
                None => Ok(Value::Null),
            },
            _ => Ok(Value::Null),
        }
    }

    fn resolve_join(&self, entity: &Entity, join: &Arc<NavigationJoinPlan>) -> Result<Value, Error> {
        let key_of = |member: &str| entity.get(member).and_then(Value::as_key);
        let target = join.target.as_ref();
        match join.kind {
            JoinKind::ForeignKeyToPrimaryKey | JoinKind::SharedPrimaryKeyOneToOne => {
                self.load_key(target, key_of(&join.root_key.member))
            }
            JoinKind::ForeignKeyArrayToPrimaryKey => {
                let keys = entity
                    .get(&join.root_key.member)
                    .and_then(Value::elements)
                    .unwrap_or_default();
                let mut items = Vec::with_capacity(keys.len());
                for key in keys.iter().filter_map(Value::as_key).filter(|k| *k != 0) {
                    if let Some(row) = self.find(target, key)? {
                        items.push(self.load(target, row)?);
                    }
                }
                Ok(shape_navigation(items, join))
            }
            JoinKind::DependentForeignKeyToPrimaryKey => {
                let index = self.dependent_index(join)?;
                let rows = key_of(&join.root_key.member)
                    .and_then(|key| index.get(&key))
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let items = rows
                    .iter()
                    .map(|row| self.load(target, *row))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(shape_navigation(items, join))
            }
        }
    }
}

impl NavigationSource for NavigationResolver<'_> {
    fn resolve(&self, entity: &Entity, navigation: &str) -> Result<Option<Value>, Error> {
        let Some(join) = self.catalog.join_plan(&entity.entity, navigation) else {
            return Ok(None);
        };
        self.resolve_join(entity, join).map(Some)
    }
}

/// Wrap loaded navigation items in the navigation's declared shape.
pub(crate) fn shape_navigation(items: Vec<Value>, join: &NavigationJoinPlan) -> Value {
    match join.shape {
        Some(shape) => ops::shape_collection(Value::Array(items), shape),
        None => Value::Collection(items),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::Fixture;

    fn parent(fixture: &Fixture, id: i64) -> Entity {
        let entity = fixture.catalog.entity("Parent").unwrap();
        let table = fixture.table_of("Parent");
        let row = table.try_get_row_handle(id).unwrap().unwrap();
        Materializer::new(entity, table.as_ref(), &DefaultEntityFactory)
            .materialize(row)
            .unwrap()
    }

    fn ids(value: &Value) -> Vec<i64> {
        value
            .elements()
            .unwrap()
            .iter()
            .map(|v| v.field("Id").and_then(Value::as_key).unwrap())
            .collect()
    }

    #[test]
    fn test_materialize_reads_every_member() {
        let fixture = Fixture::new();
        let parent = parent(&fixture, 1);
        assert_eq!(parent.entity, "Parent");
        assert_eq!(parent.get("Id"), Some(&Value::from(1)));
        assert_eq!(parent.get("Name"), Some(&Value::from("p1")));
        assert!(matches!(parent.get("Scores"), Some(Value::Collection(_))));
        assert!(matches!(parent.get("ChildIds"), Some(Value::Array(_))));
        assert!(matches!(parent.get("Mottos"), Some(Value::Collection(items)) if items.len() == 2));
        assert!(!parent.contains("Kids"));
    }

    #[test]
    fn test_materialize_reads_virtual_strings() {
        let fixture = Fixture::new();
        let entity = fixture.catalog.entity("Child").unwrap();
        let table = fixture.table_of("Child");
        let row = table.try_get_row_handle(100).unwrap().unwrap();
        let child = Materializer::new(entity, table.as_ref(), &DefaultEntityFactory)
            .materialize(row)
            .unwrap();
        assert_eq!(child.get("Title"), Some(&Value::from("Dr. alpha")));
    }

    #[test]
    fn test_resolve_reference_navigations() {
        let fixture = Fixture::new();
        let resolver = NavigationResolver::new(&fixture.catalog, &fixture.tables, &DefaultEntityFactory);
        let child = |parent_id: i32| Entity::new("Child").with("Id", 1).with("ParentId", parent_id);

        let found = resolver.resolve(&child(2), "Parent").unwrap().unwrap();
        assert_eq!(found.field("Level"), Some(&Value::from(5)));
        assert_eq!(resolver.resolve(&child(0), "Parent").unwrap(), Some(Value::Null));
        assert_eq!(resolver.resolve(&child(7), "Parent").unwrap(), Some(Value::Null));
        assert_eq!(resolver.resolve(&child(1), "Name").unwrap(), None);
    }

    #[test]
    fn test_resolve_collections() {
        let fixture = Fixture::new();
        let resolver = NavigationResolver::new(&fixture.catalog, &fixture.tables, &DefaultEntityFactory);
        let one = parent(&fixture, 1);
        let two = parent(&fixture, 2);

        let children = resolver.resolve(&one, "Children").unwrap().unwrap();
        assert_eq!(ids(&children), vec![100]);
        let children = resolver.resolve(&two, "Children").unwrap().unwrap();
        assert_eq!(ids(&children), vec![101, 102]);

        let kids = resolver.resolve(&two, "Kids").unwrap().unwrap();
        assert!(matches!(kids, Value::Collection(_)));
        assert_eq!(ids(&kids), vec![101]);

        let extra = resolver.resolve(&two, "Extra").unwrap().unwrap();
        assert_eq!(extra, Value::Null);
    }

    #[test]
    fn test_custom_factory_is_used() {
        struct Tagged;
        impl EntityFactory for Tagged {
            fn create(&self, entity_type: &EntityType) -> Entity {
                Entity::new(entity_type.name.clone()).with("Tag", "custom")
            }
        }
        let fixture = Fixture::new();
        let entity = fixture.catalog.entity("Child").unwrap();
        let table = fixture.table_of("Child");
        let row = table.rows().next().unwrap();
        let child = Materializer::new(entity, table.as_ref(), &Tagged)
            .materialize(row)
            .unwrap();
        assert_eq!(child.get("Tag"), Some(&Value::from("custom")));
    }
}
