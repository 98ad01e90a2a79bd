//! Resolved, immutable model catalog.

use std::collections::HashMap;
use std::sync::Arc;

use super::entity::EntityType;
use super::relation::{JoinKind, KeyRef, NavigationDef, NavigationJoinPlan, NavigationKind};
use super::schema::{SchemaBundle, TableSchemaResolver};
use super::types::{ElementType, MemberType};
use crate::error::Error;
use tracing::debug;

/// Entity types bound to their tables, with a join plan per navigation.
///
/// Built once from a [`SchemaBundle`]; every lookup afterwards is read-only.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    version: u64,
    entities: HashMap<String, Arc<EntityType>>,
    joins: HashMap<(String, String), Arc<NavigationJoinPlan>>,
}

impl Catalog {
    /// Resolve a schema bundle against physical table schemas.
    pub fn build<R>(bundle: &SchemaBundle, resolver: &R) -> Result<Self, Error>
    where
        R: TableSchemaResolver + ?Sized,
    {
        let mut entities = HashMap::with_capacity(bundle.entities.len());

        for def in &bundle.entities {
            if entities.contains_key(&def.name) {
                return Err(Error::Schema(format!(
                    "entity `{}` is declared more than once",
                    def.name
                )));
            }

            let schema = resolver.resolve(&def.table).ok_or_else(|| {
                Error::Schema(format!(
                    "table `{}` of entity `{}` cannot be resolved",
                    def.table, def.name
                ))
            })?;

            for member in &def.members {
                let field = schema.field(&member.name).ok_or_else(|| {
                    Error::Schema(format!(
                        "member `{}.{}` has no field in table `{}`",
                        def.name, member.name, def.table
                    ))
                })?;
                if !member.member_type.accepts(field.kind, field.element_count) {
                    return Err(Error::Schema(format!(
                        "member `{}.{}` is declared as {:?} but its field holds {:?} x{}",
                        def.name, member.name, member.member_type, field.kind, field.element_count
                    )));
                }
                if def.navigations.iter().any(|n| n.name == member.name) {
                    return Err(Error::Schema(format!(
                        "`{}.{}` is declared as both a member and a navigation",
                        def.name, member.name
                    )));
                }
            }

            let entity = EntityType {
                name: def.name.clone(),
                table: def.table.clone(),
                schema: Arc::new(schema),
                primary_key: def.primary_key.clone(),
                members: def.members.clone(),
                navigations: def.navigations.clone(),
            };
            key_ref(&entity, &def.primary_key)?;
            entities.insert(def.name.clone(), Arc::new(entity));
        }

        let mut joins = HashMap::new();
        for root in entities.values() {
            for navigation in &root.navigations {
                let target = entities.get(&navigation.target).ok_or_else(|| {
                    Error::Schema(format!(
                        "navigation `{}.{}` targets unknown entity `{}`",
                        root.name, navigation.name, navigation.target
                    ))
                })?;
                let plan = join_plan(root, target, navigation)?;
                joins.insert(
                    (root.name.clone(), navigation.name.clone()),
                    Arc::new(plan),
                );
            }
        }

        debug!(
            version = bundle.version,
            entities = entities.len(),
            navigations = joins.len(),
            "catalog built"
        );

        Ok(Self {
            version: bundle.version,
            entities,
            joins,
        })
    }

    /// Schema version the catalog was built from.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Get an entity type by name.
    pub fn get_entity(&self, name: &str) -> Option<&Arc<EntityType>> {
        self.entities.get(name)
    }

    /// Get an entity type by name, failing for unknown names.
    pub fn entity(&self, name: &str) -> Result<&Arc<EntityType>, Error> {
        self.get_entity(name)
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    /// Get the join plan of a navigation.
    pub fn join_plan(&self, entity: &str, navigation: &str) -> Option<&Arc<NavigationJoinPlan>> {
        self.joins
            .get(&(entity.to_string(), navigation.to_string()))
    }

    /// Iterate over all entity types.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.entities.values()
    }
}

/// Resolve a scalar integer member usable as a key.
fn key_ref(entity: &EntityType, member: &str) -> Result<KeyRef, Error> {
    let (def, field) = entity.member_field(member).ok_or_else(|| {
        Error::Schema(format!(
            "key member `{}.{}` is not declared",
            entity.name, member
        ))
    })?;
    match def.member_type.scalar_kind() {
        Some(kind) if kind.is_integer() => Ok(KeyRef {
            member: member.to_string(),
            field: field.clone(),
        }),
        _ => Err(Error::Schema(format!(
            "key member `{}.{}` must be an integer",
            entity.name, member
        ))),
    }
}

fn key_array_ref(entity: &EntityType, member: &str) -> Result<KeyRef, Error> {
    let (def, field) = entity.member_field(member).ok_or_else(|| {
        Error::Schema(format!(
            "key array member `{}.{}` is not declared",
            entity.name, member
        ))
    })?;
    match def.member_type {
        MemberType::Array {
            element: ElementType::Scalar(kind) | ElementType::Enum(kind),
            ..
        } if kind.is_integer() => Ok(KeyRef {
            member: member.to_string(),
            field: field.clone(),
        }),
        _ => Err(Error::Schema(format!(
            "key array member `{}.{}` must be an array of integers",
            entity.name, member
        ))),
    }
}

fn join_plan(
    root: &Arc<EntityType>,
    target: &Arc<EntityType>,
    navigation: &NavigationDef,
) -> Result<NavigationJoinPlan, Error> {
    let (kind, root_key, target_key) = match &navigation.kind {
        NavigationKind::ForeignKey { foreign_key } => (
            JoinKind::ForeignKeyToPrimaryKey,
            key_ref(root, foreign_key)?,
            key_ref(target, &target.primary_key)?,
        ),
        NavigationKind::SharedPrimaryKey => (
            JoinKind::SharedPrimaryKeyOneToOne,
            key_ref(root, &root.primary_key)?,
            key_ref(target, &target.primary_key)?,
        ),
        NavigationKind::ForeignKeyArray { keys, .. } => (
            JoinKind::ForeignKeyArrayToPrimaryKey,
            key_array_ref(root, keys)?,
            key_ref(target, &target.primary_key)?,
        ),
        NavigationKind::Dependent { foreign_key, .. } => (
            JoinKind::DependentForeignKeyToPrimaryKey,
            key_ref(root, &root.primary_key)?,
            key_ref(target, foreign_key)?,
        ),
    };

    Ok(NavigationJoinPlan {
        kind,
        navigation: navigation.name.clone(),
        root: Arc::clone(root),
        target: Arc::clone(target),
        root_key,
        target_key,
        shape: navigation.shape(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CollectionShape, EntityDef, FieldSchema, TableSchema};
    use packq_proto::ScalarKind;

    fn tables() -> HashMap<String, TableSchema> {
        let parent = TableSchema::new("Parent")
            .with_field(FieldSchema::id("Id", 0))
            .with_field(FieldSchema::scalar("Level", ScalarKind::I32, 1))
            .with_field(FieldSchema::scalar("ChildIds", ScalarKind::U32, 2).with_elements(3));
        let child = TableSchema::new("Child")
            .with_field(FieldSchema::id("Id", 0))
            .with_field(FieldSchema::scalar("ParentId", ScalarKind::U32, 1).references("Parent"));
        [parent, child]
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect()
    }

    fn bundle() -> SchemaBundle {
        SchemaBundle::new(3)
            .with_entity(
                EntityDef::new("Parent", "Parent", "Id")
                    .with_member("Id", MemberType::Scalar(ScalarKind::I32))
                    .with_member("Level", MemberType::Scalar(ScalarKind::I32))
                    .with_member(
                        "ChildIds",
                        MemberType::Array {
                            element: ElementType::Scalar(ScalarKind::U32),
                            shape: CollectionShape::Array,
                        },
                    )
                    .with_navigation(NavigationDef::key_array(
                        "Children",
                        "Child",
                        "ChildIds",
                        CollectionShape::ReadOnlyCollection,
                    ))
                    .with_navigation(NavigationDef::dependents(
                        "Kids",
                        "Child",
                        "ParentId",
                        CollectionShape::ReadOnlyCollection,
                    )),
            )
            .with_entity(
                EntityDef::new("Child", "Child", "Id")
                    .with_member("Id", MemberType::Scalar(ScalarKind::I32))
                    .with_member("ParentId", MemberType::Scalar(ScalarKind::I32))
                    .with_navigation(NavigationDef::reference("Parent", "Parent", "ParentId")),
            )
    }

    #[test]
    fn test_join_plans_derived() {
        let catalog = Catalog::build(&bundle(), &tables()).unwrap();
        assert_eq!(catalog.version(), 3);

        let parent = catalog.join_plan("Child", "Parent").unwrap();
        assert_eq!(parent.kind, JoinKind::ForeignKeyToPrimaryKey);
        assert_eq!(parent.root_key.member, "ParentId");
        assert_eq!(parent.target_key.member, "Id");
        assert!(!parent.is_collection());

        let children = catalog.join_plan("Parent", "Children").unwrap();
        assert_eq!(children.kind, JoinKind::ForeignKeyArrayToPrimaryKey);
        assert_eq!(children.root_key.field.element_count, 3);

        let kids = catalog.join_plan("Parent", "Kids").unwrap();
        assert_eq!(kids.kind, JoinKind::DependentForeignKeyToPrimaryKey);
        assert_eq!(kids.target_key.member, "ParentId");
        assert_eq!(kids.qualified_name(), "Parent.Kids");
    }

    #[test]
    fn test_unknown_entity() {
        let catalog = Catalog::build(&bundle(), &tables()).unwrap();
        assert!(matches!(catalog.entity("Nope"), Err(Error::UnknownEntity(_))));
    }

    #[test]
    fn test_unresolved_table_fails() {
        let bundle = SchemaBundle::new(1).with_entity(EntityDef::new("Ghost", "Ghost", "Id"));
        let err = Catalog::build(&bundle, &tables()).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_member_kind_mismatch_fails() {
        let bundle = SchemaBundle::new(1).with_entity(
            EntityDef::new("Child", "Child", "Id")
                .with_member("Id", MemberType::Scalar(ScalarKind::I32))
                .with_member("ParentId", MemberType::String),
        );
        assert!(matches!(
            Catalog::build(&bundle, &tables()),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn test_navigation_to_unknown_target_fails() {
        let bundle = SchemaBundle::new(1).with_entity(
            EntityDef::new("Child", "Child", "Id")
                .with_member("Id", MemberType::Scalar(ScalarKind::I32))
                .with_member("ParentId", MemberType::Scalar(ScalarKind::I32))
                .with_navigation(NavigationDef::reference("Parent", "Parent", "ParentId")),
        );
        assert!(matches!(
            Catalog::build(&bundle, &tables()),
            Err(Error::Schema(_))
        ));
    }
}
