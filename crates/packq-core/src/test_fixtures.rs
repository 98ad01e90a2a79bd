//! Shared in-memory catalog for unit tests.
//!
//! - `Parent`: levels 1 and 5, key array `ChildIds`, dependents `Kids`,
//!   key array navigation `Children`, shared-key `Extra`.
//! - `Child`: rows 100..=103; 102 has no parent and 103 points at a
//!   missing one. `Title` is a virtual string.
//! - `ParentExtra`: only parent 1 has one.
//! - `Toy`: reaches its owner through a virtual foreign key.

use std::sync::Arc;

use crate::catalog::{
    Catalog, CollectionShape, ElementType, EntityDef, FieldSchema, MemberType, NavigationDef,
    SchemaBundle, TableSchema,
};
use crate::config::EngineConfig;
use crate::query::{DenseStringCacheRegistry, RowCompiler};
use crate::storage::{Db2File, MemoryTable, TableSet};
use packq_proto::{ScalarKind, Value};

pub(crate) struct Fixture {
    pub catalog: Arc<Catalog>,
    pub tables: Arc<TableSet>,
    pub config: EngineConfig,
    pub strings: DenseStringCacheRegistry,
}

fn strings(items: &[&str]) -> Value {
    Value::Array(items.iter().map(|s| Value::from(*s)).collect())
}

fn parent_schema() -> TableSchema {
    TableSchema::new("Parent")
        .with_field(FieldSchema::id("Id", 0))
        .with_field(FieldSchema::scalar("Level", ScalarKind::I32, 1))
        .with_field(FieldSchema::string("Name", 2))
        .with_field(
            FieldSchema::scalar("ChildIds", ScalarKind::U32, 3)
                .with_elements(3)
                .references("Child"),
        )
        .with_field(FieldSchema::scalar("Scores", ScalarKind::I32, 4).with_elements(2))
        .with_field(FieldSchema::string("Aliases", 5).with_elements(2))
        .with_field(FieldSchema::string("Mottos", 6).with_elements(2))
}

fn child_schema() -> TableSchema {
    TableSchema::new("Child")
        .with_field(FieldSchema::id("Id", 0))
        .with_field(FieldSchema::string("Name", 1))
        .with_field(FieldSchema::string("Title", 2).derived())
        .with_field(FieldSchema::scalar("ParentId", ScalarKind::I32, 3).references("Parent"))
}

fn extra_schema() -> TableSchema {
    TableSchema::new("ParentExtra")
        .with_field(FieldSchema::id("Id", 0))
        .with_field(FieldSchema::string("Motto", 1))
}

fn toy_schema() -> TableSchema {
    TableSchema::new("Toy")
        .with_field(FieldSchema::id("Id", 0))
        .with_field(FieldSchema::scalar("OwnerId", ScalarKind::I32, 1).derived())
        .with_field(FieldSchema::scalar("ChildId", ScalarKind::I32, 2).references("Child"))
}

pub(crate) fn bundle() -> SchemaBundle {
    SchemaBundle::new(1)
        .with_entity(
            EntityDef::new("Parent", "Parent", "Id")
                .with_member("Id", MemberType::Scalar(ScalarKind::I32))
                .with_member("Level", MemberType::Scalar(ScalarKind::I32))
                .with_member("Name", MemberType::String)
                .with_member(
                    "ChildIds",
                    MemberType::Array {
                        element: ElementType::Scalar(ScalarKind::U32),
                        shape: CollectionShape::Array,
                    },
                )
                .with_member(
                    "Scores",
                    MemberType::Array {
                        element: ElementType::Scalar(ScalarKind::I32),
                        shape: CollectionShape::ReadOnlyCollection,
                    },
                )
                .with_member(
                    "Aliases",
                    MemberType::Array {
                        element: ElementType::String,
                        shape: CollectionShape::Array,
                    },
                )
                .with_member(
                    "Mottos",
                    MemberType::Array {
                        element: ElementType::String,
                        shape: CollectionShape::ReadOnlyCollection,
                    },
                )
                .with_navigation(NavigationDef::dependents(
                    "Kids",
                    "Child",
                    "ParentId",
                    CollectionShape::ReadOnlyCollection,
                ))
                .with_navigation(NavigationDef::key_array(
                    "Children",
                    "Child",
                    "ChildIds",
                    CollectionShape::ReadOnlyCollection,
                ))
                .with_navigation(NavigationDef::shared_primary_key("Extra", "ParentExtra")),
        )
        .with_entity(
            EntityDef::new("Child", "Child", "Id")
                .with_member("Id", MemberType::Scalar(ScalarKind::I32))
                .with_member("Name", MemberType::String)
                .with_member("Title", MemberType::String)
                .with_member("ParentId", MemberType::Scalar(ScalarKind::I32))
                .with_navigation(NavigationDef::reference("Parent", "Parent", "ParentId"))
                .with_navigation(NavigationDef::dependents(
                    "Toys",
                    "Toy",
                    "ChildId",
                    CollectionShape::List,
                )),
        )
        .with_entity(
            EntityDef::new("ParentExtra", "ParentExtra", "Id")
                .with_member("Id", MemberType::Scalar(ScalarKind::I32))
                .with_member("Motto", MemberType::String)
                .with_navigation(NavigationDef::shared_primary_key("Owner", "Parent")),
        )
        .with_entity(
            EntityDef::new("Toy", "Toy", "Id")
                .with_member("Id", MemberType::Scalar(ScalarKind::I32))
                .with_member("OwnerId", MemberType::Scalar(ScalarKind::I32))
                .with_member("ChildId", MemberType::Scalar(ScalarKind::I32))
                .with_navigation(NavigationDef::reference("Owner", "Child", "OwnerId")),
        )
}

fn child(name: &str, parent: i32) -> [(&'static str, Value); 3] {
    [
        ("Name", Value::from(name)),
        ("Title", Value::from(format!("Dr. {name}"))),
        ("ParentId", Value::from(parent)),
    ]
}

pub(crate) fn tables() -> TableSet {
    let parents = MemoryTable::builder(parent_schema())
        .row(
            1,
            [
                ("Level", Value::from(1)),
                ("Name", Value::from("p1")),
                (
                    "ChildIds",
                    Value::Array(vec![Value::from(100u32), Value::from(999u32)]),
                ),
                ("Scores", Value::Array(vec![Value::from(7), Value::from(9)])),
                ("Aliases", strings(&["first", "one"])),
                ("Mottos", strings(&["calm", "carry on"])),
            ],
        )
        .row(
            2,
            [
                ("Level", Value::from(5)),
                ("Name", Value::from("p2")),
                (
                    "ChildIds",
                    Value::Array(vec![Value::from(101u32), Value::from(102u32)]),
                ),
                ("Scores", Value::Array(vec![Value::from(3)])),
                ("Aliases", strings(&["second"])),
                ("Mottos", strings(&["onward"])),
            ],
        )
        .build();
    let children = MemoryTable::builder(child_schema())
        .row(100, child("alpha", 1))
        .row(101, child("bravo", 2))
        .row(102, child("echo", 0))
        .row(103, child("delta", 7))
        .build();
    let extras = MemoryTable::builder(extra_schema())
        .row(1, [("Motto", Value::from("keep calm"))])
        .build();
    let toys = MemoryTable::builder(toy_schema())
        .row(1, [("OwnerId", Value::from(100)), ("ChildId", Value::from(100))])
        .row(2, [("OwnerId", Value::from(101)), ("ChildId", Value::from(101))])
        .build();

    let mut set = TableSet::new();
    for table in [parents, children, extras, toys] {
        let table = table.expect("fixture table");
        set = set.with_table(table);
    }
    set
}

impl Fixture {
    pub fn new() -> Self {
        let schemas = [parent_schema(), child_schema(), extra_schema(), toy_schema()];
        let catalog = Catalog::build(&bundle(), &schemas[..]).expect("fixture catalog");
        Self {
            catalog: Arc::new(catalog),
            tables: Arc::new(tables()),
            config: EngineConfig::default(),
            strings: DenseStringCacheRegistry::new(16),
        }
    }

    /// Table backing an entity.
    pub fn table_of(&self, entity: &str) -> Arc<dyn Db2File> {
        let entity = self.catalog.entity(entity).expect("fixture entity");
        Arc::clone(self.tables.get(&entity.table).expect("fixture table"))
    }

    pub fn row_compiler(&self, entity: &str) -> RowCompiler<'_> {
        self.row_compiler_with(entity, &self.config)
    }

    pub fn row_compiler_with<'a>(&'a self, entity: &str, config: &'a EngineConfig) -> RowCompiler<'a> {
        let entity_type = self.catalog.entity(entity).expect("fixture entity");
        RowCompiler::new(entity_type, self.table_of(entity), config, &self.strings)
    }
}
