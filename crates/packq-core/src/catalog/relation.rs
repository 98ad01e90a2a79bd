//! Navigation definitions between entities.

use std::sync::Arc;

use super::entity::EntityType;
use super::field::FieldSchema;
use super::types::CollectionShape;
use rkyv::{Archive, Deserialize, Serialize};

/// How a navigation finds its related rows.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum NavigationKind {
    /// Reference through a foreign key member on the root.
    ForeignKey { foreign_key: String },
    /// Reference to the target row with the same primary key.
    SharedPrimaryKey,
    /// Collection through an array of keys on the root.
    ForeignKeyArray {
        keys: String,
        shape: CollectionShape,
    },
    /// Collection of target rows whose foreign key points at the root.
    Dependent {
        foreign_key: String,
        shape: CollectionShape,
    },
}

/// A declared navigation member.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct NavigationDef {
    /// Navigation member name.
    pub name: String,
    /// Target entity name.
    pub target: String,
    /// Join strategy.
    pub kind: NavigationKind,
}

impl NavigationDef {
    /// Create a reference navigation through a foreign key member.
    pub fn reference(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: NavigationKind::ForeignKey {
                foreign_key: foreign_key.into(),
            },
        }
    }

    /// Create a one-to-one navigation sharing the primary key.
    pub fn shared_primary_key(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: NavigationKind::SharedPrimaryKey,
        }
    }

    /// Create a collection navigation through a key array member.
    pub fn key_array(
        name: impl Into<String>,
        target: impl Into<String>,
        keys: impl Into<String>,
        shape: CollectionShape,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: NavigationKind::ForeignKeyArray {
                keys: keys.into(),
                shape,
            },
        }
    }

    /// Create a collection navigation over dependents.
    pub fn dependents(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
        shape: CollectionShape,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: NavigationKind::Dependent {
                foreign_key: foreign_key.into(),
                shape,
            },
        }
    }

    /// Declared collection shape, if this is a collection navigation.
    pub fn shape(&self) -> Option<CollectionShape> {
        match &self.kind {
            NavigationKind::ForeignKeyArray { shape, .. }
            | NavigationKind::Dependent { shape, .. } => Some(*shape),
            _ => None,
        }
    }

    /// Check if this navigation yields a collection.
    pub fn is_collection(&self) -> bool {
        self.shape().is_some()
    }
}

/// Resolved join strategy of a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    ForeignKeyToPrimaryKey,
    SharedPrimaryKeyOneToOne,
    ForeignKeyArrayToPrimaryKey,
    DependentForeignKeyToPrimaryKey,
}

/// A member and the physical field behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef {
    pub member: String,
    pub field: FieldSchema,
}

/// How to join a root entity to the target of one of its navigations.
///
/// `root_key` is read on root rows and `target_key` on target rows; a root
/// matches a target row when they hold the same key. For key arrays the
/// root key is an array and any of its non-zero elements may match.
#[derive(Debug, Clone)]
pub struct NavigationJoinPlan {
    pub kind: JoinKind,
    pub navigation: String,
    pub root: Arc<EntityType>,
    pub target: Arc<EntityType>,
    pub root_key: KeyRef,
    pub target_key: KeyRef,
    pub shape: Option<CollectionShape>,
}

impl NavigationJoinPlan {
    /// Check if the navigation yields a collection.
    pub fn is_collection(&self) -> bool {
        self.shape.is_some()
    }

    /// `Root.Navigation`, for diagnostics.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.root.name, self.navigation)
    }
}
