//! Commit order of entity types.
//!
//! The order is a topological sort of the registered types over their
//! referential dependencies: a type is committed after every type it holds a
//! foreign key to. The same metadata always produces the same order, so every
//! commit touches tables in the same relative order and concurrent commits
//! do not deadlock on each other's row locks.

mod graph;

use crate::error::CommitResult;
use crate::metadata::Registry;
use crate::types::EntityType;
use std::collections::HashMap;
use tracing::debug;

pub use graph::compute_order;

/// "`dependent` is committed after `prerequisite`".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    /// The type holding the reference.
    pub dependent: EntityType,
    /// The referenced type.
    pub prerequisite: EntityType,
    /// Whether the reference may not be left NULL. Only optional edges are
    /// broken to resolve a structural cycle, unless every edge in the cycle
    /// is mandatory.
    pub mandatory: bool,
}

impl DependencyEdge {
    /// Creates an edge.
    pub fn new(
        dependent: impl Into<EntityType>,
        prerequisite: impl Into<EntityType>,
        mandatory: bool,
    ) -> Self {
        Self {
            dependent: dependent.into(),
            prerequisite: prerequisite.into(),
            mandatory,
        }
    }
}

/// A computed commit order.
#[derive(Debug, Clone, Default)]
pub struct CommitOrder {
    types: Vec<EntityType>,
    positions: HashMap<EntityType, usize>,
    broken_edges: Vec<DependencyEdge>,
}

impl CommitOrder {
    pub(crate) fn new(types: Vec<EntityType>, broken_edges: Vec<DependencyEdge>) -> Self {
        let positions = types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        Self {
            types,
            positions,
            broken_edges,
        }
    }

    /// Computes the order of every type in a registry.
    ///
    /// # Errors
    ///
    /// Returns `CyclicDependency` if explicit dependencies form a cycle and
    /// `UnknownEntityType` if a dependency names an unregistered type.
    pub fn from_registry(registry: &Registry) -> CommitResult<Self> {
        let order = compute_order(
            &registry.entity_types(),
            &registry.mapping_edges(),
            registry.explicit_edges(),
        )?;
        debug!(
            types = order.len(),
            broken_edges = order.broken_edges.len(),
            "computed commit order"
        );
        Ok(order)
    }

    /// Iterates types roots first.
    pub fn iter(&self) -> std::slice::Iter<'_, EntityType> {
        self.types.iter()
    }

    /// Returns the types roots first.
    #[must_use]
    pub fn as_slice(&self) -> &[EntityType] {
        &self.types
    }

    /// Returns the position of a type.
    #[must_use]
    pub fn position(&self, entity_type: &EntityType) -> Option<usize> {
        self.positions.get(entity_type).copied()
    }

    /// Checks if a type is part of the order.
    #[must_use]
    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.positions.contains_key(entity_type)
    }

    /// Edges dropped to break structural cycles. Objects along these edges
    /// are resolved at write time with a shallow write.
    #[must_use]
    pub fn broken_edges(&self) -> &[DependencyEdge] {
        &self.broken_edges
    }

    /// Returns the number of types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Checks if the order is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl<'a> IntoIterator for &'a CommitOrder {
    type Item = &'a EntityType;
    type IntoIter = std::slice::Iter<'a, EntityType>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
