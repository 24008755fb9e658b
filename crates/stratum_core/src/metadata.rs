//! Read-only mapping metadata.
//!
//! A [`Registry`] holds one [`EntityDescriptor`] per mapped type plus any
//! explicitly declared commit dependencies. The engine only reads it; a
//! changed registry is installed with [`crate::CommitEngine::reload`].

use crate::error::{CommitError, CommitResult};
use crate::order::DependencyEdge;
use crate::types::{EntityType, VersionKind};
use std::collections::HashMap;

/// A foreign key held by the owning type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Attribute name change records use for this reference.
    pub field: String,
    /// Foreign-key column in the owning table.
    pub column: String,
    /// Referenced type; committed before the owning type.
    pub target: EntityType,
    /// Whether the column is NOT NULL. Optional references are the ones
    /// dropped first when a structural cycle must be broken.
    pub mandatory: bool,
}

/// A many-to-many mapping stored in a join table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinMapping {
    /// Mapping name; deferred join-table events are grouped by it.
    pub name: String,
    /// Join table.
    pub table: String,
    /// Column holding the owning object's key.
    pub source_column: String,
    /// Column holding the target object's key.
    pub target_column: String,
    /// Target type.
    pub target: EntityType,
}

/// An extra table holding some columns of a multi-table type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryTable {
    /// Table name.
    pub table: String,
    /// Column holding the primary key (and referencing the main table).
    pub primary_key: String,
    /// Columns stored in this table rather than the main one.
    pub columns: Vec<String>,
}

/// Optimistic locking policy of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockingPolicy {
    /// Version column.
    pub column: String,
    /// Storage width of the version column.
    pub kind: VersionKind,
    /// Whether changes to owned collections alone bump the version.
    pub cascaded: bool,
}

impl LockingPolicy {
    /// Creates a non-cascaded policy.
    pub fn new(column: impl Into<String>, kind: VersionKind) -> Self {
        Self {
            column: column.into(),
            kind,
            cascaded: false,
        }
    }

    /// Sets whether the policy cascades.
    #[must_use]
    pub fn cascaded(mut self, value: bool) -> Self {
        self.cascaded = value;
        self
    }
}

/// Mapping metadata for one entity type.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    entity_type: EntityType,
    table: String,
    primary_key: String,
    secondary_tables: Vec<SecondaryTable>,
    references: Vec<Reference>,
    join_mappings: Vec<JoinMapping>,
    locking: Option<LockingPolicy>,
}

impl EntityDescriptor {
    /// Creates a descriptor for a type stored in `table` keyed by `primary_key`.
    pub fn new(
        entity_type: impl Into<EntityType>,
        table: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            table: table.into(),
            primary_key: primary_key.into(),
            secondary_tables: Vec::new(),
            references: Vec::new(),
            join_mappings: Vec::new(),
            locking: None,
        }
    }

    /// Declares a foreign key to `target`.
    #[must_use]
    pub fn with_reference(
        mut self,
        field: impl Into<String>,
        column: impl Into<String>,
        target: impl Into<EntityType>,
        mandatory: bool,
    ) -> Self {
        self.references.push(Reference {
            field: field.into(),
            column: column.into(),
            target: target.into(),
            mandatory,
        });
        self
    }

    /// Declares a join-table mapping.
    #[must_use]
    pub fn with_join_mapping(mut self, mapping: JoinMapping) -> Self {
        self.join_mappings.push(mapping);
        self
    }

    /// Declares a secondary table.
    #[must_use]
    pub fn with_secondary_table(mut self, table: SecondaryTable) -> Self {
        self.secondary_tables.push(table);
        self
    }

    /// Sets the optimistic locking policy.
    #[must_use]
    pub fn with_locking(mut self, policy: LockingPolicy) -> Self {
        self.locking = Some(policy);
        self
    }

    /// Returns the entity type.
    #[must_use]
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Returns the main table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the primary key column.
    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Returns the secondary tables.
    #[must_use]
    pub fn secondary_tables(&self) -> &[SecondaryTable] {
        &self.secondary_tables
    }

    /// Returns the declared references.
    #[must_use]
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Looks up a reference by attribute name.
    #[must_use]
    pub fn reference(&self, field: &str) -> Option<&Reference> {
        self.references.iter().find(|r| r.field == field)
    }

    /// Looks up a join mapping by name.
    #[must_use]
    pub fn join_mapping(&self, name: &str) -> Option<&JoinMapping> {
        self.join_mappings.iter().find(|m| m.name == name)
    }

    /// Returns the optimistic locking policy.
    #[must_use]
    pub fn locking(&self) -> Option<&LockingPolicy> {
        self.locking.as_ref()
    }
}

/// The set of descriptors a session commits against.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    descriptors: Vec<EntityDescriptor>,
    index: HashMap<EntityType, usize>,
    explicit: Vec<DependencyEdge>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor, replacing any previous one for the same type.
    pub fn register(&mut self, descriptor: EntityDescriptor) -> &mut Self {
        match self.index.get(descriptor.entity_type()) {
            Some(&i) => self.descriptors[i] = descriptor,
            None => {
                self.index
                    .insert(descriptor.entity_type().clone(), self.descriptors.len());
                self.descriptors.push(descriptor);
            }
        }
        self
    }

    /// Registers a descriptor, builder style.
    #[must_use]
    pub fn with(mut self, descriptor: EntityDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    /// Declares that `dependent` must be committed after `prerequisite`
    /// even though no mapping says so.
    pub fn add_dependency(
        &mut self,
        dependent: impl Into<EntityType>,
        prerequisite: impl Into<EntityType>,
    ) -> &mut Self {
        self.explicit.push(DependencyEdge::new(dependent, prerequisite, true));
        self
    }

    /// Looks up a descriptor.
    #[must_use]
    pub fn descriptor(&self, entity_type: &EntityType) -> Option<&EntityDescriptor> {
        self.index.get(entity_type).map(|&i| &self.descriptors[i])
    }

    /// Looks up a descriptor, failing for unregistered types.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if no descriptor is registered.
    pub fn get(&self, entity_type: &EntityType) -> CommitResult<&EntityDescriptor> {
        self.descriptor(entity_type)
            .ok_or_else(|| CommitError::unknown_type(entity_type))
    }

    /// Iterates descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.descriptors.iter()
    }

    /// Returns the registered types in registration order.
    #[must_use]
    pub fn entity_types(&self) -> Vec<EntityType> {
        self.descriptors
            .iter()
            .map(|d| d.entity_type().clone())
            .collect()
    }

    /// Returns the dependencies implied by references.
    #[must_use]
    pub fn mapping_edges(&self) -> Vec<DependencyEdge> {
        self.descriptors
            .iter()
            .flat_map(|d| {
                d.references().iter().map(move |r| {
                    DependencyEdge::new(d.entity_type().clone(), r.target.clone(), r.mandatory)
                })
            })
            .collect()
    }

    /// Returns the explicitly declared dependencies.
    #[must_use]
    pub fn explicit_edges(&self) -> &[DependencyEdge] {
        &self.explicit
    }

    /// Returns the number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Checks if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new()
            .with(EntityDescriptor::new("Company", "COMPANY", "ID"))
            .with(
                EntityDescriptor::new("Employee", "EMPLOYEE", "ID")
                    .with_reference("company", "COMPANY_ID", "Company", true)
                    .with_reference("mentor", "MENTOR_ID", "Employee", false)
                    .with_locking(LockingPolicy::new("VERSION", VersionKind::Long)),
            )
    }

    #[test]
    fn lookup_by_type() {
        let registry = registry();
        let employee = registry.get(&EntityType::new("Employee")).unwrap();
        assert_eq!(employee.table(), "EMPLOYEE");
        assert_eq!(employee.reference("company").unwrap().column, "COMPANY_ID");
        assert!(employee.locking().is_some());
    }

    #[test]
    fn unknown_type_errors() {
        let registry = registry();
        let result = registry.get(&EntityType::new("Invoice"));
        assert!(matches!(result, Err(CommitError::UnknownEntityType { .. })));
    }

    #[test]
    fn register_replaces_same_type() {
        let mut registry = registry();
        registry.register(EntityDescriptor::new("Company", "FIRM", "ID"));
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get(&EntityType::new("Company")).unwrap().table(),
            "FIRM"
        );
    }

    #[test]
    fn mapping_edges_follow_references() {
        let edges = registry().mapping_edges();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].dependent, EntityType::new("Employee"));
        assert_eq!(edges[0].prerequisite, EntityType::new("Company"));
        assert!(edges[0].mandatory);
        assert!(!edges[1].mandatory);
    }
}
