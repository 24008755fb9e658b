//! Change sets: the pending work of one unit of work.

use crate::entity::ObjectRef;
use crate::types::EntityType;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use stratum_store::Value;

/// One attribute-level change.
#[derive(Debug, Clone)]
pub enum FieldDelta {
    /// A direct column changed.
    Value {
        /// Column name.
        column: String,
        /// New value.
        value: Value,
    },
    /// A reference (foreign key) changed.
    Reference {
        /// Reference attribute name, as declared on the descriptor.
        field: String,
        /// New target; `None` clears the reference.
        target: Option<ObjectRef>,
    },
    /// An object was added to a join-table collection.
    LinkAdded {
        /// Join mapping name.
        mapping: String,
        /// Added object.
        target: ObjectRef,
    },
    /// An object was removed from a join-table collection.
    LinkRemoved {
        /// Join mapping name.
        mapping: String,
        /// Removed object.
        target: ObjectRef,
    },
    /// A privately owned object was removed from this object and must be
    /// deleted.
    Orphaned {
        /// The orphaned object.
        target: ObjectRef,
    },
}

impl FieldDelta {
    /// Checks if the delta touches a column of the object's own row.
    #[must_use]
    pub fn is_row_change(&self) -> bool {
        matches!(self, FieldDelta::Value { .. } | FieldDelta::Reference { .. })
    }
}

/// The pending change of one object.
#[derive(Debug)]
pub struct ChangeRecord {
    object: ObjectRef,
    is_new: bool,
    deltas: Vec<FieldDelta>,
    materialized: AtomicBool,
}

impl ChangeRecord {
    /// Creates a record for an object to insert.
    pub fn new_object(object: ObjectRef) -> Self {
        Self::create(object, true)
    }

    /// Creates a record for an object that already has a row.
    pub fn existing(object: ObjectRef) -> Self {
        Self::create(object, false)
    }

    fn create(object: ObjectRef, is_new: bool) -> Self {
        Self {
            object,
            is_new,
            deltas: Vec::new(),
            materialized: AtomicBool::new(false),
        }
    }

    /// Adds a column delta.
    #[must_use]
    pub fn with_value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.deltas.push(FieldDelta::Value {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// Adds a reference delta.
    #[must_use]
    pub fn with_reference(mut self, field: impl Into<String>, target: Option<ObjectRef>) -> Self {
        self.deltas.push(FieldDelta::Reference {
            field: field.into(),
            target,
        });
        self
    }

    /// Adds a join-table link.
    #[must_use]
    pub fn with_link(mut self, mapping: impl Into<String>, target: ObjectRef) -> Self {
        self.deltas.push(FieldDelta::LinkAdded {
            mapping: mapping.into(),
            target,
        });
        self
    }

    /// Adds a join-table unlink.
    #[must_use]
    pub fn with_unlink(mut self, mapping: impl Into<String>, target: ObjectRef) -> Self {
        self.deltas.push(FieldDelta::LinkRemoved {
            mapping: mapping.into(),
            target,
        });
        self
    }

    /// Adds an orphaned private part.
    #[must_use]
    pub fn with_orphan(mut self, target: ObjectRef) -> Self {
        self.deltas.push(FieldDelta::Orphaned { target });
        self
    }

    /// Returns the object.
    #[must_use]
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// Returns the object's type.
    #[must_use]
    pub fn entity_type(&self) -> &EntityType {
        self.object.entity_type()
    }

    /// Checks if the object has no row yet.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Returns the deltas in order.
    #[must_use]
    pub fn deltas(&self) -> &[FieldDelta] {
        &self.deltas
    }

    /// Names of the columns, references and join mappings the record
    /// changes, sorted and without repeats. Orphaned parts are not counted.
    #[must_use]
    pub fn changed_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .deltas
            .iter()
            .filter_map(|delta| match delta {
                FieldDelta::Value { column, .. } => Some(column.as_str()),
                FieldDelta::Reference { field, .. } => Some(field.as_str()),
                FieldDelta::LinkAdded { mapping, .. } | FieldDelta::LinkRemoved { mapping, .. } => {
                    Some(mapping.as_str())
                }
                FieldDelta::Orphaned { .. } => None,
            })
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Checks if the record carries no deltas, i.e. only needs its version
    /// verified.
    #[must_use]
    pub fn is_version_check_only(&self) -> bool {
        !self.is_new && self.deltas.is_empty()
    }

    /// Checks if the object's row was written by a commit.
    #[must_use]
    pub fn is_materialized(&self) -> bool {
        self.materialized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_materialized(&self) {
        self.materialized.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    is_new: bool,
    index: usize,
}

/// All pending changes of one unit of work.
///
/// Records are grouped by type into new objects and existing objects; within
/// a type they keep the order they were added in.
#[derive(Debug, Default)]
pub struct ChangeSet {
    new_objects: HashMap<EntityType, Vec<ChangeRecord>>,
    changed_objects: HashMap<EntityType, Vec<ChangeRecord>>,
    deletions: Vec<ObjectRef>,
    index: HashMap<ObjectRef, (EntityType, Slot)>,
}

impl ChangeSet {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record to the new-object or existing-object group according to
    /// its `is_new` flag.
    pub fn add(&mut self, record: ChangeRecord) -> &mut Self {
        let is_new = record.is_new();
        self.push(record, is_new)
    }

    /// Adds a record to the existing-object group regardless of its flag.
    ///
    /// A record flagged new in this group is inserted during the pass over
    /// existing objects.
    pub fn add_changed(&mut self, record: ChangeRecord) -> &mut Self {
        self.push(record, false)
    }

    /// Queues an object for deletion.
    pub fn delete(&mut self, object: ObjectRef) -> &mut Self {
        self.deletions.push(object);
        self
    }

    fn push(&mut self, record: ChangeRecord, into_new: bool) -> &mut Self {
        let entity_type = record.entity_type().clone();
        let group = if into_new {
            &mut self.new_objects
        } else {
            &mut self.changed_objects
        };
        let records = group.entry(entity_type.clone()).or_default();
        self.index.insert(
            record.object().clone(),
            (
                entity_type,
                Slot {
                    is_new: into_new,
                    index: records.len(),
                },
            ),
        );
        records.push(record);
        self
    }

    /// Returns the new-object records of a type.
    #[must_use]
    pub fn new_objects(&self, entity_type: &EntityType) -> &[ChangeRecord] {
        self.new_objects
            .get(entity_type)
            .map_or(&[], Vec::as_slice)
    }

    /// Returns the existing-object records of a type.
    #[must_use]
    pub fn changed_objects(&self, entity_type: &EntityType) -> &[ChangeRecord] {
        self.changed_objects
            .get(entity_type)
            .map_or(&[], Vec::as_slice)
    }

    /// Returns the objects queued for deletion.
    #[must_use]
    pub fn deletions(&self) -> &[ObjectRef] {
        &self.deletions
    }

    /// Finds the record of an object by identity.
    #[must_use]
    pub fn record(&self, object: &ObjectRef) -> Option<&ChangeRecord> {
        let (entity_type, slot) = self.index.get(object)?;
        let group = if slot.is_new {
            &self.new_objects
        } else {
            &self.changed_objects
        };
        group.get(entity_type)?.get(slot.index)
    }

    /// Returns every type with new or existing records, sorted by name.
    #[must_use]
    pub fn entity_types(&self) -> Vec<EntityType> {
        let mut types: Vec<EntityType> = self
            .new_objects
            .keys()
            .chain(self.changed_objects.keys())
            .chain(self.deletions.iter().map(|o| o.entity_type()))
            .cloned()
            .collect();
        types.sort();
        types.dedup();
        types
    }

    /// Returns the number of new and existing records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.new_objects.values().map(Vec::len).sum::<usize>()
            + self.changed_objects.values().map(Vec::len).sum::<usize>()
    }

    /// Checks if there is nothing to write or delete.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.deletions.is_empty()
    }

    pub(crate) fn first_new_type(&self) -> Option<&EntityType> {
        self.new_objects
            .iter()
            .find(|(_, records)| !records.is_empty())
            .map(|(t, _)| t)
    }

    pub(crate) fn first_changed_type(&self) -> Option<&EntityType> {
        self.changed_objects
            .iter()
            .find(|(_, records)| !records.is_empty())
            .map(|(t, _)| t)
    }
}
