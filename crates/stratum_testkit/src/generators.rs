//! Property-based test generators using proptest.
//!
//! Generated metadata only has references from a type to types registered
//! before it, so the commit order always exists; generated objects only
//! reference objects of those earlier types.

use crate::fixtures::object;
use proptest::prelude::*;
use stratum_core::{ChangeRecord, ChangeSet, EntityDescriptor, EntityType, ObjectRef, Registry};

/// Name of the `index`th generated type.
pub fn type_name(index: usize) -> String {
    format!("T{index:02}")
}

fn table_name(index: usize) -> String {
    format!("TABLE_{index:02}")
}

fn reference_field(target: usize) -> String {
    format!("ref{target:02}")
}

fn reference_column(target: usize) -> String {
    format!("REF{target:02}_ID")
}

/// A generated type: references to earlier types and explicit
/// dependencies on earlier types.
#[derive(Debug, Clone)]
pub struct GeneratedType {
    /// `(target index, mandatory)` per reference.
    pub references: Vec<(usize, bool)>,
    /// Target indices of explicit dependencies.
    pub explicit: Vec<usize>,
}

/// Strategy for acyclic metadata of 1 to `max_types` types.
pub fn acyclic_types_strategy(max_types: usize) -> impl Strategy<Value = Vec<GeneratedType>> {
    (1..=max_types.max(1)).prop_flat_map(|count| {
        (0..count)
            .map(|index| {
                let earlier = prop::collection::vec((0..index.max(1), any::<bool>()), 0..=index.min(3));
                let explicit = prop::collection::vec(0..index.max(1), 0..=index.min(2));
                (earlier, explicit).prop_map(move |(references, explicit)| {
                    if index == 0 {
                        return GeneratedType {
                            references: Vec::new(),
                            explicit: Vec::new(),
                        };
                    }
                    let mut references = references;
                    references.sort_unstable();
                    references.dedup_by_key(|(target, _)| *target);
                    GeneratedType {
                        references,
                        explicit,
                    }
                })
            })
            .collect::<Vec<_>>()
    })
}

/// Builds a registry from generated types.
pub fn registry_from(types: &[GeneratedType]) -> Registry {
    let mut registry = Registry::new();
    for (index, generated) in types.iter().enumerate() {
        let mut descriptor = EntityDescriptor::new(type_name(index), table_name(index), "ID");
        for &(target, mandatory) in &generated.references {
            descriptor = descriptor.with_reference(
                reference_field(target),
                reference_column(target),
                type_name(target),
                mandatory,
            );
        }
        registry.register(descriptor);
    }
    for (index, generated) in types.iter().enumerate() {
        for &target in &generated.explicit {
            registry.add_dependency(type_name(index), type_name(target));
        }
    }
    registry
}

/// Strategy for acyclic registries.
pub fn acyclic_registry_strategy(max_types: usize) -> impl Strategy<Value = Registry> {
    acyclic_types_strategy(max_types).prop_map(|types| registry_from(&types))
}

/// Strategy for registries whose references may form cycles, without
/// explicit dependencies.
pub fn cyclic_registry_strategy(max_types: usize) -> impl Strategy<Value = Registry> {
    (2..=max_types.max(2)).prop_flat_map(|count| {
        prop::collection::vec((0..count, 0..count, any::<bool>()), 0..count * 2).prop_map(
            move |edges| {
                let mut descriptors: Vec<EntityDescriptor> = (0..count)
                    .map(|i| EntityDescriptor::new(type_name(i), table_name(i), "ID"))
                    .collect();
                let mut seen = std::collections::HashSet::new();
                for (from, to, mandatory) in edges {
                    if from == to || !seen.insert((from, to)) {
                        continue;
                    }
                    let descriptor = descriptors[from].clone();
                    descriptors[from] = descriptor.with_reference(
                        reference_field(to),
                        reference_column(to),
                        type_name(to),
                        mandatory,
                    );
                }
                descriptors
                    .into_iter()
                    .fold(Registry::new(), |registry, d| registry.with(d))
            },
        )
    })
}

/// One generated new object.
#[derive(Debug, Clone)]
pub struct GeneratedObject {
    /// Index of the object's type.
    pub type_index: usize,
    /// Primary key, unique across the unit of work.
    pub key: i64,
    /// `(target type index, target object index)` per set reference.
    pub references: Vec<(usize, usize)>,
}

/// A generated unit of work inserting new objects over acyclic metadata.
#[derive(Debug, Clone)]
pub struct GeneratedUnitOfWork {
    /// Metadata.
    pub types: Vec<GeneratedType>,
    /// Objects in registration order.
    pub objects: Vec<GeneratedObject>,
}

impl GeneratedUnitOfWork {
    /// Builds the registry.
    pub fn registry(&self) -> Registry {
        registry_from(&self.types)
    }

    /// Builds the change set and returns it with the object handles, indexed
    /// like [`GeneratedUnitOfWork::objects`].
    pub fn change_set(&self) -> (ChangeSet, Vec<ObjectRef>) {
        let handles: Vec<ObjectRef> = self
            .objects
            .iter()
            .map(|o| object(&type_name(o.type_index), o.key))
            .collect();
        let mut changes = ChangeSet::new();
        for (generated, handle) in self.objects.iter().zip(&handles) {
            let mut record = ChangeRecord::new_object(handle.clone()).with_value("NAME", generated.key);
            for &(target_type, target) in &generated.references {
                record = record.with_reference(reference_field(target_type), Some(handles[target].clone()));
            }
            changes.add(record);
        }
        (changes, handles)
    }

    /// Entity type of an object.
    pub fn entity_type(&self, object: usize) -> EntityType {
        EntityType::new(type_name(self.objects[object].type_index))
    }
}

/// Strategy for units of work of up to `max_objects` new objects.
pub fn unit_of_work_strategy(
    max_types: usize,
    max_objects: usize,
) -> impl Strategy<Value = GeneratedUnitOfWork> {
    let max_objects = max_objects.max(1);
    acyclic_types_strategy(max_types).prop_flat_map(move |types| {
        let type_count = types.len();
        let picks = prop::collection::vec(
            (0..type_count, prop::collection::vec(any::<prop::sample::Index>(), 3)),
            1..=max_objects,
        );
        (Just(types), picks).prop_perturb(|(types, picks), mut rng| {
            let mut objects: Vec<GeneratedObject> = picks
                .iter()
                .enumerate()
                .map(|(i, (type_index, _))| GeneratedObject {
                    type_index: *type_index,
                    key: i as i64 + 1,
                    references: Vec::new(),
                })
                .collect();

            for (i, (type_index, choices)) in picks.iter().enumerate() {
                for (slot, &(target_type, _)) in types[*type_index].references.iter().enumerate() {
                    let candidates: Vec<usize> = objects
                        .iter()
                        .enumerate()
                        .filter(|(_, o)| o.type_index == target_type)
                        .map(|(j, _)| j)
                        .collect();
                    if candidates.is_empty() {
                        continue;
                    }
                    let choice = choices.get(slot % choices.len()).map_or(0, |c| c.index(candidates.len()));
                    objects[i].references.push((target_type, candidates[choice]));
                }
            }

            // Registration order is independent of dependency order.
            for i in (1..objects.len()).rev() {
                let j = (rng.next_u32() as usize) % (i + 1);
                objects.swap(i, j);
            }
            let positions: Vec<usize> = {
                let mut by_key = vec![0; objects.len()];
                for (position, o) in objects.iter().enumerate() {
                    by_key[(o.key - 1) as usize] = position;
                }
                by_key
            };
            for o in &mut objects {
                for reference in &mut o.references {
                    reference.1 = positions[reference.1];
                }
            }

            GeneratedUnitOfWork { types, objects }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_references_point_at_earlier_types(types in acyclic_types_strategy(8)) {
            for (index, generated) in types.iter().enumerate() {
                for &(target, _) in &generated.references {
                    prop_assert!(target < index);
                }
                for &target in &generated.explicit {
                    prop_assert!(target < index);
                }
            }
        }

        #[test]
        fn generated_objects_reference_matching_types(work in unit_of_work_strategy(5, 10)) {
            for o in &work.objects {
                for &(target_type, target) in &o.references {
                    prop_assert_eq!(work.objects[target].type_index, target_type);
                }
            }
        }
    }
}
