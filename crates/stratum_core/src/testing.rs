//! Minimal entity used by unit tests.

use crate::entity::{Entity, ObjectRef};
use crate::types::{EntityType, Version};
use stratum_store::Value;

#[derive(Debug)]
pub(crate) struct Node {
    entity_type: EntityType,
    key: i64,
    version: Option<Version>,
}

impl Node {
    pub(crate) fn new(entity_type: &str, key: i64) -> Self {
        Self {
            entity_type: EntityType::new(entity_type),
            key,
            version: None,
        }
    }

    pub(crate) fn with_version(mut self, version: i64) -> Self {
        self.version = Some(Version::Long(version));
        self
    }
}

impl Entity for Node {
    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn primary_key(&self) -> Value {
        Value::Long(self.key)
    }

    fn version(&self) -> Option<Version> {
        self.version
    }
}

pub(crate) fn node(entity_type: &str, key: i64) -> ObjectRef {
    ObjectRef::new(Node::new(entity_type, key))
}
