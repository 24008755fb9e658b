//! Entity capability trait and identity handles.

use crate::types::{EntityType, Version};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;
use stratum_store::Value;

/// The capabilities the commit engine needs from an in-memory object.
///
/// Each mapped type implements this once; the engine never inspects fields
/// beyond what is exposed here and in the change record.
pub trait Entity: Send + Sync + fmt::Debug {
    /// The mapped type of this object.
    fn entity_type(&self) -> &EntityType;

    /// The primary key value.
    fn primary_key(&self) -> Value;

    /// The optimistic-lock version the object was read at, if versioned.
    fn version(&self) -> Option<Version> {
        None
    }
}

/// A shared handle to an in-flight object, compared by identity.
///
/// Two handles are equal only when they point at the same allocation; two
/// distinct objects with equal fields stay distinct. The handle keeps the
/// object alive, so an address is never reused while a handle to it exists.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Entity>);

impl ObjectRef {
    /// Wraps a new object.
    pub fn new<E: Entity + 'static>(entity: E) -> Self {
        Self(Arc::new(entity))
    }

    /// Wraps an already shared object.
    pub fn from_arc(entity: Arc<dyn Entity>) -> Self {
        Self(entity)
    }

    /// Checks if both handles point at the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        self.address() == other.address()
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl Deref for ObjectRef {
    type Target = dyn Entity;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.0.entity_type(), self.0.primary_key())
    }
}
