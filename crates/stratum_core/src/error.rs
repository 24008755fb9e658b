//! Error types for the commit engine.

use crate::types::{EntityType, Version};
use stratum_store::{StoreError, Value};
use thiserror::Error;

/// Result type for commit operations.
pub type CommitResult<T> = Result<T, CommitError>;

/// Errors that can occur while ordering or committing a unit of work.
#[derive(Debug, Error)]
pub enum CommitError {
    /// Explicitly declared dependencies form a cycle.
    #[error("cyclic dependency between entity types: {}", format_cycle(members))]
    CyclicDependency {
        /// Members of the cycle, in dependency order.
        members: Vec<EntityType>,
    },

    /// A row changed (or vanished) since it was read.
    #[error(
        "optimistic lock conflict on {entity_type} {primary_key}: expected {expected:?}, found {found:?}"
    )]
    OptimisticLockConflict {
        /// Type of the conflicting object.
        entity_type: EntityType,
        /// Primary key of the conflicting row.
        primary_key: Value,
        /// Version the unit of work expected.
        expected: Option<Version>,
        /// Version found in the store; `None` when the row is missing.
        found: Option<Version>,
    },

    /// The write executor or transaction service failed.
    #[error("write execution failed: {0}")]
    WriteExecution(#[from] StoreError),

    /// The same object was registered twice as a deferred component.
    #[error("{entity_type} {primary_key} registered twice as a deferred component")]
    DuplicateComponent {
        /// Type of the duplicated object.
        entity_type: EntityType,
        /// Primary key of the duplicated object.
        primary_key: Value,
    },

    /// No descriptor is registered for the entity type.
    #[error("unknown entity type: {name}")]
    UnknownEntityType {
        /// Name of the type.
        name: String,
    },

    /// Operation not permitted by the metadata or change set.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

fn format_cycle(members: &[EntityType]) -> String {
    members
        .iter()
        .map(EntityType::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl CommitError {
    /// Creates an optimistic lock conflict error.
    pub fn conflict(
        entity_type: EntityType,
        primary_key: Value,
        expected: Option<Version>,
        found: Option<Version>,
    ) -> Self {
        Self::OptimisticLockConflict {
            entity_type,
            primary_key,
            expected,
            found,
        }
    }

    /// Creates an unknown entity type error.
    pub fn unknown_type(entity_type: &EntityType) -> Self {
        Self::UnknownEntityType {
            name: entity_type.as_str().to_string(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for a concurrent-modification conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CommitError::OptimisticLockConflict { .. })
    }

    /// Returns true if retrying the whole unit of work may succeed.
    ///
    /// Conflicts are retryable after the caller refreshes its objects; a
    /// lost connection or a lock timeout is retryable as is. Everything else indicates bad
    /// metadata, bad input or a bug.
    pub fn is_retryable(&self) -> bool {
        match self {
            CommitError::OptimisticLockConflict { .. } => true,
            CommitError::WriteExecution(
                StoreError::ConnectionLost { .. } | StoreError::LockTimeout { .. },
            ) => true,
            _ => false,
        }
    }
}
