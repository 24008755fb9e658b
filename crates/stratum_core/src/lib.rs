//! # Stratum Core
//!
//! Transactional commit engine for Stratum.
//!
//! This crate takes a unit of work (a [`ChangeSet`] of in-memory object
//! changes) and writes it to a relational store in one transaction:
//! - Entity types are committed in a deterministic topological order derived
//!   from their foreign keys ([`CommitOrder`])
//! - Every object is written at most once; circular references are resolved
//!   with a shallow write and one completing update ([`CommitTracker`])
//! - Join-table changes and secondary-table rows are deferred until after the
//!   ordered pass ([`DeferredWork`])
//! - Unchanged versioned objects are verified with one batched query
//!   ([`VersionCheckBatch`])
//! - Deletions run in reverse commit order, after everything else
//!
//! ## Design Principles
//!
//! - Metadata is read only; a changed [`Registry`] is installed with
//!   [`CommitEngine::reload`]
//! - Objects are tracked by identity, never by value ([`ObjectRef`])
//! - Each attempt owns its state; the engine itself is shared between threads
//! - Nothing is retried internally; conflicts are reported so the caller can
//!   refresh and retry ([`CommitError::is_retryable`])

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod commit;
mod config;
mod entity;
mod error;
mod metadata;
mod order;
mod types;

#[cfg(test)]
mod testing;

pub use change::{ChangeRecord, ChangeSet, FieldDelta};
pub use commit::{
    CommitEngine, CommitPhase, CommitProgress, CommitReport, CommitTracker, DeferredWork,
    ModificationEvent, VersionCheckBatch,
};
pub use config::{ChangeOrdering, CommitConfig};
pub use entity::{Entity, ObjectRef};
pub use error::{CommitError, CommitResult};
pub use metadata::{
    EntityDescriptor, JoinMapping, LockingPolicy, Reference, Registry, SecondaryTable,
};
pub use order::{compute_order, CommitOrder, DependencyEdge};
pub use types::{CommitId, EntityType, Version, VersionKind};
