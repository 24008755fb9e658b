//! Unit-of-work commit.
//!
//! A commit attempt runs through fixed phases:
//!
//! 1. open the transaction
//! 2. walk the commit order, writing existing then new objects of each type
//! 3. flush deferred modification events, then deferred calls
//! 4. delete in reverse commit order
//! 5. commit, or roll back on any failure
//!
//! Per-attempt state (tracker, queues, version ledger, deletion queue) lives
//! in a context owned by the attempt and is cleared when it ends, however it
//! ends.

mod deferred;
mod manager;
mod state;
mod version;

pub use deferred::{DeferredWork, ModificationEvent};
pub use manager::{CommitEngine, CommitPhase, CommitReport};
pub use state::{CommitProgress, CommitTracker};
pub use version::VersionCheckBatch;
