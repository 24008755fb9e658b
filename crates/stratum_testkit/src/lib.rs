//! # Stratum Testkit
//!
//! Test utilities for Stratum.
//!
//! This crate provides:
//! - A sample mapped model with a matching in-memory store
//! - Property-based test generators using proptest
//! - Concurrent stress helpers
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stratum_testkit::prelude::*;
//!
//! #[test]
//! fn commits_company() {
//!     let engine = sample_engine();
//!     let mut store = sample_store();
//!     let mut changes = ChangeSet::new();
//!     changes.add(ChangeRecord::new_object(object("Company", 1)));
//!     engine.commit(&changes, &mut store).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
    pub use stratum_core::*;
    pub use stratum_store::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use stress::*;
