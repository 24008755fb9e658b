//! # Stratum Store
//!
//! The boundary between the commit engine and the relational backing store.
//!
//! This crate is the lowest layer of Stratum. It defines:
//! - [`Value`] and [`Row`], the column values the engine binds into commands
//! - [`WriteCommand`] and [`VersionQuery`], the prepared operations the
//!   engine hands to a store
//! - [`WriteExecutor`] and [`TransactionService`], the two services a store
//!   provides
//!
//! ## Design Principles
//!
//! - Stores execute structured commands; they never see entity objects
//! - No knowledge of commit order, change sets or optimistic locking policy
//! - Every write happens inside a `begin`/`commit` or `begin`/`rollback` pair
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - Relational store with foreign-key enforcement and
//!   serializable transactions across connections, used
//!   for tests and ephemeral sessions
//!
//! ## Example
//!
//! ```rust
//! use stratum_store::{
//!     InMemoryStore, Row, TableSchema, TransactionService, Value, WriteCommand, WriteExecutor,
//! };
//!
//! let mut store = InMemoryStore::new();
//! store.create_table(TableSchema::new("COMPANY", "ID"));
//!
//! store.begin().unwrap();
//! let insert = WriteCommand::insert("COMPANY", Row::new().with("ID", Value::Long(1)));
//! assert_eq!(store.execute(&insert).unwrap().rows_affected, 1);
//! store.commit().unwrap();
//!
//! assert!(store.row("COMPANY", &Value::Long(1)).is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod command;
mod error;
mod executor;
mod memory;
mod value;

pub use command::{
    ColumnValue, CommandKind, Row, VersionQuery, VersionRow, WriteCommand, WriteOutcome,
};
pub use error::{StoreError, StoreResult};
pub use executor::{Store, TransactionService, WriteExecutor};
pub use memory::{ForeignKey, InMemoryStore, TableSchema, TransactionEvent, DEFAULT_LOCK_TIMEOUT};
pub use value::Value;
