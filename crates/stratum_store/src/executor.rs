//! Store service traits.

use crate::command::{VersionQuery, VersionRow, WriteCommand, WriteOutcome};
use crate::error::StoreResult;

/// Executes prepared commands against the backing store.
///
/// The commit engine treats an executor as an opaque synchronous call: it
/// hands over a fully bound command and either gets an outcome back or a
/// store-level failure.
///
/// # Invariants
///
/// - `execute` reports the number of rows the command matched
/// - an update or delete carrying an expected version matches zero rows when
///   the stored version differs
/// - `select_versions` returns at most one row per requested key, and no row
///   for keys that do not exist
pub trait WriteExecutor {
    /// Executes one write command.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the command (constraint
    /// violation, unknown table, lost connection).
    fn execute(&mut self, command: &WriteCommand) -> StoreResult<WriteOutcome>;

    /// Runs a batched existence/version query.
    ///
    /// # Errors
    ///
    /// Returns an error if the query cannot be executed.
    fn select_versions(&mut self, query: &VersionQuery) -> StoreResult<Vec<VersionRow>>;
}

/// Transaction bracketing for a store connection.
pub trait TransactionService {
    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction is already open or the store is
    /// unreachable.
    fn begin(&mut self) -> StoreResult<()>;

    /// Makes every write since `begin` durable and visible.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open or the commit fails.
    fn commit(&mut self) -> StoreResult<()>;

    /// Discards every write since `begin`.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is open or the connection dropped.
    fn rollback(&mut self) -> StoreResult<()>;
}

/// A connection offering both services.
pub trait Store: WriteExecutor + TransactionService + Send {}

impl<T: WriteExecutor + TransactionService + Send> Store for T {}
