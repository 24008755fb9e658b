//! In-memory relational store.

use crate::command::{
    ColumnValue, CommandKind, Row, VersionQuery, VersionRow, WriteCommand, WriteOutcome,
};
use crate::error::{StoreError, StoreResult};
use crate::executor::{TransactionService, WriteExecutor};
use crate::value::Value;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// How long `begin` waits for another connection's transaction by default.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// A foreign-key constraint: `column` must hold NULL or a primary key of
/// `references`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Constrained column.
    pub column: String,
    /// Referenced table.
    pub references: String,
}

/// Table definition for the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Primary key column; `None` for join tables, which hold a bag of rows.
    pub primary_key: Option<String>,
    /// Foreign-key constraints enforced on every write.
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableSchema {
    /// Creates a keyed table.
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: Some(primary_key.into()),
            foreign_keys: Vec::new(),
        }
    }

    /// Creates a join table without a primary key.
    pub fn join(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: None,
            foreign_keys: Vec::new(),
        }
    }

    /// Adds a foreign-key constraint.
    #[must_use]
    pub fn with_foreign_key(
        mut self,
        column: impl Into<String>,
        references: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.into(),
            references: references.into(),
        });
        self
    }
}

/// A transaction bracket observed by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEvent {
    /// `begin` succeeded.
    Begin,
    /// `commit` succeeded.
    Commit,
    /// `rollback` was requested.
    Rollback,
}

#[derive(Debug, Clone)]
struct Table {
    schema: TableSchema,
    keyed: BTreeMap<Value, Row>,
    bag: Vec<Row>,
}

impl Table {
    fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            keyed: BTreeMap::new(),
            bag: Vec::new(),
        }
    }
}

type Tables = BTreeMap<String, Table>;

#[derive(Debug)]
enum Fault {
    Command {
        table: String,
        kind: CommandKind,
        remaining: usize,
    },
    VersionQuery,
    Commit,
    Rollback,
}

/// Write lock shared by every connection of one store. At most one
/// transaction is open at a time.
#[derive(Debug, Default)]
struct WriterGate {
    busy: Mutex<bool>,
    released: Condvar,
}

impl WriterGate {
    /// Waits until no transaction is open, then claims the lock. Returns
    /// false on timeout.
    fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut busy = self.busy.lock();
        while *busy {
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut busy, deadline).timed_out() && *busy {
                        return false;
                    }
                }
                None => self.released.wait(&mut busy),
            }
        }
        *busy = true;
        true
    }

    fn release(&self) {
        *self.busy.lock() = false;
        self.released.notify_one();
    }
}

/// A relational store held in memory.
///
/// Committed data lives behind a shared lock; [`InMemoryStore::connect`]
/// opens further connections onto the same data. Transactions are
/// serializable: `begin` waits (up to the lock timeout) while another
/// connection has a transaction open. A transaction works on a private copy
/// of the tables that replaces the shared data on commit and is discarded on
/// rollback, so uncommitted writes are never visible to other connections
/// and every transaction sees the writes of the ones committed before it.
///
/// Every connection also records what it executed, which tests use to check
/// write order, and accepts injected faults.
#[derive(Debug)]
pub struct InMemoryStore {
    committed: Arc<RwLock<Tables>>,
    gate: Arc<WriterGate>,
    lock_timeout: Duration,
    working: Option<Tables>,
    executed: Vec<WriteCommand>,
    version_queries: Vec<VersionQuery>,
    events: Vec<TransactionEvent>,
    faults: Vec<Fault>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_shared(Arc::default(), Arc::default(), DEFAULT_LOCK_TIMEOUT)
    }
}

impl Drop for InMemoryStore {
    fn drop(&mut self) {
        if self.working.take().is_some() {
            self.gate.release();
        }
    }
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_shared(
        committed: Arc<RwLock<Tables>>,
        gate: Arc<WriterGate>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            committed,
            gate,
            lock_timeout,
            working: None,
            executed: Vec::new(),
            version_queries: Vec::new(),
            events: Vec::new(),
            faults: Vec::new(),
        }
    }

    /// Opens another connection onto the same committed data, sharing its
    /// write lock.
    #[must_use]
    pub fn connect(&self) -> Self {
        Self::with_shared(
            Arc::clone(&self.committed),
            Arc::clone(&self.gate),
            self.lock_timeout,
        )
    }

    /// Sets how long `begin` waits for another connection's transaction.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Creates (or replaces) a table.
    pub fn create_table(&mut self, schema: TableSchema) {
        self.committed
            .write()
            .insert(schema.name.clone(), Table::new(schema));
    }

    /// Inserts a committed row directly, outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the row violates a constraint.
    pub fn seed(&mut self, table: &str, row: Row) -> StoreResult<()> {
        let mut tables = self.committed.write();
        insert_row(&mut tables, table, row).map(|_| ())
    }

    /// Overwrites one column of a committed row outside any transaction, as an
    /// earlier commit by another writer would.
    ///
    /// # Errors
    ///
    /// Returns an error if the table or row does not exist.
    pub fn set_column(
        &mut self,
        table: &str,
        key: &Value,
        column: &str,
        value: impl Into<Value>,
    ) -> StoreResult<()> {
        let mut tables = self.committed.write();
        let row = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable {
                table: table.to_string(),
            })?
            .keyed
            .get_mut(key)
            .ok_or_else(|| StoreError::constraint(table, format!("no row with key {key}")))?;
        row.set(column, value);
        Ok(())
    }

    /// Returns a committed row by primary key.
    #[must_use]
    pub fn row(&self, table: &str, key: &Value) -> Option<Row> {
        self.committed.read().get(table)?.keyed.get(key).cloned()
    }

    /// Returns every committed row of a table, keyed rows in key order.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.committed
            .read()
            .get(table)
            .map(|t| t.keyed.values().chain(t.bag.iter()).cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of committed rows in a table.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.committed
            .read()
            .get(table)
            .map_or(0, |t| t.keyed.len() + t.bag.len())
    }

    /// Checks if this connection has an open transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.working.is_some()
    }

    /// Commands this connection executed successfully, including ones later
    /// rolled back.
    #[must_use]
    pub fn executed(&self) -> &[WriteCommand] {
        &self.executed
    }

    /// Version queries this connection ran.
    #[must_use]
    pub fn version_queries(&self) -> &[VersionQuery] {
        &self.version_queries
    }

    /// Transaction brackets this connection observed.
    #[must_use]
    pub fn events(&self) -> &[TransactionEvent] {
        &self.events
    }

    /// Clears the executed-command, query and event logs.
    pub fn clear_log(&mut self) {
        self.executed.clear();
        self.version_queries.clear();
        self.events.clear();
    }

    /// Makes the `nth` (1-based) command of `kind` against `table` fail.
    pub fn fail_on(&mut self, table: impl Into<String>, kind: CommandKind, nth: usize) {
        self.faults.push(Fault::Command {
            table: table.into(),
            kind,
            remaining: nth.max(1),
        });
    }

    /// Makes the next version query fail.
    pub fn fail_version_query(&mut self) {
        self.faults.push(Fault::VersionQuery);
    }

    /// Makes the next commit fail.
    pub fn fail_commit(&mut self) {
        self.faults.push(Fault::Commit);
    }

    /// Makes the next rollback fail as if the connection dropped.
    pub fn fail_rollback(&mut self) {
        self.faults.push(Fault::Rollback);
    }

    fn take_fault(&mut self, matches: impl Fn(&mut Fault) -> bool) -> bool {
        match self.faults.iter_mut().position(|f| matches(f)) {
            Some(index) => {
                self.faults.remove(index);
                true
            }
            None => false,
        }
    }

    fn command_fault(&mut self, command: &WriteCommand) -> bool {
        let kind = command.kind();
        let target = command.table();
        self.take_fault(|fault| match fault {
            Fault::Command {
                table,
                kind: k,
                remaining,
            } if table.as_str() == target && *k == kind => {
                *remaining -= 1;
                *remaining == 0
            }
            _ => false,
        })
    }
}

impl WriteExecutor for InMemoryStore {
    fn execute(&mut self, command: &WriteCommand) -> StoreResult<WriteOutcome> {
        if self.working.is_none() {
            return Err(StoreError::NoTransaction);
        }
        if self.command_fault(command) {
            return Err(StoreError::connection_lost(format!(
                "injected failure on {:?} {}",
                command.kind(),
                command.table()
            )));
        }
        trace!(table = command.table(), kind = ?command.kind(), "executing command");

        let tables = self.working.as_mut().ok_or(StoreError::NoTransaction)?;
        let outcome = match command {
            WriteCommand::Insert { table, row } => insert_row(tables, table, row.clone())?,
            WriteCommand::Update {
                table,
                key,
                values,
                expected_version,
            } => update_row(tables, table, key, values, expected_version.as_ref())?,
            WriteCommand::Delete {
                table,
                key,
                expected_version,
            } => delete_row(tables, table, key, expected_version.as_ref())?,
            WriteCommand::Link {
                table,
                source,
                target,
            } => {
                let row = Row::new()
                    .with(source.column.clone(), source.value.clone())
                    .with(target.column.clone(), target.value.clone());
                insert_row(tables, table, row)?
            }
            WriteCommand::Unlink {
                table,
                source,
                target,
            } => unlink_row(tables, table, source, target)?,
        };
        self.executed.push(command.clone());
        Ok(outcome)
    }

    fn select_versions(&mut self, query: &VersionQuery) -> StoreResult<Vec<VersionRow>> {
        if self.take_fault(|f| matches!(f, Fault::VersionQuery)) {
            return Err(StoreError::connection_lost("injected failure on version query"));
        }
        self.version_queries.push(query.clone());

        let committed;
        let tables = match &self.working {
            Some(working) => working,
            None => {
                committed = self.committed.read().clone();
                &committed
            }
        };
        let table = tables
            .get(&query.table)
            .ok_or_else(|| StoreError::UnknownTable {
                table: query.table.clone(),
            })?;

        let mut rows = Vec::new();
        for key in &query.keys {
            if let Some(row) = table.keyed.get(key) {
                rows.push(VersionRow {
                    primary_key: row.get(&query.pk_column).cloned().unwrap_or(Value::Null),
                    version: row
                        .get(&query.version_column)
                        .cloned()
                        .unwrap_or(Value::Null),
                });
            }
        }
        Ok(rows)
    }
}

impl TransactionService for InMemoryStore {
    fn begin(&mut self) -> StoreResult<()> {
        if self.working.is_some() {
            return Err(StoreError::TransactionActive);
        }
        if !self.gate.acquire(self.lock_timeout) {
            return Err(StoreError::LockTimeout {
                waited: self.lock_timeout,
            });
        }
        self.working = Some(self.committed.read().clone());
        self.events.push(TransactionEvent::Begin);
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        if self.working.is_none() {
            return Err(StoreError::NoTransaction);
        }
        if self.take_fault(|f| matches!(f, Fault::Commit)) {
            return Err(StoreError::connection_lost("injected failure on commit"));
        }
        if let Some(working) = self.working.take() {
            *self.committed.write() = working;
            self.gate.release();
        }
        self.events.push(TransactionEvent::Commit);
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.events.push(TransactionEvent::Rollback);
        let had_transaction = self.working.take().is_some();
        if had_transaction {
            self.gate.release();
        }
        if self.take_fault(|f| matches!(f, Fault::Rollback)) {
            return Err(StoreError::connection_lost("injected failure on rollback"));
        }
        if had_transaction {
            Ok(())
        } else {
            Err(StoreError::NoTransaction)
        }
    }
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> StoreResult<&'a mut Table> {
    tables.get_mut(name).ok_or_else(|| StoreError::UnknownTable {
        table: name.to_string(),
    })
}

fn check_foreign_keys(tables: &Tables, schema: &TableSchema, row: &Row) -> StoreResult<()> {
    for fk in &schema.foreign_keys {
        let Some(value) = row.get(&fk.column) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let exists = tables
            .get(&fk.references)
            .is_some_and(|t| t.keyed.contains_key(value));
        if !exists {
            return Err(StoreError::constraint(
                &schema.name,
                format!(
                    "{} = {} has no matching row in {}",
                    fk.column, value, fk.references
                ),
            ));
        }
    }
    Ok(())
}

fn insert_row(tables: &mut Tables, name: &str, row: Row) -> StoreResult<WriteOutcome> {
    let schema = table_mut(tables, name)?.schema.clone();
    check_foreign_keys(tables, &schema, &row)?;

    let table = table_mut(tables, name)?;
    match &schema.primary_key {
        Some(pk_column) => {
            let key = row
                .get(pk_column)
                .filter(|v| !v.is_null())
                .cloned()
                .ok_or_else(|| StoreError::constraint(name, format!("{pk_column} is NULL")))?;
            if table.keyed.contains_key(&key) {
                return Err(StoreError::constraint(
                    name,
                    format!("duplicate primary key {key}"),
                ));
            }
            table.keyed.insert(key, row);
        }
        None => table.bag.push(row),
    }
    Ok(WriteOutcome::new(1))
}

fn version_matches(row: &Row, expected: Option<&ColumnValue>) -> bool {
    expected.map_or(true, |e| row.get(&e.column) == Some(&e.value))
}

fn update_row(
    tables: &mut Tables,
    name: &str,
    key: &ColumnValue,
    values: &Row,
    expected_version: Option<&ColumnValue>,
) -> StoreResult<WriteOutcome> {
    let table = table_mut(tables, name)?;
    let schema = table.schema.clone();
    let Some(existing) = table.keyed.get(&key.value) else {
        return Ok(WriteOutcome::new(0));
    };
    if !version_matches(existing, expected_version) {
        return Ok(WriteOutcome::new(0));
    }
    let mut merged = existing.clone();
    merged.merge(values);
    check_foreign_keys(tables, &schema, &merged)?;

    table_mut(tables, name)?
        .keyed
        .insert(key.value.clone(), merged);
    Ok(WriteOutcome::new(1))
}

fn delete_row(
    tables: &mut Tables,
    name: &str,
    key: &ColumnValue,
    expected_version: Option<&ColumnValue>,
) -> StoreResult<WriteOutcome> {
    let table = table_mut(tables, name)?;
    let Some(existing) = table.keyed.get(&key.value) else {
        return Ok(WriteOutcome::new(0));
    };
    if !version_matches(existing, expected_version) {
        return Ok(WriteOutcome::new(0));
    }

    for other in tables.values() {
        for fk in other.schema.foreign_keys.iter().filter(|fk| fk.references == name) {
            let referenced = other
                .keyed
                .values()
                .chain(other.bag.iter())
                .any(|row| row.get(&fk.column) == Some(&key.value));
            if referenced {
                return Err(StoreError::constraint(
                    name,
                    format!(
                        "row {} is still referenced by {}.{}",
                        key.value, other.schema.name, fk.column
                    ),
                ));
            }
        }
    }

    table_mut(tables, name)?.keyed.remove(&key.value);
    Ok(WriteOutcome::new(1))
}

fn unlink_row(
    tables: &mut Tables,
    name: &str,
    source: &ColumnValue,
    target: &ColumnValue,
) -> StoreResult<WriteOutcome> {
    let table = table_mut(tables, name)?;
    let position = table.bag.iter().position(|row| {
        row.get(&source.column) == Some(&source.value)
            && row.get(&target.column) == Some(&target.value)
    });
    match position {
        Some(index) => {
            table.bag.remove(index);
            Ok(WriteOutcome::new(1))
        }
        None => Ok(WriteOutcome::new(0)),
    }
}
