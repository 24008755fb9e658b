//! Prepared write commands and version queries.

use crate::value::Value;
use std::fmt;

/// An ordered list of `(column, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column, builder style.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Sets a column, replacing an existing value for the same column.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    /// Gets the value of a column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    /// Removes a column, returning its value.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let index = self.columns.iter().position(|(c, _)| c == column)?;
        Some(self.columns.remove(index).1)
    }

    /// Copies every column of `other` into this row.
    pub fn merge(&mut self, other: &Row) {
        for (column, value) in other.iter() {
            self.set(column, value.clone());
        }
    }

    /// Iterates the columns in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Checks if the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A column paired with the value it must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnValue {
    /// Column name.
    pub column: String,
    /// Value to match or write.
    pub value: Value,
}

impl ColumnValue {
    /// Creates a column/value pair.
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Discriminant of a [`WriteCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Row insert.
    Insert,
    /// Row update.
    Update,
    /// Row delete.
    Delete,
    /// Join-table row insert.
    Link,
    /// Join-table row delete.
    Unlink,
}

/// A prepared data-manipulation command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCommand {
    /// Insert a row.
    Insert {
        /// Target table.
        table: String,
        /// Column values.
        row: Row,
    },
    /// Update the row matching `key`.
    Update {
        /// Target table.
        table: String,
        /// Primary key match.
        key: ColumnValue,
        /// Columns to set.
        values: Row,
        /// When present, the row only matches if this column holds this value.
        expected_version: Option<ColumnValue>,
    },
    /// Delete the row matching `key`.
    Delete {
        /// Target table.
        table: String,
        /// Primary key match.
        key: ColumnValue,
        /// When present, the row only matches if this column holds this value.
        expected_version: Option<ColumnValue>,
    },
    /// Insert a join-table row.
    Link {
        /// Join table.
        table: String,
        /// Owning side column and value.
        source: ColumnValue,
        /// Target side column and value.
        target: ColumnValue,
    },
    /// Delete a join-table row.
    Unlink {
        /// Join table.
        table: String,
        /// Owning side column and value.
        source: ColumnValue,
        /// Target side column and value.
        target: ColumnValue,
    },
}

impl WriteCommand {
    /// Creates an insert command.
    pub fn insert(table: impl Into<String>, row: Row) -> Self {
        Self::Insert {
            table: table.into(),
            row,
        }
    }

    /// Creates an update command without a version guard.
    pub fn update(table: impl Into<String>, key: ColumnValue, values: Row) -> Self {
        Self::Update {
            table: table.into(),
            key,
            values,
            expected_version: None,
        }
    }

    /// Creates a delete command without a version guard.
    pub fn delete(table: impl Into<String>, key: ColumnValue) -> Self {
        Self::Delete {
            table: table.into(),
            key,
            expected_version: None,
        }
    }

    /// Returns the target table.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::Link { table, .. }
            | Self::Unlink { table, .. } => table,
        }
    }

    /// Returns the command kind.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Insert { .. } => CommandKind::Insert,
            Self::Update { .. } => CommandKind::Update,
            Self::Delete { .. } => CommandKind::Delete,
            Self::Link { .. } => CommandKind::Link,
            Self::Unlink { .. } => CommandKind::Unlink,
        }
    }

    /// Returns the primary key value an insert, update or delete targets.
    #[must_use]
    pub fn key_value(&self, pk_column: &str) -> Option<&Value> {
        match self {
            Self::Insert { row, .. } => row.get(pk_column),
            Self::Update { key, .. } | Self::Delete { key, .. } => Some(&key.value),
            Self::Link { .. } | Self::Unlink { .. } => None,
        }
    }
}

/// Result of executing a [`WriteCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Number of rows the command touched.
    pub rows_affected: u64,
}

impl WriteOutcome {
    /// Creates an outcome.
    #[must_use]
    pub const fn new(rows_affected: u64) -> Self {
        Self { rows_affected }
    }
}

/// A batched existence/version query:
/// `SELECT pk, version FROM table WHERE pk IN (...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionQuery {
    /// Table to query.
    pub table: String,
    /// Primary key column.
    pub pk_column: String,
    /// Version column.
    pub version_column: String,
    /// Primary keys to look up.
    pub keys: Vec<Value>,
}

impl fmt::Display for VersionQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SELECT {}, {} FROM {} WHERE {} IN (",
            self.pk_column, self.version_column, self.table, self.pk_column
        )?;
        for (i, key) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}")?;
        }
        f.write_str(")")
    }
}

/// One row returned by a [`VersionQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRow {
    /// Primary key of the row.
    pub primary_key: Value,
    /// Current version column value.
    pub version: Value,
}
