//! Commit engine configuration.

/// Order in which existing change records of one type are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeOrdering {
    /// The order the change set registered them in.
    #[default]
    Registration,
    /// Ascending primary key, so concurrent commits lock rows in the same
    /// order.
    PrimaryKey,
    /// Grouped by the set of names changed, so records producing the same
    /// statement shape are written back to back; ascending primary key
    /// within a group.
    Changes,
}

/// Configuration for a [`crate::CommitEngine`].
#[derive(Debug, Clone)]
pub struct CommitConfig {
    /// Order of existing change records within a type.
    pub change_ordering: ChangeOrdering,

    /// Whether deletions within a type are sorted by primary key.
    pub order_deletes_by_primary_key: bool,

    /// Maximum number of keys in one version query `IN (...)` list.
    pub max_version_batch: usize,

    /// Whether a change set with at most one record skips the commit-order
    /// walk.
    pub single_change_fast_path: bool,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            change_ordering: ChangeOrdering::Registration,
            order_deletes_by_primary_key: false,
            max_version_batch: 1000,
            single_change_fast_path: true,
        }
    }
}

impl CommitConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the change ordering within a type.
    #[must_use]
    pub const fn change_ordering(mut self, value: ChangeOrdering) -> Self {
        self.change_ordering = value;
        self
    }

    /// Sets whether deletions are sorted by primary key.
    #[must_use]
    pub const fn order_deletes_by_primary_key(mut self, value: bool) -> Self {
        self.order_deletes_by_primary_key = value;
        self
    }

    /// Sets the maximum version query batch size (at least 1).
    #[must_use]
    pub const fn max_version_batch(mut self, size: usize) -> Self {
        self.max_version_batch = if size == 0 { 1 } else { size };
        self
    }

    /// Sets whether single-record change sets skip the order walk.
    #[must_use]
    pub const fn single_change_fast_path(mut self, value: bool) -> Self {
        self.single_change_fast_path = value;
        self
    }
}
