//! Batched optimistic-lock verification.

use crate::error::{CommitError, CommitResult};
use crate::types::{EntityType, Version};
use std::collections::HashMap;
use stratum_store::{Value, VersionQuery, WriteExecutor};
use tracing::debug;

/// Expected versions of one type's unchanged-but-locked objects.
///
/// Objects are recorded during the per-type pass and verified together with
/// a single `SELECT pk, version ... WHERE pk IN (...)` query once the pass
/// ends. Keys compare by value, so an `Int` key matches a `Long` row.
#[derive(Debug)]
pub struct VersionCheckBatch {
    entity_type: EntityType,
    expected: HashMap<Value, Option<Version>>,
    order: Vec<Value>,
}

impl VersionCheckBatch {
    /// Creates an empty batch for a type.
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            expected: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Returns the type being checked.
    #[must_use]
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Records the version an object was read at. Recording the same key
    /// again replaces the expectation.
    pub fn record_expected_version(&mut self, primary_key: Value, version: Option<Version>) {
        if self.expected.insert(primary_key.clone(), version).is_none() {
            self.order.push(primary_key);
        }
    }

    /// Returns the number of recorded keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Checks if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Verifies every recorded version and empties the batch.
    ///
    /// Keys are sent in recording order, at most `max_batch` per query.
    /// Returns the number of keys verified.
    ///
    /// # Errors
    ///
    /// Returns `OptimisticLockConflict` for the first key whose row is
    /// missing, has a NULL version or a version other than expected, and
    /// `WriteExecution` if the query fails.
    pub fn flush<E: WriteExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
        table: &str,
        pk_column: &str,
        version_column: &str,
        max_batch: usize,
    ) -> CommitResult<usize> {
        let keys = std::mem::take(&mut self.order);
        let expected = std::mem::take(&mut self.expected);
        if keys.is_empty() {
            return Ok(0);
        }

        for chunk in keys.chunks(max_batch.max(1)) {
            let query = VersionQuery {
                table: table.to_string(),
                pk_column: pk_column.to_string(),
                version_column: version_column.to_string(),
                keys: chunk.to_vec(),
            };
            debug!(entity_type = %self.entity_type, keys = chunk.len(), "checking versions");
            let rows = executor.select_versions(&query)?;

            let found: HashMap<&Value, &Value> = rows
                .iter()
                .map(|row| (&row.primary_key, &row.version))
                .collect();
            for key in chunk {
                let wanted = expected.get(key).copied().flatten();
                let current = found.get(key).and_then(|v| Version::from_value(v));
                if current.is_none() || current != wanted {
                    return Err(CommitError::conflict(
                        self.entity_type.clone(),
                        key.clone(),
                        wanted,
                        current,
                    ));
                }
            }
        }
        Ok(keys.len())
    }
}
