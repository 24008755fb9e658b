//! Commit orchestrator.

use super::deferred::{DeferredWork, ModificationEvent};
use super::state::{CommitProgress, CommitTracker};
use super::version::VersionCheckBatch;
use crate::change::{ChangeRecord, ChangeSet, FieldDelta};
use crate::config::{ChangeOrdering, CommitConfig};
use crate::entity::ObjectRef;
use crate::error::{CommitError, CommitResult};
use crate::metadata::{EntityDescriptor, LockingPolicy, Registry, SecondaryTable};
use crate::order::CommitOrder;
use crate::types::{CommitId, EntityType, Version};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use stratum_store::{ColumnValue, CommandKind, Row, Store, Value, VersionQuery, WriteCommand};
use tracing::{debug, info_span, trace, warn};

/// Phase of a commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    /// Nothing has touched the store yet.
    Init,
    /// The transaction is open.
    TransactionOpen,
    /// Walking the commit order.
    PerClassPass,
    /// Flushing deferred events and calls.
    DeferredFlush,
    /// Deleting in reverse commit order.
    Deletions,
    /// The transaction committed.
    Committed,
    /// The attempt failed and was rolled back.
    Aborted,
}

/// What a successful commit wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    /// Identifier of the attempt.
    pub commit_id: CommitId,
    /// Rows inserted into main tables.
    pub inserted: usize,
    /// Rows updated in main tables.
    pub updated: usize,
    /// Unchanged objects whose version was verified.
    pub version_checked: usize,
    /// Updates completing a shallow write.
    pub shallow_completions: usize,
    /// Deferred modification events executed.
    pub deferred_modifications: usize,
    /// Deferred calls executed.
    pub deferred_calls: usize,
    /// Rows deleted from main tables.
    pub deleted: usize,
}

impl CommitReport {
    fn new(commit_id: CommitId) -> Self {
        Self {
            commit_id,
            inserted: 0,
            updated: 0,
            version_checked: 0,
            shallow_completions: 0,
            deferred_modifications: 0,
            deferred_calls: 0,
            deleted: 0,
        }
    }

    /// Total number of write commands executed.
    #[must_use]
    pub fn commands_executed(&self) -> usize {
        self.inserted
            + self.updated
            + self.shallow_completions
            + self.deferred_modifications
            + self.deferred_calls
            + self.deleted
    }
}

/// Registry together with the order computed from it.
#[derive(Debug)]
struct CommitPlan {
    registry: Registry,
    order: CommitOrder,
}

impl CommitPlan {
    fn build(registry: Registry) -> CommitResult<Self> {
        let order = CommitOrder::from_registry(&registry)?;
        Ok(Self { registry, order })
    }

    fn validate<'t>(&self, types: impl IntoIterator<Item = &'t EntityType>) -> CommitResult<()> {
        for entity_type in types {
            self.registry.get(entity_type)?;
        }
        Ok(())
    }
}

/// Writes units of work to a store.
///
/// The engine holds the metadata and the commit order computed from it. It
/// is shared between threads; every call runs its own attempt against the
/// store connection it is handed, and keeps the plan it started with even if
/// [`CommitEngine::reload`] installs a new one meanwhile.
///
/// # Example
///
/// ```rust
/// use stratum_core::{
///     ChangeRecord, ChangeSet, CommitConfig, CommitEngine, Entity, EntityDescriptor,
///     EntityType, ObjectRef, Registry,
/// };
/// use stratum_store::{InMemoryStore, TableSchema, Value};
///
/// #[derive(Debug)]
/// struct Company {
///     entity_type: EntityType,
///     id: i64,
/// }
///
/// impl Entity for Company {
///     fn entity_type(&self) -> &EntityType {
///         &self.entity_type
///     }
///     fn primary_key(&self) -> Value {
///         Value::Long(self.id)
///     }
/// }
///
/// let registry = Registry::new().with(EntityDescriptor::new("Company", "COMPANY", "ID"));
/// let engine = CommitEngine::new(registry, CommitConfig::default())?;
///
/// let mut store = InMemoryStore::new();
/// store.create_table(TableSchema::new("COMPANY", "ID"));
///
/// let acme = ObjectRef::new(Company { entity_type: "Company".into(), id: 1 });
/// let mut changes = ChangeSet::new();
/// changes.add(ChangeRecord::new_object(acme).with_value("NAME", "Acme"));
///
/// let report = engine.commit(&changes, &mut store)?;
/// assert_eq!(report.inserted, 1);
/// assert_eq!(store.row_count("COMPANY"), 1);
/// # Ok::<(), stratum_core::CommitError>(())
/// ```
#[derive(Debug)]
pub struct CommitEngine {
    plan: RwLock<Arc<CommitPlan>>,
    config: CommitConfig,
}

impl CommitEngine {
    /// Creates an engine, computing the commit order up front.
    ///
    /// # Errors
    ///
    /// Returns `CyclicDependency` or `UnknownEntityType` if the explicit
    /// dependencies cannot be satisfied.
    pub fn new(registry: Registry, config: CommitConfig) -> CommitResult<Self> {
        Ok(Self {
            plan: RwLock::new(Arc::new(CommitPlan::build(registry)?)),
            config,
        })
    }

    /// Installs new metadata and rebuilds the commit order.
    ///
    /// Attempts already running finish with the order they started with.
    /// On error the previous metadata stays installed.
    ///
    /// # Errors
    ///
    /// Same as [`CommitEngine::new`].
    pub fn reload(&self, registry: Registry) -> CommitResult<()> {
        let plan = CommitPlan::build(registry)?;
        debug!(types = plan.order.len(), "reloaded metadata");
        *self.plan.write() = Arc::new(plan);
        Ok(())
    }

    /// Returns the current commit order.
    #[must_use]
    pub fn commit_order(&self) -> CommitOrder {
        self.plan.read().order.clone()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CommitConfig {
        &self.config
    }

    fn snapshot(&self) -> Arc<CommitPlan> {
        Arc::clone(&self.plan.read())
    }

    /// Commits a unit of work in one transaction.
    ///
    /// Every object is inserted or updated at most once; the transaction is
    /// rolled back on the first failure and the failure returned.
    ///
    /// # Errors
    ///
    /// - `UnknownEntityType` if the change set names an unregistered type;
    ///   raised before the transaction opens
    /// - `OptimisticLockConflict` if a versioned row changed since it was read
    /// - `WriteExecution` if the store rejects a command or the commit
    /// - `DuplicateComponent` or `InvalidOperation` for inconsistent input
    pub fn commit<S: Store + ?Sized>(
        &self,
        changes: &ChangeSet,
        store: &mut S,
    ) -> CommitResult<CommitReport> {
        let plan = self.snapshot();
        plan.validate(&changes.entity_types())?;

        let mut ctx = CommitContext::new(&plan, &self.config, Some(changes), None);
        let span = info_span!("commit", id = %ctx.id);
        let _enter = span.enter();
        debug!(
            records = changes.len(),
            deletions = changes.deletions().len(),
            "starting commit"
        );

        let outcome = match ctx.open(store) {
            Ok(()) => ctx.write_changes(store, changes),
            Err(err) => Err(err),
        };
        ctx.finish(store, outcome)
    }

    /// Writes one object in its own transaction, outside a unit of work.
    ///
    /// References to objects without a record are written as plain foreign
    /// keys; a reference to the object itself is completed with a second
    /// update.
    ///
    /// # Errors
    ///
    /// Same as [`CommitEngine::commit`].
    pub fn write_object<S: Store + ?Sized>(
        &self,
        record: &ChangeRecord,
        store: &mut S,
    ) -> CommitResult<CommitReport> {
        let plan = self.snapshot();
        plan.validate([record.entity_type()])?;

        let mut ctx = CommitContext::new(&plan, &self.config, None, Some(record));
        let span = info_span!("write_object", id = %ctx.id, object = ?record.object());
        let _enter = span.enter();

        let outcome = match ctx.open(store) {
            Ok(()) => ctx.write_single(store, record),
            Err(err) => Err(err),
        };
        ctx.finish(store, outcome)
    }

    /// Deletes objects in one transaction, dependents first.
    ///
    /// # Errors
    ///
    /// `UnknownEntityType` before the transaction opens, then
    /// `OptimisticLockConflict` or `WriteExecution` as for a commit.
    pub fn delete_all_objects<S: Store + ?Sized>(
        &self,
        objects: &[ObjectRef],
        store: &mut S,
    ) -> CommitResult<CommitReport> {
        let plan = self.snapshot();
        plan.validate(objects.iter().map(|o| o.entity_type()))?;

        let mut ctx = CommitContext::new(&plan, &self.config, None, None);
        let span = info_span!("delete_all_objects", id = %ctx.id, objects = objects.len());
        let _enter = span.enter();

        let outcome = match ctx.open(store) {
            Ok(()) => {
                for object in objects {
                    ctx.tracker.mark_ignore(object);
                    ctx.schedule_deletion(object);
                }
                ctx.delete_scheduled(store)
            }
            Err(err) => Err(err),
        };
        ctx.finish(store, outcome)
    }
}

/// A foreign key left out of a row because its target was still being
/// written.
#[derive(Debug)]
struct ShallowWrite {
    owner: ObjectRef,
    table: String,
    pk_column: String,
    column: String,
    target: ObjectRef,
}

/// State of one commit attempt.
struct CommitContext<'a> {
    plan: &'a CommitPlan,
    config: &'a CommitConfig,
    changes: Option<&'a ChangeSet>,
    single: Option<&'a ChangeRecord>,
    id: CommitId,
    phase: CommitPhase,
    tracker: CommitTracker,
    deferred: DeferredWork,
    ledger: HashMap<EntityType, VersionCheckBatch>,
    pending_shallow: Vec<ShallowWrite>,
    deletions: Vec<ObjectRef>,
    scheduled: HashSet<ObjectRef>,
    commands: HashMap<(EntityType, CommandKind), WriteCommand>,
    inserted: Vec<&'a ChangeRecord>,
    report: CommitReport,
}

impl<'a> CommitContext<'a> {
    fn new(
        plan: &'a CommitPlan,
        config: &'a CommitConfig,
        changes: Option<&'a ChangeSet>,
        single: Option<&'a ChangeRecord>,
    ) -> Self {
        let id = CommitId::new();
        Self {
            plan,
            config,
            changes,
            single,
            id,
            phase: CommitPhase::Init,
            tracker: CommitTracker::new(),
            deferred: DeferredWork::new(),
            ledger: HashMap::new(),
            pending_shallow: Vec::new(),
            deletions: Vec::new(),
            scheduled: HashSet::new(),
            commands: HashMap::new(),
            inserted: Vec::new(),
            report: CommitReport::new(id),
        }
    }

    fn enter(&mut self, phase: CommitPhase) {
        debug!(from = ?self.phase, to = ?phase, "commit phase");
        self.phase = phase;
    }

    fn open<S: Store + ?Sized>(&mut self, store: &mut S) -> CommitResult<()> {
        self.tracker.reset();
        store.begin()?;
        self.enter(CommitPhase::TransactionOpen);
        Ok(())
    }

    /// Commits or rolls back, then clears the attempt's state.
    fn finish<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        outcome: CommitResult<()>,
    ) -> CommitResult<CommitReport> {
        let outcome = outcome.and_then(|()| store.commit().map_err(CommitError::from));
        let result = match outcome {
            Ok(()) => {
                self.enter(CommitPhase::Committed);
                for record in &self.inserted {
                    record.mark_materialized();
                }
                debug!(
                    inserted = self.report.inserted,
                    updated = self.report.updated,
                    deleted = self.report.deleted,
                    "committed"
                );
                Ok(self.report.clone())
            }
            Err(err) => {
                if self.phase != CommitPhase::Init {
                    rollback_quietly(store, &err);
                }
                self.enter(CommitPhase::Aborted);
                Err(err)
            }
        };
        self.cleanup();
        result
    }

    fn cleanup(&mut self) {
        self.tracker.reset();
        self.deferred.clear();
        self.ledger.clear();
        self.pending_shallow.clear();
        self.deletions.clear();
        self.scheduled.clear();
        self.commands.clear();
        self.inserted.clear();
    }

    fn write_changes<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        changes: &'a ChangeSet,
    ) -> CommitResult<()> {
        self.tracker.set_active(true);
        for object in changes.deletions() {
            self.tracker.mark_ignore(object);
            self.schedule_deletion(object);
        }

        self.enter(CommitPhase::PerClassPass);
        if self.config.single_change_fast_path && changes.len() <= 1 {
            let single = changes
                .first_changed_type()
                .or_else(|| changes.first_new_type());
            if let Some(entity_type) = single {
                debug!(entity_type = %entity_type, "single change, skipping commit order");
                self.write_type(store, changes, entity_type)?;
            }
        } else {
            let plan = self.plan;
            for entity_type in &plan.order {
                self.write_type(store, changes, entity_type)?;
            }
        }
        self.end_pass(store)?;
        self.flush_deferred(store)?;
        self.delete_scheduled(store)
    }

    fn write_single<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        record: &'a ChangeRecord,
    ) -> CommitResult<()> {
        self.enter(CommitPhase::PerClassPass);
        self.write_record(store, record)?;
        self.end_pass(store)?;
        self.flush_deferred(store)?;
        self.delete_scheduled(store)
    }

    /// Existing records first, then the type's version checks, then new
    /// records.
    fn write_type<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        changes: &'a ChangeSet,
        entity_type: &EntityType,
    ) -> CommitResult<()> {
        let mut changed: Vec<&'a ChangeRecord> = changes.changed_objects(entity_type).iter().collect();
        match self.config.change_ordering {
            ChangeOrdering::Registration => {}
            ChangeOrdering::PrimaryKey => {
                changed.sort_by_key(|record| record.object().primary_key());
            }
            ChangeOrdering::Changes => {
                changed.sort_by_cached_key(|&record| {
                    (record.changed_names(), record.object().primary_key())
                });
            }
        }
        for record in changed {
            self.write_record(store, record)?;
        }
        self.flush_versions(store, entity_type)?;

        for record in changes.new_objects(entity_type) {
            self.write_record(store, record)?;
        }
        Ok(())
    }

    fn record_of(&self, object: &ObjectRef) -> Option<&'a ChangeRecord> {
        if let Some(single) = self.single {
            if single.object() == object {
                return Some(single);
            }
        }
        self.changes.and_then(|changes| changes.record(object))
    }

    fn write_record<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        record: &'a ChangeRecord,
    ) -> CommitResult<()> {
        let object = record.object();
        if self.tracker.is_processed(object) {
            return Ok(());
        }
        let plan = self.plan;
        let descriptor = plan.registry.get(object.entity_type())?;
        self.tracker.mark_pre_modify(object);

        if record.is_version_check_only() {
            if descriptor.locking().is_some() {
                let Some(version) = object.version() else {
                    return Err(CommitError::invalid_operation(format!(
                        "{object:?} is versioned but carries no version"
                    )));
                };
                self.ledger
                    .entry(object.entity_type().clone())
                    .or_insert_with(|| VersionCheckBatch::new(object.entity_type().clone()))
                    .record_expected_version(object.primary_key(), Some(version));
            }
            self.tracker.mark_post_modify(object);
            self.tracker.mark_complete(object);
            return Ok(());
        }

        let mut values = Row::new();
        let mut omitted = false;
        for delta in record.deltas() {
            match delta {
                FieldDelta::Value { column, value } => values.set(column.clone(), value.clone()),
                FieldDelta::Reference { field, target } => {
                    let reference = descriptor.reference(field).ok_or_else(|| {
                        CommitError::invalid_operation(format!(
                            "{} has no reference named {field}",
                            descriptor.entity_type()
                        ))
                    })?;
                    let Some(target) = target else {
                        values.set(reference.column.clone(), Value::Null);
                        continue;
                    };
                    if let Some(target_record) = self.record_of(target).filter(|r| r.is_new()) {
                        if self.tracker.is_in_pre_modify(target) {
                            trace!(owner = ?object, target = ?target, column = %reference.column, "circular reference, writing shallow");
                            self.pending_shallow.push(ShallowWrite {
                                owner: object.clone(),
                                table: descriptor.table().to_string(),
                                pk_column: descriptor.primary_key().to_string(),
                                column: reference.column.clone(),
                                target: target.clone(),
                            });
                            omitted = true;
                            continue;
                        }
                        self.write_record(store, target_record)?;
                    }
                    values.set(reference.column.clone(), target.primary_key());
                }
                FieldDelta::LinkAdded { .. }
                | FieldDelta::LinkRemoved { .. }
                | FieldDelta::Orphaned { .. } => {}
            }
        }

        let secondary = split_secondary(descriptor, &mut values);
        if record.is_new() {
            self.insert(store, descriptor, record, values, secondary)?;
        } else {
            self.update(store, descriptor, record, values, secondary)?;
        }

        if omitted {
            self.tracker.mark_shallow_committed(object);
        }
        self.tracker.mark_post_modify(object);
        self.complete_shallow_writes(store)?;
        self.queue_collection_changes(descriptor, record)?;
        self.tracker.mark_complete(object);
        Ok(())
    }

    fn prepared(&mut self, descriptor: &EntityDescriptor, kind: CommandKind) -> WriteCommand {
        self.commands
            .entry((descriptor.entity_type().clone(), kind))
            .or_insert_with(|| {
                let table = descriptor.table();
                let key = ColumnValue::new(descriptor.primary_key(), Value::Null);
                match kind {
                    CommandKind::Insert => WriteCommand::insert(table, Row::new()),
                    CommandKind::Delete => WriteCommand::delete(table, key),
                    _ => WriteCommand::update(table, key, Row::new()),
                }
            })
            .clone()
    }

    fn insert<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        descriptor: &'a EntityDescriptor,
        record: &'a ChangeRecord,
        values: Row,
        secondary: Vec<(&'a SecondaryTable, Row)>,
    ) -> CommitResult<()> {
        let object = record.object();
        let key = object.primary_key();
        let mut row = Row::new().with(descriptor.primary_key(), key.clone());
        if let Some(locking) = descriptor.locking() {
            let version = object.version().unwrap_or_else(|| locking.kind.initial());
            row.set(locking.column.clone(), version.to_value());
        }
        row.merge(&values);

        let mut command = self.prepared(descriptor, CommandKind::Insert);
        if let WriteCommand::Insert { row: slot, .. } = &mut command {
            *slot = row;
        }
        trace!(object = ?object, table = descriptor.table(), "insert");
        store.execute(&command)?;
        self.report.inserted += 1;

        for (table, columns) in secondary {
            let mut row = Row::new().with(table.primary_key.clone(), key.clone());
            row.merge(&columns);
            self.deferred
                .enqueue_call(&table.table, WriteCommand::insert(table.table.clone(), row));
        }
        self.inserted.push(record);
        Ok(())
    }

    fn update<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        descriptor: &'a EntityDescriptor,
        record: &'a ChangeRecord,
        mut values: Row,
        secondary: Vec<(&'a SecondaryTable, Row)>,
    ) -> CommitResult<()> {
        let object = record.object();
        let key = object.primary_key();
        let collection_changes = record.deltas().iter().any(|d| !d.is_row_change());
        let touches_row = !values.is_empty() || secondary.iter().any(|(_, row)| !row.is_empty());

        let mut expected: Option<(&LockingPolicy, Version)> = None;
        if let Some(locking) = descriptor.locking() {
            if touches_row || (locking.cascaded && collection_changes) {
                let current = object.version().ok_or_else(|| {
                    CommitError::invalid_operation(format!(
                        "{object:?} is versioned but carries no version"
                    ))
                })?;
                values.set(locking.column.clone(), current.next().to_value());
                expected = Some((locking, current));
            }
        }

        if !values.is_empty() {
            let mut command = self.prepared(descriptor, CommandKind::Update);
            if let WriteCommand::Update {
                key: slot,
                values: columns,
                expected_version,
                ..
            } = &mut command
            {
                slot.value = key.clone();
                *columns = values;
                *expected_version = expected
                    .map(|(locking, current)| ColumnValue::new(locking.column.clone(), current.to_value()));
            }
            trace!(object = ?object, table = descriptor.table(), "update");
            let outcome = store.execute(&command)?;
            if outcome.rows_affected == 0 {
                if let Some((locking, current)) = expected {
                    let found = current_version(store, descriptor, locking, &key)?;
                    return Err(CommitError::conflict(
                        object.entity_type().clone(),
                        key,
                        Some(current),
                        found,
                    ));
                }
                trace!(object = ?object, "update matched no row");
            } else {
                self.report.updated += 1;
            }
        }

        for (table, columns) in secondary {
            if columns.is_empty() {
                continue;
            }
            let command = WriteCommand::update(
                table.table.clone(),
                ColumnValue::new(table.primary_key.clone(), key.clone()),
                columns,
            );
            store.execute(&command)?;
        }
        Ok(())
    }

    /// Issues the completing update of every shallow write whose owner and
    /// target rows both exist now.
    fn complete_shallow_writes<S: Store + ?Sized>(&mut self, store: &mut S) -> CommitResult<()> {
        if self.pending_shallow.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending_shallow);
        let (ready, waiting): (Vec<_>, Vec<_>) = pending.into_iter().partition(|write| {
            self.tracker.is_completed_or_ignored(&write.owner)
                && self.tracker.is_completed_or_ignored(&write.target)
        });
        self.pending_shallow = waiting;

        for write in ready {
            if self.tracker.state_of(&write.target) == Some(CommitProgress::Ignore) {
                continue;
            }
            let command = WriteCommand::update(
                write.table.clone(),
                ColumnValue::new(write.pk_column.clone(), write.owner.primary_key()),
                Row::new().with(write.column.clone(), write.target.primary_key()),
            );
            trace!(owner = ?write.owner, column = %write.column, "completing shallow write");
            store.execute(&command)?;
            self.report.shallow_completions += 1;
            if !self.pending_shallow.iter().any(|w| w.owner == write.owner) {
                self.tracker.clear_shallow_committed(&write.owner);
            }
        }
        Ok(())
    }

    fn queue_collection_changes(
        &mut self,
        descriptor: &'a EntityDescriptor,
        record: &'a ChangeRecord,
    ) -> CommitResult<()> {
        let object = record.object();
        for delta in record.deltas() {
            match delta {
                FieldDelta::LinkAdded { mapping, target }
                | FieldDelta::LinkRemoved { mapping, target } => {
                    let join = descriptor.join_mapping(mapping).ok_or_else(|| {
                        CommitError::invalid_operation(format!(
                            "{} has no join mapping named {mapping}",
                            descriptor.entity_type()
                        ))
                    })?;
                    let table = join.table.clone();
                    let source = ColumnValue::new(join.source_column.clone(), object.primary_key());
                    let target = ColumnValue::new(join.target_column.clone(), target.primary_key());
                    let command = if matches!(delta, FieldDelta::LinkAdded { .. }) {
                        WriteCommand::Link { table, source, target }
                    } else {
                        WriteCommand::Unlink { table, source, target }
                    };
                    self.deferred
                        .enqueue_modification(&join.name, ModificationEvent::new(command))?;
                }
                FieldDelta::Orphaned { target } => {
                    self.plan.registry.get(target.entity_type())?;
                    self.deferred.register_component(target)?;
                    self.tracker.mark_ignore(target);
                    self.schedule_deletion(target);
                }
                FieldDelta::Value { .. } | FieldDelta::Reference { .. } => {}
            }
        }
        Ok(())
    }

    fn end_pass<S: Store + ?Sized>(&mut self, store: &mut S) -> CommitResult<()> {
        let plan = self.plan;
        let mut remaining: Vec<EntityType> = self.ledger.keys().cloned().collect();
        remaining.sort_by_key(|t| plan.order.position(t));
        for entity_type in &remaining {
            self.flush_versions(store, entity_type)?;
        }

        if let Some(write) = self.pending_shallow.first() {
            return Err(CommitError::invalid_operation(format!(
                "circular reference from {:?} to {:?} was never completed",
                write.owner, write.target
            )));
        }
        Ok(())
    }

    fn flush_versions<S: Store + ?Sized>(
        &mut self,
        store: &mut S,
        entity_type: &EntityType,
    ) -> CommitResult<()> {
        let Some(mut batch) = self.ledger.remove(entity_type) else {
            return Ok(());
        };
        let descriptor = self.plan.registry.get(entity_type)?;
        let Some(locking) = descriptor.locking() else {
            return Ok(());
        };
        self.report.version_checked += batch.flush(
            store,
            descriptor.table(),
            descriptor.primary_key(),
            &locking.column,
            self.config.max_version_batch,
        )?;
        Ok(())
    }

    fn flush_deferred<S: Store + ?Sized>(&mut self, store: &mut S) -> CommitResult<()> {
        self.enter(CommitPhase::DeferredFlush);
        self.report.deferred_modifications += self.deferred.flush_modifications(store)?;
        self.report.deferred_calls += self.deferred.flush_calls(store)?;
        Ok(())
    }

    fn schedule_deletion(&mut self, object: &ObjectRef) {
        if self.scheduled.insert(object.clone()) {
            self.deletions.push(object.clone());
        }
    }

    /// Deletes every scheduled object in reverse commit order.
    fn delete_scheduled<S: Store + ?Sized>(&mut self, store: &mut S) -> CommitResult<()> {
        self.enter(CommitPhase::Deletions);
        let deletions = std::mem::take(&mut self.deletions);
        if let [object] = deletions.as_slice() {
            return self.delete_one(store, object);
        }

        let mut by_type: HashMap<&EntityType, Vec<&ObjectRef>> = HashMap::new();
        for object in &deletions {
            by_type.entry(object.entity_type()).or_default().push(object);
        }
        let plan = self.plan;
        for entity_type in plan.order.iter().rev() {
            let Some(mut group) = by_type.remove(entity_type) else {
                continue;
            };
            if self.config.order_deletes_by_primary_key {
                group.sort_by_key(|object| object.primary_key());
            }
            for object in group {
                self.delete_one(store, object)?;
            }
        }
        if let Some(entity_type) = by_type.into_keys().next() {
            return Err(CommitError::unknown_type(entity_type));
        }
        Ok(())
    }

    fn delete_one<S: Store + ?Sized>(&mut self, store: &mut S, object: &ObjectRef) -> CommitResult<()> {
        let plan = self.plan;
        let descriptor = plan.registry.get(object.entity_type())?;
        let key = object.primary_key();

        for table in descriptor.secondary_tables().iter().rev() {
            let command = WriteCommand::delete(
                table.table.clone(),
                ColumnValue::new(table.primary_key.clone(), key.clone()),
            );
            store.execute(&command)?;
        }

        let expected = descriptor
            .locking()
            .and_then(|locking| object.version().map(|version| (locking, version)));
        let mut command = self.prepared(descriptor, CommandKind::Delete);
        if let WriteCommand::Delete {
            key: slot,
            expected_version,
            ..
        } = &mut command
        {
            slot.value = key.clone();
            *expected_version = expected
                .map(|(locking, version)| ColumnValue::new(locking.column.clone(), version.to_value()));
        }
        trace!(object = ?object, table = descriptor.table(), "delete");
        let outcome = store.execute(&command)?;
        if outcome.rows_affected == 0 {
            if let Some((locking, version)) = expected {
                let found = current_version(store, descriptor, locking, &key)?;
                return Err(CommitError::conflict(
                    object.entity_type().clone(),
                    key,
                    Some(version),
                    found,
                ));
            }
            trace!(object = ?object, "delete matched no row");
        } else {
            self.report.deleted += 1;
        }
        Ok(())
    }
}

/// Moves the columns stored in secondary tables out of `values`.
fn split_secondary<'d>(
    descriptor: &'d EntityDescriptor,
    values: &mut Row,
) -> Vec<(&'d SecondaryTable, Row)> {
    descriptor
        .secondary_tables()
        .iter()
        .map(|table| {
            let mut row = Row::new();
            for column in &table.columns {
                if let Some(value) = values.remove(column) {
                    row.set(column.clone(), value);
                }
            }
            (table, row)
        })
        .collect()
}

/// Reads the stored version of one row, for conflict reporting.
fn current_version<S: Store + ?Sized>(
    store: &mut S,
    descriptor: &EntityDescriptor,
    locking: &LockingPolicy,
    key: &Value,
) -> CommitResult<Option<Version>> {
    let query = VersionQuery {
        table: descriptor.table().to_string(),
        pk_column: descriptor.primary_key().to_string(),
        version_column: locking.column.clone(),
        keys: vec![key.clone()],
    };
    let rows = store.select_versions(&query)?;
    Ok(rows.first().and_then(|row| Version::from_value(&row.version)))
}

fn rollback_quietly<S: Store + ?Sized>(store: &mut S, cause: &CommitError) {
    warn!(error = %cause, "rolling back");
    if let Err(err) = store.rollback() {
        warn!(error = %err, "rollback failed");
    }
}
