//! End-to-end commit tests over the sample model.

use proptest::prelude::*;
use std::sync::Arc;
use stratum_core::{
    ChangeOrdering, ChangeRecord, ChangeSet, CommitConfig, CommitEngine, CommitError, EntityType,
    Version,
};
use stratum_store::{
    CommandKind, InMemoryStore, Row, StoreError, TransactionEvent, Value, WriteCommand,
};
use stratum_testkit::{
    init_tracing, object, sample_engine, sample_engine_with, sample_store, seed, store_for,
    unit_of_work_strategy, versioned, TestEntity,
};

fn tables(store: &InMemoryStore) -> Vec<(CommandKind, String)> {
    store
        .executed()
        .iter()
        .map(|c| (c.kind(), c.table().to_string()))
        .collect()
}

fn keys_of(store: &InMemoryStore, kind: CommandKind, table: &str, pk: &str) -> Vec<Value> {
    store
        .executed()
        .iter()
        .filter(|c| c.kind() == kind && c.table() == table)
        .filter_map(|c| c.key_value(pk).cloned())
        .collect()
}

fn column(store: &InMemoryStore, table: &str, key: i64, column: &str) -> Option<Value> {
    store.row(table, &Value::Long(key))?.get(column).cloned()
}

fn project(key: i64, version: i32) -> stratum_core::ObjectRef {
    TestEntity::new("Project", key)
        .with_version(Version::Int(version))
        .into_ref()
}

#[test]
fn unrelated_inserts_commit_together() {
    init_tracing();
    let engine = sample_engine();
    let mut store = sample_store();
    let mut changes = ChangeSet::new();
    changes
        .add(ChangeRecord::new_object(project(5, 1)).with_value("NAME", "Apollo"))
        .add(ChangeRecord::new_object(object("Company", 1)).with_value("NAME", "Acme"));

    let report = engine.commit(&changes, &mut store).unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(
        tables(&store),
        vec![
            (CommandKind::Insert, "COMPANY".to_string()),
            (CommandKind::Insert, "PROJECT".to_string()),
        ]
    );
    assert_eq!(store.events(), &[TransactionEvent::Begin, TransactionEvent::Commit]);
    assert_eq!(column(&store, "PROJECT", 5, "VERSION"), Some(Value::Int(1)));
}

#[test]
fn failed_insert_rolls_back_earlier_inserts() {
    init_tracing();
    let engine = sample_engine();
    let mut store = sample_store();
    store.fail_on("PROJECT", CommandKind::Insert, 1);

    let company = object("Company", 1);
    let mut changes = ChangeSet::new();
    changes
        .add(ChangeRecord::new_object(company.clone()))
        .add(ChangeRecord::new_object(project(5, 1)));

    let err = engine.commit(&changes, &mut store).unwrap_err();
    assert!(matches!(err, CommitError::WriteExecution(StoreError::ConnectionLost { .. })));
    assert!(err.is_retryable());
    assert_eq!(store.row_count("COMPANY"), 0);
    assert_eq!(store.events(), &[TransactionEvent::Begin, TransactionEvent::Rollback]);
    assert!(!store.in_transaction());
    assert!(!changes.record(&company).unwrap().is_materialized());
}

#[test]
fn employee_inserted_after_company_and_department() {
    let engine = sample_engine();
    let mut store = sample_store();
    let company = object("Company", 1);
    let department = object("Department", 2);
    let employee = object("Employee", 10);

    let mut changes = ChangeSet::new();
    changes
        .add(
            ChangeRecord::new_object(employee.clone())
                .with_reference("company", Some(company.clone()))
                .with_reference("department", Some(department.clone())),
        )
        .add(ChangeRecord::new_object(department))
        .add(ChangeRecord::new_object(company));

    let report = engine.commit(&changes, &mut store).unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.shallow_completions, 0);
    let inserts: Vec<String> = tables(&store)
        .into_iter()
        .filter(|(kind, _)| *kind == CommandKind::Insert)
        .map(|(_, table)| table)
        .collect();
    assert_eq!(inserts, vec!["COMPANY", "DEPARTMENT", "EMPLOYEE", "EMPLOYEE_DETAIL"]);
    assert_eq!(column(&store, "EMPLOYEE", 10, "DEPT_ID"), Some(Value::Long(2)));
    assert_eq!(column(&store, "EMPLOYEE", 10, "VERSION"), Some(Value::Long(1)));
    assert!(changes.record(&employee).unwrap().is_materialized());
}

#[test]
fn department_manager_cycle_uses_one_completing_update() {
    init_tracing();
    let engine = sample_engine();
    let mut store = sample_store();
    let company = object("Company", 1);
    let department = object("Department", 1);
    let manager = object("Employee", 10);

    let mut changes = ChangeSet::new();
    changes
        .add(ChangeRecord::new_object(company.clone()))
        .add(
            ChangeRecord::new_object(department.clone())
                .with_reference("manager", Some(manager.clone())),
        )
        .add(
            ChangeRecord::new_object(manager)
                .with_reference("company", Some(company))
                .with_reference("department", Some(department)),
        );

    let report = engine.commit(&changes, &mut store).unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.shallow_completions, 1);
    assert_eq!(
        tables(&store),
        vec![
            (CommandKind::Insert, "COMPANY".to_string()),
            (CommandKind::Insert, "EMPLOYEE".to_string()),
            (CommandKind::Insert, "DEPARTMENT".to_string()),
            (CommandKind::Update, "EMPLOYEE".to_string()),
            (CommandKind::Insert, "EMPLOYEE_DETAIL".to_string()),
        ]
    );
    assert_eq!(column(&store, "DEPARTMENT", 1, "MANAGER_ID"), Some(Value::Long(10)));
    assert_eq!(column(&store, "EMPLOYEE", 10, "DEPT_ID"), Some(Value::Long(1)));
    // The completing update leaves the version alone.
    assert_eq!(column(&store, "EMPLOYEE", 10, "VERSION"), Some(Value::Long(1)));
}

#[test]
fn mutual_mentors_resolved_with_shallow_write() {
    let engine = sample_engine();
    let mut store = sample_store();
    seed::company(&mut store, 1);
    seed::department(&mut store, 1);
    let company = object("Company", 1);
    let department = object("Department", 1);
    let first = object("Employee", 20);
    let second = object("Employee", 21);

    let mut changes = ChangeSet::new();
    for (this, mentor) in [(&first, &second), (&second, &first)] {
        changes.add(
            ChangeRecord::new_object(this.clone())
                .with_reference("company", Some(company.clone()))
                .with_reference("department", Some(department.clone()))
                .with_reference("mentor", Some(mentor.clone())),
        );
    }

    let report = engine.commit(&changes, &mut store).unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.shallow_completions, 1);
    assert_eq!(
        keys_of(&store, CommandKind::Insert, "EMPLOYEE", "ID"),
        vec![Value::Long(21), Value::Long(20)]
    );
    assert_eq!(column(&store, "EMPLOYEE", 20, "MENTOR_ID"), Some(Value::Long(21)));
    assert_eq!(column(&store, "EMPLOYEE", 21, "MENTOR_ID"), Some(Value::Long(20)));
}

#[test]
fn stale_version_conflicts_without_partial_writes() {
    init_tracing();
    let engine = sample_engine();
    let mut store = sample_store();
    seed::staffed_company(&mut store);

    // Another connection bumps the employee after we read it at version 3.
    let mut other = store.connect();
    other
        .set_column("EMPLOYEE", &Value::Long(10), "VERSION", 4i64)
        .unwrap();

    let mut changes = ChangeSet::new();
    changes
        .add(ChangeRecord::new_object(object("Company", 2)))
        .add(ChangeRecord::existing(versioned("Employee", 10, 3)).with_value("NAME", "Ada"));

    let err = engine.commit(&changes, &mut store).unwrap_err();
    assert!(err.is_conflict());
    assert!(err.is_retryable());
    match err {
        CommitError::OptimisticLockConflict {
            entity_type,
            primary_key,
            expected,
            found,
        } => {
            assert_eq!(entity_type, EntityType::new("Employee"));
            assert_eq!(primary_key, Value::Long(10));
            assert_eq!(expected, Some(Version::Long(3)));
            assert_eq!(found, Some(Version::Long(4)));
        }
        other => panic!("expected a conflict, got {other}"),
    }
    assert_eq!(store.row_count("COMPANY"), 1);
    assert_eq!(column(&store, "EMPLOYEE", 10, "NAME"), None);
    assert_eq!(store.events(), &[TransactionEvent::Begin, TransactionEvent::Rollback]);
}

#[test]
fn unchanged_versioned_objects_checked_in_one_query_per_type() {
    let engine = sample_engine();
    let mut store = sample_store();
    seed::staffed_company(&mut store);
    seed::employee(&mut store, 11, 1, 1, 3);
    seed::employee(&mut store, 12, 1, 1, 5);
    seed::project(&mut store, 1, 1);

    let mut changes = ChangeSet::new();
    changes
        .add(ChangeRecord::existing(versioned("Employee", 10, 3)))
        .add(ChangeRecord::existing(versioned("Employee", 11, 3)))
        .add(ChangeRecord::existing(versioned("Employee", 12, 5)))
        .add(ChangeRecord::existing(project(1, 1)));

    let report = engine.commit(&changes, &mut store).unwrap();
    assert_eq!(report.version_checked, 4);
    assert!(store.executed().is_empty());

    let queries = store.version_queries();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].table, "PROJECT");
    assert_eq!(queries[1].table, "EMPLOYEE");
    assert_eq!(queries[1].keys.len(), 3);
}

#[test]
fn stale_unchanged_object_fails_the_commit() {
    let engine = sample_engine();
    let mut store = sample_store();
    seed::staffed_company(&mut store);
    seed::employee(&mut store, 11, 1, 1, 7);

    let mut changes = ChangeSet::new();
    changes
        .add(ChangeRecord::existing(versioned("Employee", 10, 3)))
        .add(ChangeRecord::existing(versioned("Employee", 11, 6)));

    let err = engine.commit(&changes, &mut store).unwrap_err();
    match err {
        CommitError::OptimisticLockConflict {
            primary_key, found, ..
        } => {
            assert_eq!(primary_key, Value::Long(11));
            assert_eq!(found, Some(Version::Long(7)));
        }
        other => panic!("expected a conflict, got {other}"),
    }
}

#[test]
fn version_batches_respect_configured_size() {
    let engine = sample_engine_with(CommitConfig::new().max_version_batch(2));
    let mut store = sample_store();
    seed::staffed_company(&mut store);
    seed::employee(&mut store, 11, 1, 1, 3);
    seed::employee(&mut store, 12, 1, 1, 3);

    let mut changes = ChangeSet::new();
    for key in [10, 11, 12] {
        changes.add(ChangeRecord::existing(versioned("Employee", key, 3)));
    }
    engine.commit(&changes, &mut store).unwrap();

    let sizes: Vec<usize> = store.version_queries().iter().map(|q| q.keys.len()).collect();
    assert_eq!(sizes, vec![2, 1]);
}

#[test]
fn deletions_run_last_in_reverse_order() {
    let engine = sample_engine();
    let mut store = sample_store();
    seed::staffed_company(&mut store);
    seed::address(&mut store, 100, 10);

    let mut changes = ChangeSet::new();
    changes
        .delete(object("Company", 1))
        .delete(object("Department", 1))
        .delete(versioned("Employee", 10, 3))
        .delete(object("Address", 100))
        .add(ChangeRecord::new_object(object("Company", 2)));

    let report = engine.commit(&changes, &mut store).unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.deleted, 4);
    assert_eq!(
        tables(&store),
        vec![
            (CommandKind::Insert, "COMPANY".to_string()),
            (CommandKind::Delete, "ADDRESS".to_string()),
            (CommandKind::Delete, "EMPLOYEE_DETAIL".to_string()),
            (CommandKind::Delete, "EMPLOYEE".to_string()),
            (CommandKind::Delete, "DEPARTMENT".to_string()),
            (CommandKind::Delete, "COMPANY".to_string()),
        ]
    );
    assert_eq!(store.row_count("EMPLOYEE"), 0);
    assert_eq!(store.row_count("COMPANY"), 1);
}

#[test]
fn deleting_a_changed_row_conflicts() {
    let engine = sample_engine();
    let mut store = sample_store();
    seed::staffed_company(&mut store);

    let err = engine
        .delete_all_objects(&[versioned("Employee", 10, 2)], &mut store)
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(store.row_count("EMPLOYEE"), 1);
    assert_eq!(store.row_count("EMPLOYEE_DETAIL"), 1);
}

#[test]
fn delete_all_objects_orders_dependents_first() {
    let engine = sample_engine();
    let mut store = sample_store();
    seed::staffed_company(&mut store);
    seed::address(&mut store, 100, 10);

    let report = engine
        .delete_all_objects(
            &[
                versioned("Employee", 10, 3),
                object("Department", 1),
                object("Address", 100),
            ],
            &mut store,
        )
        .unwrap();
    assert_eq!(report.deleted, 3);
    assert_eq!(
        keys_of(&store, CommandKind::Delete, "ADDRESS", "ID"),
        vec![Value::Long(100)]
    );
    assert_eq!(store.row_count("DEPARTMENT"), 0);
    assert_eq!(store.row_count("COMPANY"), 1);
}

#[test]
fn delete_all_objects_rejects_unknown_type_before_begin() {
    let engine = sample_engine();
    let mut store = sample_store();
    let err = engine
        .delete_all_objects(&[object("Invoice", 1)], &mut store)
        .unwrap_err();
    assert!(matches!(err, CommitError::UnknownEntityType { .. }));
    assert!(store.events().is_empty());
}

#[test]
fn orphaned_private_object_is_deleted() {
    let engine = sample_engine();
    let mut store = sample_store();
    seed::staffed_company(&mut store);
    seed::address(&mut store, 100, 10);

    let mut changes = ChangeSet::new();
    changes.add(
        ChangeRecord::existing(versioned("Employee", 10, 3)).with_orphan(object("Address", 100)),
    );

    let report = engine.commit(&changes, &mut store).unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.deleted, 1);
    assert_eq!(store.row_count("ADDRESS"), 0);
    // Employee locking is cascaded, so losing a private part bumps it.
    assert_eq!(column(&store, "EMPLOYEE", 10, "VERSION"), Some(Value::Long(4)));
}

#[test]
fn same_orphan_from_two_owners_is_a_duplicate_component() {
    let engine = sample_engine();
    let mut store = sample_store();
    seed::staffed_company(&mut store);
    seed::employee(&mut store, 11, 1, 1, 3);
    seed::address(&mut store, 100, 10);
    let address = object("Address", 100);

    let mut changes = ChangeSet::new();
    changes
        .add(ChangeRecord::existing(versioned("Employee", 10, 3)).with_orphan(address.clone()))
        .add(ChangeRecord::existing(versioned("Employee", 11, 3)).with_orphan(address));

    let err = engine.commit(&changes, &mut store).unwrap_err();
    assert!(matches!(err, CommitError::DuplicateComponent { .. }));
    assert_eq!(store.row_count("ADDRESS"), 1);
    assert_eq!(column(&store, "EMPLOYEE", 10, "VERSION"), Some(Value::Long(3)));
}

#[test]
fn orphan_of_unregistered_type_fails_alongside_other_deletions() {
    let engine = sample_engine();
    let mut store = sample_store();
    seed::staffed_company(&mut store);
    seed::company(&mut store, 2);

    let mut changes = ChangeSet::new();
    changes
        .add(ChangeRecord::existing(versioned("Employee", 10, 3)).with_orphan(object("Ghost", 9)))
        .delete(object("Company", 2));

    let err = engine.commit(&changes, &mut store).unwrap_err();
    assert!(matches!(err, CommitError::UnknownEntityType { name } if name == "Ghost"));
    assert_eq!(store.row_count("COMPANY"), 2);
    assert_eq!(column(&store, "EMPLOYEE", 10, "VERSION"), Some(Value::Long(3)));
    assert_eq!(store.events(), &[TransactionEvent::Begin, TransactionEvent::Rollback]);
}

#[test]
fn collection_changes_flush_in_fifo_order_after_the_pass() {
    let engine = sample_engine();
    let mut store = sample_store();
    seed::staffed_company(&mut store);
    for key in 1..=3 {
        seed::project(&mut store, key, 1);
    }
    store
        .seed("EMP_PROJ", Row::new().with("EMP_ID", 10i64).with("PROJ_ID", 1i64))
        .unwrap();

    let mut changes = ChangeSet::new();
    changes.add(
        ChangeRecord::existing(versioned("Employee", 10, 3))
            .with_link("projects", object("Project", 2))
            .with_unlink("projects", object("Project", 1))
            .with_link("projects", object("Project", 3)),
    );

    let report = engine.commit(&changes, &mut store).unwrap();
    assert_eq!(report.deferred_modifications, 3);
    let join: Vec<(CommandKind, Value)> = store
        .executed()
        .iter()
        .filter_map(|c| match c {
            WriteCommand::Link { target, .. } => Some((CommandKind::Link, target.value.clone())),
            WriteCommand::Unlink { target, .. } => Some((CommandKind::Unlink, target.value.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        join,
        vec![
            (CommandKind::Link, Value::Long(2)),
            (CommandKind::Unlink, Value::Long(1)),
            (CommandKind::Link, Value::Long(3)),
        ]
    );
    assert_eq!(store.executed()[0].kind(), CommandKind::Update);
    assert_eq!(store.row_count("EMP_PROJ"), 2);
    assert_eq!(column(&store, "EMPLOYEE", 10, "VERSION"), Some(Value::Long(4)));
}

#[test]
fn modifications_flush_before_calls() {
    let engine = sample_engine();
    let mut store = sample_store();
    seed::company(&mut store, 1);
    seed::department(&mut store, 1);
    seed::project(&mut store, 1, 1);

    let mut changes = ChangeSet::new();
    changes.add(
        ChangeRecord::new_object(object("Employee", 20))
            .with_reference("company", Some(object("Company", 1)))
            .with_reference("department", Some(object("Department", 1)))
            .with_value("SALARY", 100i64)
            .with_link("projects", object("Project", 1)),
    );

    let report = engine.commit(&changes, &mut store).unwrap();
    assert_eq!(report.deferred_modifications, 1);
    assert_eq!(report.deferred_calls, 1);
    assert_eq!(
        tables(&store),
        vec![
            (CommandKind::Insert, "EMPLOYEE".to_string()),
            (CommandKind::Link, "EMP_PROJ".to_string()),
            (CommandKind::Insert, "EMPLOYEE_DETAIL".to_string()),
        ]
    );
}

#[test]
fn secondary_columns_split_from_main_row() {
    let engine = sample_engine();
    let mut store = sample_store();
    seed::staffed_company(&mut store);

    let mut changes = ChangeSet::new();
    changes.add(
        ChangeRecord::existing(versioned("Employee", 10, 3))
            .with_value("NAME", "Ada")
            .with_value("SALARY", 120i64),
    );
    let report = engine.commit(&changes, &mut store).unwrap();
    assert_eq!(report.updated, 1);

    assert_eq!(column(&store, "EMPLOYEE", 10, "SALARY"), None);
    assert_eq!(column(&store, "EMPLOYEE", 10, "NAME"), Some(Value::from("Ada")));
    assert_eq!(column(&store, "EMPLOYEE_DETAIL", 10, "SALARY"), Some(Value::Long(120)));
}

#[test]
fn link_only_change_on_uncascaded_type_keeps_version() {
    let registry = stratum_testkit::sample_registry();
    let mut relaxed = stratum_core::Registry::new();
    for descriptor in registry.iter() {
        let descriptor = match descriptor.locking() {
            Some(locking) if locking.cascaded => {
                descriptor.clone().with_locking(locking.clone().cascaded(false))
            }
            _ => descriptor.clone(),
        };
        relaxed.register(descriptor);
    }
    let engine = CommitEngine::new(relaxed, CommitConfig::default()).unwrap();
    let mut store = sample_store();
    seed::staffed_company(&mut store);
    seed::project(&mut store, 1, 1);

    let mut changes = ChangeSet::new();
    changes.add(
        ChangeRecord::existing(versioned("Employee", 10, 3))
            .with_link("projects", object("Project", 1)),
    );
    let report = engine.commit(&changes, &mut store).unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(report.deferred_modifications, 1);
    assert_eq!(column(&store, "EMPLOYEE", 10, "VERSION"), Some(Value::Long(3)));
}

#[test]
fn primary_key_ordering_sorts_updates_within_a_type() {
    let mut store = sample_store();
    seed::staffed_company(&mut store);
    seed::employee(&mut store, 11, 1, 1, 3);
    seed::employee(&mut store, 12, 1, 1, 3);

    let updates = |version: i64| {
        let mut changes = ChangeSet::new();
        for key in [12, 10, 11] {
            changes.add(
                ChangeRecord::existing(versioned("Employee", key, version)).with_value("NAME", key),
            );
        }
        changes
    };

    let engine =
        sample_engine_with(CommitConfig::new().change_ordering(ChangeOrdering::PrimaryKey));
    engine.commit(&updates(3), &mut store).unwrap();
    assert_eq!(
        keys_of(&store, CommandKind::Update, "EMPLOYEE", "ID"),
        vec![Value::Long(10), Value::Long(11), Value::Long(12)]
    );

    store.clear_log();
    sample_engine().commit(&updates(4), &mut store).unwrap();
    assert_eq!(
        keys_of(&store, CommandKind::Update, "EMPLOYEE", "ID"),
        vec![Value::Long(12), Value::Long(10), Value::Long(11)]
    );
}

#[test]
fn changes_ordering_groups_updates_by_changed_columns() {
    let mut store = sample_store();
    seed::staffed_company(&mut store);
    for key in [11, 12, 13] {
        seed::employee(&mut store, key, 1, 1, 3);
    }

    let mut changes = ChangeSet::new();
    for (key, column) in [(13, "NAME"), (10, "TITLE"), (12, "NAME"), (11, "TITLE")] {
        changes.add(ChangeRecord::existing(versioned("Employee", key, 3)).with_value(column, key));
    }

    let engine = sample_engine_with(CommitConfig::new().change_ordering(ChangeOrdering::Changes));
    let report = engine.commit(&changes, &mut store).unwrap();
    assert_eq!(report.updated, 4);
    assert_eq!(
        keys_of(&store, CommandKind::Update, "EMPLOYEE", "ID"),
        vec![Value::Long(12), Value::Long(13), Value::Long(10), Value::Long(11)]
    );
}

#[test]
fn deletes_sorted_by_primary_key_when_configured() {
    let seeded = || {
        let mut store = sample_store();
        seed::staffed_company(&mut store);
        for key in [100, 101, 102] {
            seed::address(&mut store, key, 10);
        }
        store
    };
    let addresses = || {
        vec![
            object("Address", 102),
            object("Address", 100),
            object("Address", 101),
        ]
    };

    let mut store = seeded();
    let engine = sample_engine_with(CommitConfig::new().order_deletes_by_primary_key(true));
    engine.delete_all_objects(&addresses(), &mut store).unwrap();
    assert_eq!(
        keys_of(&store, CommandKind::Delete, "ADDRESS", "ID"),
        vec![Value::Long(100), Value::Long(101), Value::Long(102)]
    );

    let mut store = seeded();
    sample_engine().delete_all_objects(&addresses(), &mut store).unwrap();
    assert_eq!(
        keys_of(&store, CommandKind::Delete, "ADDRESS", "ID"),
        vec![Value::Long(102), Value::Long(100), Value::Long(101)]
    );
}

#[test]
fn rollback_failure_does_not_mask_the_cause() {
    let engine = sample_engine();
    let mut store = sample_store();
    store.fail_on("COMPANY", CommandKind::Insert, 1);
    store.fail_rollback();

    let mut changes = ChangeSet::new();
    changes.add(ChangeRecord::new_object(object("Company", 1)));
    let err = engine.commit(&changes, &mut store).unwrap_err();

    let message = err.to_string();
    assert!(message.contains("COMPANY"), "{message}");
    assert!(!message.contains("rollback"), "{message}");
    assert_eq!(store.events(), &[TransactionEvent::Begin, TransactionEvent::Rollback]);
    assert!(!store.in_transaction());
}

#[test]
fn failed_commit_is_reported_and_rolled_back() {
    let engine = sample_engine();
    let mut store = sample_store();
    store.fail_commit();

    let company = object("Company", 1);
    let mut changes = ChangeSet::new();
    changes.add(ChangeRecord::new_object(company.clone()));
    let err = engine.commit(&changes, &mut store).unwrap_err();

    assert!(matches!(err, CommitError::WriteExecution(_)));
    assert_eq!(store.row_count("COMPANY"), 0);
    assert_eq!(store.events(), &[TransactionEvent::Begin, TransactionEvent::Rollback]);
    assert!(!changes.record(&company).unwrap().is_materialized());

    // The engine is reusable after a failed attempt.
    engine.commit(&changes, &mut store).unwrap();
    assert_eq!(store.row_count("COMPANY"), 1);
    assert!(changes.record(&company).unwrap().is_materialized());
}

#[test]
fn empty_change_set_still_brackets_a_transaction() {
    let engine = sample_engine();
    let mut store = sample_store();
    let report = engine.commit(&ChangeSet::new(), &mut store).unwrap();
    assert_eq!(report.commands_executed(), 0);
    assert_eq!(store.events(), &[TransactionEvent::Begin, TransactionEvent::Commit]);
}

#[test]
fn write_object_completes_self_reference() {
    let engine = sample_engine();
    let mut store = sample_store();
    seed::company(&mut store, 1);
    seed::department(&mut store, 1);
    let employee = object("Employee", 30);

    let record = ChangeRecord::new_object(employee.clone())
        .with_reference("company", Some(object("Company", 1)))
        .with_reference("department", Some(object("Department", 1)))
        .with_reference("mentor", Some(employee));
    let report = engine.write_object(&record, &mut store).unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(report.shallow_completions, 1);
    assert_eq!(column(&store, "EMPLOYEE", 30, "MENTOR_ID"), Some(Value::Long(30)));
    assert!(record.is_materialized());
}

#[test]
fn engine_is_shared_between_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<CommitEngine>();

    let engine = Arc::new(sample_engine());
    let store = sample_store();
    let handles: Vec<_> = (0..4i64)
        .map(|t| {
            let engine = Arc::clone(&engine);
            let mut store = store.connect();
            std::thread::spawn(move || {
                let mut changes = ChangeSet::new();
                changes.add(ChangeRecord::new_object(object("Company", t + 1)));
                engine.commit(&changes, &mut store).map(|report| report.inserted)
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 1);
    }
    assert_eq!(store.row_count("COMPANY"), 4);
}

#[test]
fn concurrent_updates_of_one_version_let_exactly_one_win() {
    let engine = Arc::new(sample_engine());
    let mut store = sample_store();
    seed::staffed_company(&mut store);

    let handles: Vec<_> = ["Ada", "Grace"]
        .into_iter()
        .map(|name| {
            let engine = Arc::clone(&engine);
            let mut store = store.connect();
            std::thread::spawn(move || {
                let mut changes = ChangeSet::new();
                changes.add(
                    ChangeRecord::existing(versioned("Employee", 10, 3)).with_value("NAME", name),
                );
                engine.commit(&changes, &mut store).map(|_| name)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners: Vec<&str> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(CommitError::OptimisticLockConflict { .. }))));
    assert_eq!(column(&store, "EMPLOYEE", 10, "VERSION"), Some(Value::Long(4)));
    assert_eq!(column(&store, "EMPLOYEE", 10, "NAME"), Some(Value::from(winners[0])));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn generated_units_insert_every_object_once(work in unit_of_work_strategy(5, 12)) {
        let registry = work.registry();
        let engine = CommitEngine::new(registry.clone(), CommitConfig::default()).unwrap();
        let mut store = store_for(&registry);
        let (changes, handles) = work.change_set();

        let report = engine.commit(&changes, &mut store).unwrap();
        prop_assert_eq!(report.inserted, work.objects.len());
        prop_assert_eq!(report.shallow_completions, 0);

        let inserts = store.executed().iter().filter(|c| c.kind() == CommandKind::Insert).count();
        prop_assert_eq!(inserts, work.objects.len());
        for handle in &handles {
            prop_assert!(changes.record(handle).unwrap().is_materialized());
        }
    }
}
