//! Test fixtures: a sample mapped model and stores matching it.
//!
//! The sample model covers every case the commit engine handles:
//!
//! | Type         | Table        | Notes                                            |
//! |--------------|--------------|--------------------------------------------------|
//! | `Company`    | `COMPANY`    | root                                             |
//! | `Department` | `DEPARTMENT` | optional `manager` to `Employee` (cycle)         |
//! | `Employee`   | `EMPLOYEE`   | `company`, `department`, self `mentor`; versioned; secondary `EMPLOYEE_DETAIL`; `projects` join table |
//! | `Project`    | `PROJECT`    | versioned (32-bit)                               |
//! | `Address`    | `ADDRESS`    | private part of `Employee`                       |

use stratum_core::{
    CommitConfig, CommitEngine, Entity, EntityDescriptor, EntityType, JoinMapping, LockingPolicy,
    ObjectRef, Registry, SecondaryTable, Version, VersionKind,
};
use stratum_store::{InMemoryStore, Row, TableSchema, Value};

/// A mapped object identified by type and integer key.
#[derive(Debug, Clone)]
pub struct TestEntity {
    entity_type: EntityType,
    key: i64,
    version: Option<Version>,
}

impl TestEntity {
    /// Creates an unversioned object.
    pub fn new(entity_type: &str, key: i64) -> Self {
        Self {
            entity_type: EntityType::new(entity_type),
            key,
            version: None,
        }
    }

    /// Sets the version the object was read at.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Wraps the object in a handle.
    pub fn into_ref(self) -> ObjectRef {
        ObjectRef::new(self)
    }
}

impl Entity for TestEntity {
    fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn primary_key(&self) -> Value {
        Value::Long(self.key)
    }

    fn version(&self) -> Option<Version> {
        self.version
    }
}

/// Creates an unversioned object handle.
pub fn object(entity_type: &str, key: i64) -> ObjectRef {
    TestEntity::new(entity_type, key).into_ref()
}

/// Creates an object handle read at a 64-bit version.
pub fn versioned(entity_type: &str, key: i64, version: i64) -> ObjectRef {
    TestEntity::new(entity_type, key)
        .with_version(Version::Long(version))
        .into_ref()
}

/// Metadata of the sample model.
pub fn sample_registry() -> Registry {
    Registry::new()
        .with(EntityDescriptor::new("Company", "COMPANY", "ID"))
        .with(
            EntityDescriptor::new("Department", "DEPARTMENT", "ID")
                .with_reference("manager", "MANAGER_ID", "Employee", false),
        )
        .with(
            EntityDescriptor::new("Employee", "EMPLOYEE", "ID")
                .with_reference("company", "COMPANY_ID", "Company", true)
                .with_reference("department", "DEPT_ID", "Department", true)
                .with_reference("mentor", "MENTOR_ID", "Employee", false)
                .with_secondary_table(SecondaryTable {
                    table: "EMPLOYEE_DETAIL".into(),
                    primary_key: "EMP_ID".into(),
                    columns: vec!["SALARY".into(), "BIO".into()],
                })
                .with_join_mapping(JoinMapping {
                    name: "projects".into(),
                    table: "EMP_PROJ".into(),
                    source_column: "EMP_ID".into(),
                    target_column: "PROJ_ID".into(),
                    target: EntityType::new("Project"),
                })
                .with_locking(LockingPolicy::new("VERSION", VersionKind::Long).cascaded(true)),
        )
        .with(
            EntityDescriptor::new("Project", "PROJECT", "ID")
                .with_locking(LockingPolicy::new("VERSION", VersionKind::Int)),
        )
        .with(
            EntityDescriptor::new("Address", "ADDRESS", "ID")
                .with_reference("owner", "EMPLOYEE_ID", "Employee", true),
        )
}

/// An engine over the sample model.
pub fn sample_engine() -> CommitEngine {
    sample_engine_with(CommitConfig::default())
}

/// An engine over the sample model with a custom configuration.
pub fn sample_engine_with(config: CommitConfig) -> CommitEngine {
    CommitEngine::new(sample_registry(), config).expect("sample model has no explicit cycle")
}

/// An empty store with the sample model's tables and foreign keys.
pub fn sample_store() -> InMemoryStore {
    let mut store = InMemoryStore::new();
    store.create_table(TableSchema::new("COMPANY", "ID"));
    store.create_table(
        TableSchema::new("DEPARTMENT", "ID").with_foreign_key("MANAGER_ID", "EMPLOYEE"),
    );
    store.create_table(
        TableSchema::new("EMPLOYEE", "ID")
            .with_foreign_key("COMPANY_ID", "COMPANY")
            .with_foreign_key("DEPT_ID", "DEPARTMENT")
            .with_foreign_key("MENTOR_ID", "EMPLOYEE"),
    );
    store.create_table(
        TableSchema::new("EMPLOYEE_DETAIL", "EMP_ID").with_foreign_key("EMP_ID", "EMPLOYEE"),
    );
    store.create_table(TableSchema::new("PROJECT", "ID"));
    store.create_table(
        TableSchema::join("EMP_PROJ")
            .with_foreign_key("EMP_ID", "EMPLOYEE")
            .with_foreign_key("PROJ_ID", "PROJECT"),
    );
    store.create_table(
        TableSchema::new("ADDRESS", "ID").with_foreign_key("EMPLOYEE_ID", "EMPLOYEE"),
    );
    store
}

/// A store with one table per registered type, keyed by its primary key and
/// constrained by its references.
pub fn store_for(registry: &Registry) -> InMemoryStore {
    let mut store = InMemoryStore::new();
    for descriptor in registry.iter() {
        let mut schema = TableSchema::new(descriptor.table(), descriptor.primary_key());
        for reference in descriptor.references() {
            if let Some(target) = registry.descriptor(&reference.target) {
                schema = schema.with_foreign_key(reference.column.clone(), target.table());
            }
        }
        store.create_table(schema);
    }
    store
}

/// Seeds committed rows into the sample store.
pub mod seed {
    use super::*;

    /// Seeds a company.
    pub fn company(store: &mut InMemoryStore, id: i64) {
        store
            .seed("COMPANY", Row::new().with("ID", id))
            .expect("seed company");
    }

    /// Seeds a department without a manager.
    pub fn department(store: &mut InMemoryStore, id: i64) {
        store
            .seed("DEPARTMENT", Row::new().with("ID", id))
            .expect("seed department");
    }

    /// Seeds an employee at `version`, with its detail row.
    pub fn employee(
        store: &mut InMemoryStore,
        id: i64,
        company: i64,
        department: i64,
        version: i64,
    ) {
        store
            .seed(
                "EMPLOYEE",
                Row::new()
                    .with("ID", id)
                    .with("COMPANY_ID", company)
                    .with("DEPT_ID", department)
                    .with("VERSION", version),
            )
            .expect("seed employee");
        store
            .seed("EMPLOYEE_DETAIL", Row::new().with("EMP_ID", id))
            .expect("seed employee detail");
    }

    /// Seeds a project at `version`.
    pub fn project(store: &mut InMemoryStore, id: i64, version: i32) {
        store
            .seed("PROJECT", Row::new().with("ID", id).with("VERSION", version))
            .expect("seed project");
    }

    /// Seeds an address owned by `owner`.
    pub fn address(store: &mut InMemoryStore, id: i64, owner: i64) {
        store
            .seed("ADDRESS", Row::new().with("ID", id).with("EMPLOYEE_ID", owner))
            .expect("seed address");
    }

    /// Seeds company 1, department 1 and employee 10 at version 3.
    pub fn staffed_company(store: &mut InMemoryStore) {
        company(store, 1);
        department(store, 1);
        employee(store, 10, 1, 1, 3);
    }
}
