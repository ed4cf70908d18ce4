mod support;

use auditstamp_core::db::{open_db_in_memory, ConnectionOptions};
use auditstamp_core::{
    AuditStamps, AuditStore, ChangeKind, EntityDescriptor, HookRegistry, TimestampHook,
    TimestampPolicy, TimestampWriteError, UnitOfWorkError,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use support::{manual_clock, memory_store, raw_stamps, roles, text, users, SCHEMA_SQL, START_MS};

/// Stamps creations like the default policy but refuses every update.
struct FrozenAfterCreate;

impl TimestampHook for FrozenAfterCreate {
    fn apply(
        &self,
        kind: ChangeKind,
        descriptor: &EntityDescriptor,
        stamps: &mut AuditStamps,
        now: DateTime<Utc>,
    ) -> Result<(), TimestampWriteError> {
        if kind == ChangeKind::Updated {
            return Err(TimestampWriteError::Rejected {
                type_id: descriptor.type_id.clone(),
                reason: "frozen after create".to_string(),
            });
        }
        TimestampPolicy.apply(kind, descriptor, stamps, now)
    }
}

fn store_with_frozen_roles() -> AuditStore {
    let mut registry = HookRegistry::new();
    registry.register("User", users()).unwrap();
    registry
        .register_with_hook("Role", roles(), Arc::new(FrozenAfterCreate))
        .unwrap();

    let conn = open_db_in_memory(ConnectionOptions::default()).unwrap();
    conn.execute_batch(SCHEMA_SQL).unwrap();
    AuditStore::from_connection(conn, Arc::new(registry))
        .unwrap()
        .with_clock(manual_clock())
}

fn user_count(store: &AuditStore) -> i64 {
    store
        .connection()
        .query_row("SELECT COUNT(*) FROM users;", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn rejected_hook_aborts_the_whole_flush() {
    let mut store = store_with_frozen_roles();

    let mut uow = store.begin().unwrap();
    let role = uow.create("Role", [("name", text("Admin"))]).unwrap();
    let committed = uow.commit().unwrap();
    let role_id = committed.entity(role).unwrap().identity().unwrap();

    let mut uow = store.begin().unwrap();
    let user = uow.create("User", [("name", text("Bystander"))]).unwrap();
    let role = uow.fetch("Role", role_id).unwrap();
    uow.mutate(role, "name", text("Root")).unwrap();

    let err = uow.flush().unwrap_err();
    assert!(matches!(
        err,
        UnitOfWorkError::TimestampWrite(TimestampWriteError::Rejected { ref type_id, .. })
            if type_id == "Role"
    ));

    let user_state = uow.entity(user).unwrap();
    assert_eq!(user_state.identity(), None);
    assert_eq!(user_state.created_at(), None);
    assert_eq!(uow.entity(role).unwrap().updated_at(), None);

    let err = uow.commit().unwrap_err();
    assert!(matches!(err, UnitOfWorkError::TimestampWrite(_)));
    assert_eq!(user_count(&store), 0);
    assert_eq!(raw_stamps(&store, "roles", role_id), (Some(START_MS), None));
}

#[test]
fn storage_rejecting_the_stamp_surfaces_as_timestamp_write_error() {
    let mut store = memory_store(manual_clock());
    store
        .connection()
        .execute_batch(
            "CREATE TRIGGER users_lock_updates
             BEFORE UPDATE OF updated_at ON users
             WHEN NEW.name = 'locked'
             BEGIN
                 SELECT RAISE(ABORT, 'user is locked');
             END;",
        )
        .unwrap();

    let mut uow = store.begin().unwrap();
    let user = uow.create("User", [("name", text("Test"))]).unwrap();
    let committed = uow.commit().unwrap();
    let user_id = committed.entity(user).unwrap().identity().unwrap();

    let mut uow = store.begin().unwrap();
    let user = uow.fetch("User", user_id).unwrap();
    uow.mutate(user, "name", text("locked")).unwrap();

    let err = uow.flush().unwrap_err();
    assert!(matches!(
        err,
        UnitOfWorkError::TimestampWrite(TimestampWriteError::Storage { ref type_id, .. })
            if type_id == "User"
    ));
    assert_eq!(uow.entity(user).unwrap().updated_at(), None);
    uow.rollback().unwrap();

    let name: String = store
        .connection()
        .query_row("SELECT name FROM users WHERE id = ?1;", [user_id], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(name, "Test");
    assert_eq!(raw_stamps(&store, "users", user_id), (Some(START_MS), None));
}

#[test]
fn failed_flush_can_be_retried_after_fixing_the_change() {
    let mut store = memory_store(manual_clock());
    store
        .connection()
        .execute_batch(
            "CREATE TRIGGER users_lock_updates
             BEFORE UPDATE OF updated_at ON users
             WHEN NEW.name = 'locked'
             BEGIN
                 SELECT RAISE(ABORT, 'user is locked');
             END;",
        )
        .unwrap();

    let mut uow = store.begin().unwrap();
    let user = uow.create("User", [("name", text("Test"))]).unwrap();
    uow.flush().unwrap();

    uow.mutate(user, "name", text("locked")).unwrap();
    assert!(uow.flush().is_err());

    uow.mutate(user, "name", text("unlocked")).unwrap();
    let report = uow.flush().unwrap();
    assert_eq!(report.updated, 1);

    let committed = uow.commit().unwrap();
    let stored = committed.entity(user).unwrap();
    assert_eq!(stored.text("name"), Some("unlocked"));
    assert_eq!(
        raw_stamps(&store, "users", stored.identity().unwrap()),
        (Some(START_MS), Some(START_MS))
    );
}
