#![allow(dead_code)]

use auditstamp_core::db::{open_db, open_db_in_memory, ConnectionOptions};
use auditstamp_core::{AuditStore, EntityDescriptor, FieldValue, HookRegistry, ManualClock};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

pub const START_MS: i64 = 1_700_000_000_000;

pub const SCHEMA_SQL: &str = "
CREATE TABLE roles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at INTEGER NULL,
    updated_at INTEGER NULL
);
CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    role_id INTEGER NULL REFERENCES roles(id) ON DELETE NO ACTION,
    created_at INTEGER NULL,
    updated_at INTEGER NULL
);
CREATE TABLE tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    label TEXT NOT NULL
);
";

pub fn users() -> EntityDescriptor {
    EntityDescriptor::new("User", "users").with_audit_columns()
}

pub fn roles() -> EntityDescriptor {
    EntityDescriptor::new("Role", "roles").with_audit_columns()
}

pub fn tags() -> EntityDescriptor {
    EntityDescriptor::new("Tag", "tags")
}

pub fn registry() -> Arc<HookRegistry> {
    Arc::new(HookRegistry::from_descriptors([users(), roles(), tags()]).unwrap())
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::starting_at_millis(START_MS))
}

/// In-memory store with the users/roles/tags schema and a manual clock.
pub fn memory_store(clock: Arc<ManualClock>) -> AuditStore {
    let conn = open_db_in_memory(ConnectionOptions::default()).unwrap();
    conn.execute_batch(SCHEMA_SQL).unwrap();
    AuditStore::from_connection(conn, registry())
        .unwrap()
        .with_clock(clock)
}

/// Creates the schema in a database file.
pub fn create_schema_file(path: &Path) {
    let conn = open_db(path, ConnectionOptions::default()).unwrap();
    conn.execute_batch(SCHEMA_SQL).unwrap();
}

pub fn text(value: &str) -> FieldValue {
    FieldValue::Text(value.to_string())
}

pub fn millis(epoch_ms: i64) -> DateTime<Utc> {
    auditstamp_core::clock::from_epoch_millis(epoch_ms).unwrap()
}

/// Reads raw audit columns, bypassing the entity model.
pub fn raw_stamps(store: &AuditStore, table: &str, id: i64) -> (Option<i64>, Option<i64>) {
    store
        .connection()
        .query_row(
            &format!("SELECT created_at, updated_at FROM {table} WHERE id = ?1;"),
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap()
}
