//! Audit store: one connection plus the shared hook registry.
//!
//! # Responsibility
//! - Open connections and refuse to start when a registered kind does not
//!   match the live schema.
//! - Hand out units of work bound to the connection.
//!
//! # Invariants
//! - Every registered descriptor's table, identity column and declared audit
//!   columns exist before the first unit of work begins.

use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::unit_of_work::UnitOfWork;
use super::{StoreResult, UowResult};
use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::db::schema::{table_columns, table_exists};
use crate::db::{open_db, ConnectionOptions};
use crate::hook::{ConfigurationError, HookRegistry};

/// Connection-bound entry point for units of work.
pub struct AuditStore {
    conn: Connection,
    registry: Arc<HookRegistry>,
    clock: Arc<dyn Clock>,
}

impl AuditStore {
    /// Opens a database file with default connection options.
    pub fn open(path: impl AsRef<Path>, registry: Arc<HookRegistry>) -> StoreResult<Self> {
        Self::open_with_options(path, registry, ConnectionOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        registry: Arc<HookRegistry>,
        options: ConnectionOptions,
    ) -> StoreResult<Self> {
        let conn = open_db(path, options)?;
        Self::from_connection(conn, registry)
    }

    /// Opens a database file using settings and entity kinds from `config`.
    pub fn open_with_config(path: impl AsRef<Path>, config: &StoreConfig) -> StoreResult<Self> {
        let registry = Arc::new(config.build_registry()?);
        Self::open_with_options(path, registry, config.connection_options())
    }

    /// Wraps an existing connection after verifying the registry against it.
    ///
    /// Used for in-memory databases whose schema the caller creates first.
    pub fn from_connection(conn: Connection, registry: Arc<HookRegistry>) -> StoreResult<Self> {
        let started_at = Instant::now();
        if let Err(err) = verify_schema(&conn, &registry) {
            error!(
                "event=store_open module=uow status=error duration_ms={} error_code=schema_mismatch error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }

        info!(
            "event=store_open module=uow status=ok types={} duration_ms={}",
            registry.len(),
            started_at.elapsed().as_millis()
        );
        Ok(Self {
            conn,
            registry,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the time source used by future flushes.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Re-checks the registry against the current schema.
    pub fn verify(&self) -> StoreResult<()> {
        verify_schema(&self.conn, &self.registry)
    }

    /// Starts a unit of work in an immediate (write-reserving) transaction.
    pub fn begin(&mut self) -> UowResult<UnitOfWork<'_>> {
        UnitOfWork::begin(
            &mut self.conn,
            Arc::clone(&self.registry),
            Arc::clone(&self.clock),
        )
    }
}

fn verify_schema(conn: &Connection, registry: &HookRegistry) -> StoreResult<()> {
    for descriptor in registry.descriptors() {
        if !table_exists(conn, &descriptor.table)? {
            return Err(ConfigurationError::MissingTable {
                type_id: descriptor.type_id.clone(),
                table: descriptor.table.clone(),
            }
            .into());
        }

        let columns = table_columns(conn, &descriptor.table)?;
        let required = std::iter::once(descriptor.identity_field.as_str())
            .chain(descriptor.created_at_field.as_deref())
            .chain(descriptor.updated_at_field.as_deref());
        for column in required {
            if !columns.contains(column) {
                return Err(ConfigurationError::MissingColumn {
                    type_id: descriptor.type_id.clone(),
                    table: descriptor.table.clone(),
                    column: column.to_string(),
                }
                .into());
            }
        }
    }
    Ok(())
}
