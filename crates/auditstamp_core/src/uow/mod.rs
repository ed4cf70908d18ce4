//! Units of work over SQLite transactions.
//!
//! # Responsibility
//! - Open audit stores and verify registered kinds against the live schema.
//! - Stage creates, fetches and mutations, then flush them atomically with
//!   audit stamps applied.
//!
//! # Invariants
//! - A failed flush leaves storage and in-memory entities untouched.
//! - A unit that is dropped without `commit` rolls back.
//!
//! # See also
//! - `crate::tracker` for classification rules.
//! - `crate::hook` for stamping rules.

use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::db::DbError;
use crate::hook::{ConfigurationError, TimestampWriteError};
use crate::model::descriptor::EntityTypeId;
use crate::model::entity::EntityId;
use crate::tracker::ClassificationError;

mod persist;
mod store;
mod unit_of_work;

pub use store::AuditStore;
pub use unit_of_work::{Committed, FlushReport, UnitOfWork};

pub type UowResult<T> = Result<T, UnitOfWorkError>;
pub type StoreResult<T> = Result<T, StoreError>;

/// Error channel of a unit of work.
#[derive(Debug)]
pub enum UnitOfWorkError {
    Db(DbError),
    Classification(ClassificationError),
    TimestampWrite(TimestampWriteError),
    UnknownEntityType(EntityTypeId),
    NotFound {
        type_id: EntityTypeId,
        identity: EntityId,
    },
    /// Identity is assigned by storage and never written by callers.
    ImmutableField {
        type_id: EntityTypeId,
        field: String,
    },
    /// Audit fields are written by the timestamp hook only.
    ReservedField {
        type_id: EntityTypeId,
        field: String,
    },
    UnknownField {
        type_id: EntityTypeId,
        field: String,
    },
}

impl Display for UnitOfWorkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Classification(err) => write!(f, "{err}"),
            Self::TimestampWrite(err) => write!(f, "{err}"),
            Self::UnknownEntityType(type_id) => write!(f, "entity type not registered: {type_id}"),
            Self::NotFound { type_id, identity } => {
                write!(f, "{type_id} not found: {identity}")
            }
            Self::ImmutableField { type_id, field } => {
                write!(f, "{type_id}.{field} is immutable")
            }
            Self::ReservedField { type_id, field } => {
                write!(f, "{type_id}.{field} is managed by audit stamping")
            }
            Self::UnknownField { type_id, field } => {
                write!(f, "{type_id} has no field `{field}`")
            }
        }
    }
}

impl Error for UnitOfWorkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Classification(err) => Some(err),
            Self::TimestampWrite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for UnitOfWorkError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for UnitOfWorkError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ClassificationError> for UnitOfWorkError {
    fn from(value: ClassificationError) -> Self {
        Self::Classification(value)
    }
}

impl From<TimestampWriteError> for UnitOfWorkError {
    fn from(value: TimestampWriteError) -> Self {
        Self::TimestampWrite(value)
    }
}

/// Store startup failure.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Configuration(ConfigurationError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Configuration(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Configuration(err) => Some(err),
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ConfigurationError> for StoreError {
    fn from(value: ConfigurationError) -> Self {
        Self::Configuration(value)
    }
}
