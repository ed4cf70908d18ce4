//! Entity instance model.
//!
//! # Responsibility
//! - Hold one entity's identity, audit stamps and opaque business fields.
//! - Provide the in-scope handle (`EntityRef`) used by unit-of-work APIs.
//!
//! # Invariants
//! - `identity` is `None` until the first flush inserts the row.
//! - Audit stamps are never part of `fields`; they are only written through
//!   the timestamp hook path.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

use crate::model::descriptor::EntityTypeId;

/// Business field value. Opaque to the stamping core.
pub type FieldValue = rusqlite::types::Value;

/// Storage-assigned row identity.
pub type EntityId = i64;

/// Handle to an entity tracked by one unit of work.
///
/// Handles are only meaningful inside the unit that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub(crate) scope: Uuid,
    pub(crate) slot: usize,
}

impl EntityRef {
    pub(crate) fn new(scope: Uuid, slot: usize) -> Self {
        Self { scope, slot }
    }

    /// Scope id of the issuing unit of work.
    pub fn scope_id(&self) -> Uuid {
        self.scope
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.scope, self.slot)
    }
}

/// Audit timestamp pair. Both values are UTC with millisecond precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditStamps {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AuditStamps {
    /// Latest stamp already present, if any.
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        match (self.created_at, self.updated_at) {
            (Some(created), Some(updated)) => Some(created.max(updated)),
            (created, updated) => created.or(updated),
        }
    }
}

/// One persisted (or about to be persisted) entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    type_id: EntityTypeId,
    identity: Option<EntityId>,
    stamps: AuditStamps,
    fields: BTreeMap<String, FieldValue>,
}

impl Entity {
    pub(crate) fn new_unsaved(type_id: EntityTypeId, fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            type_id,
            identity: None,
            stamps: AuditStamps::default(),
            fields,
        }
    }

    pub(crate) fn loaded(
        type_id: EntityTypeId,
        identity: EntityId,
        stamps: AuditStamps,
        fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self {
            type_id,
            identity: Some(identity),
            stamps,
            fields,
        }
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    /// Storage identity; `None` before the first flush.
    pub fn identity(&self) -> Option<EntityId> {
        self.identity
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.stamps.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.stamps.updated_at
    }

    pub fn stamps(&self) -> AuditStamps {
        self.stamps
    }

    /// Returns one business field value.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Returns a text business field, or `None` when absent or not text.
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(FieldValue::Text(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub(crate) fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Writes a business field. Returns whether the stored value changed.
    pub(crate) fn write_field(&mut self, name: &str, value: FieldValue) -> bool {
        match self.fields.get(name) {
            Some(current) if *current == value => false,
            _ => {
                self.fields.insert(name.to_string(), value);
                true
            }
        }
    }

    pub(crate) fn assign_identity(&mut self, identity: EntityId) {
        self.identity = Some(identity);
    }

    pub(crate) fn replace_stamps(&mut self, stamps: AuditStamps) {
        self.stamps = stamps;
    }
}
