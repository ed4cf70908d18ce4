//! Per-unit change tracker.
//!
//! # Responsibility
//! - Remember which entities a unit of work created or loaded.
//! - Collect dirty business fields between flushes.
//! - Classify every touched entity exactly once per flush.
//!
//! # Invariants
//! - An entity created and mutated before its first flush classifies as
//!   `Created` only.
//! - Writes to audit fields are never observed as mutations.
//! - A flush only sees entities touched since the previous flush.

use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

use crate::model::descriptor::EntityDescriptor;
use crate::model::entity::EntityRef;

/// Net change of one entity for one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Unchanged,
}

/// Classification computed for one tracked entity at flush time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRecord {
    pub entity: EntityRef,
    pub kind: ChangeKind,
}

/// How an entity entered the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOrigin {
    /// Staged by `create`; not yet in storage.
    New,
    /// Loaded from storage, or flushed earlier in this unit.
    Persisted,
}

/// Misuse of tracker handles by the calling layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    /// Handle was never tracked by this unit.
    Untracked(EntityRef),
    /// Handle was issued by a different unit of work.
    ForeignScope { expected: Uuid, entity: EntityRef },
}

impl Display for ClassificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Untracked(entity) => write!(f, "entity {entity} is not tracked"),
            Self::ForeignScope { expected, entity } => write!(
                f,
                "entity {entity} belongs to another unit of work (expected scope {expected})"
            ),
        }
    }
}

impl Error for ClassificationError {}

#[derive(Debug)]
struct TrackedEntry {
    origin: TrackOrigin,
    dirty: BTreeSet<String>,
    touched: bool,
}

/// Change tracker owned by exactly one unit of work.
#[derive(Debug)]
pub struct ChangeTracker {
    scope: Uuid,
    entries: BTreeMap<usize, TrackedEntry>,
}

impl ChangeTracker {
    pub fn new(scope: Uuid) -> Self {
        Self {
            scope,
            entries: BTreeMap::new(),
        }
    }

    pub fn scope_id(&self) -> Uuid {
        self.scope
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers an entity as observed in this unit.
    ///
    /// Returns `false` and changes nothing when the entity is already tracked.
    pub fn track(
        &mut self,
        entity: EntityRef,
        origin: TrackOrigin,
    ) -> Result<bool, ClassificationError> {
        self.check_scope(entity)?;
        if self.entries.contains_key(&entity.slot) {
            return Ok(false);
        }

        self.entries.insert(
            entity.slot,
            TrackedEntry {
                origin,
                dirty: BTreeSet::new(),
                touched: true,
            },
        );
        Ok(true)
    }

    pub fn is_tracked(&self, entity: EntityRef) -> bool {
        entity.scope == self.scope && self.entries.contains_key(&entity.slot)
    }

    /// Notes a business-field write.
    ///
    /// Returns whether the write counts as a mutation. Audit fields declared
    /// by `descriptor` are ignored so stamping never re-triggers itself.
    pub fn record_mutation(
        &mut self,
        entity: EntityRef,
        field: &str,
        descriptor: &EntityDescriptor,
    ) -> Result<bool, ClassificationError> {
        let entry = self.entry_mut(entity)?;
        if descriptor.is_audit_field(field) {
            debug!(
                "event=mutation_ignored module=tracker type={} field={} reason=audit_field",
                descriptor.type_id, field
            );
            return Ok(false);
        }

        entry.touched = true;
        entry.dirty.insert(field.to_string());
        Ok(true)
    }

    /// Dirty business fields recorded since the last flush, sorted.
    pub fn dirty_fields(&self, entity: EntityRef) -> Result<Vec<&str>, ClassificationError> {
        let entry = self.entry(entity)?;
        Ok(entry.dirty.iter().map(String::as_str).collect())
    }

    /// Classifies every entity touched since the last flush.
    ///
    /// Pure: tracker state only advances through `mark_flushed`.
    pub fn classify_all(&self) -> Vec<ChangeRecord> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.touched)
            .map(|(slot, entry)| ChangeRecord {
                entity: EntityRef::new(self.scope, *slot),
                kind: classify(entry),
            })
            .collect()
    }

    /// Commits the outcome of a successful flush.
    pub fn mark_flushed(&mut self, records: &[ChangeRecord]) {
        for record in records {
            if let Some(entry) = self.entries.get_mut(&record.entity.slot) {
                entry.origin = TrackOrigin::Persisted;
                entry.dirty.clear();
                entry.touched = false;
            }
        }
    }

    fn check_scope(&self, entity: EntityRef) -> Result<(), ClassificationError> {
        if entity.scope != self.scope {
            return Err(ClassificationError::ForeignScope {
                expected: self.scope,
                entity,
            });
        }
        Ok(())
    }

    fn entry(&self, entity: EntityRef) -> Result<&TrackedEntry, ClassificationError> {
        self.check_scope(entity)?;
        self.entries
            .get(&entity.slot)
            .ok_or(ClassificationError::Untracked(entity))
    }

    fn entry_mut(&mut self, entity: EntityRef) -> Result<&mut TrackedEntry, ClassificationError> {
        self.check_scope(entity)?;
        self.entries
            .get_mut(&entity.slot)
            .ok_or(ClassificationError::Untracked(entity))
    }
}

fn classify(entry: &TrackedEntry) -> ChangeKind {
    match entry.origin {
        TrackOrigin::New => ChangeKind::Created,
        TrackOrigin::Persisted if !entry.dirty.is_empty() => ChangeKind::Updated,
        TrackOrigin::Persisted => ChangeKind::Unchanged,
    }
}
