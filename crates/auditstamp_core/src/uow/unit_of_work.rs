//! Unit of work: staged entity changes flushed with audit stamps.
//!
//! # Responsibility
//! - Track entities created, fetched and mutated inside one transaction.
//! - Flush: classify, stamp, persist, then publish results in memory.
//!
//! # Invariants
//! - The flush time is captured once and shared by every record it stamps.
//! - The flush time is never earlier than an existing stamp of a record it
//!   updates, so `updated_at` is non-decreasing (ties allowed).
//! - Hook and storage failures abort the flush before anything is published.
//! - Entities created in a flush get `created_at` only; `updated_at` stays
//!   empty until a later flush observes a mutation.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::persist;
use super::{UnitOfWorkError, UowResult};
use crate::clock::{truncate_to_millis, Clock};
use crate::db::schema::table_columns;
use crate::hook::{HookBinding, HookRegistry, TimestampWriteError};
use crate::model::descriptor::{EntityDescriptor, EntityTypeId};
use crate::model::entity::{AuditStamps, Entity, EntityId, EntityRef, FieldValue};
use crate::tracker::{ChangeKind, ChangeRecord, ChangeTracker, ClassificationError, TrackOrigin};

/// Outcome counters of one or more flushes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Time shared by every stamp of the last flush that wrote any.
    pub stamped_at: Option<DateTime<Utc>>,
}

impl FlushReport {
    fn absorb(&mut self, other: FlushReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        if other.stamped_at.is_some() {
            self.stamped_at = other.stamped_at;
        }
    }
}

/// Snapshot of a committed unit of work.
#[derive(Debug, Clone)]
pub struct Committed {
    scope: Uuid,
    entities: Vec<Entity>,
    report: FlushReport,
}

impl Committed {
    pub fn scope_id(&self) -> Uuid {
        self.scope
    }

    /// Committed state of an entity touched by the unit.
    pub fn entity(&self, entity: EntityRef) -> Option<&Entity> {
        if entity.scope != self.scope {
            return None;
        }
        self.entities.get(entity.slot)
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Totals over every flush of the unit.
    pub fn report(&self) -> FlushReport {
        self.report
    }
}

struct StagedChange<'r> {
    record: ChangeRecord,
    descriptor: &'r EntityDescriptor,
    identity: Option<EntityId>,
    before: AuditStamps,
    after: AuditStamps,
}

/// One transaction-scoped span of entity work.
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
    registry: Arc<HookRegistry>,
    clock: Arc<dyn Clock>,
    scope: Uuid,
    tracker: ChangeTracker,
    entities: Vec<Entity>,
    identity_map: HashMap<(EntityTypeId, EntityId), usize>,
    columns: HashMap<String, BTreeSet<String>>,
    totals: FlushReport,
    started_at: Instant,
}

impl<'conn> UnitOfWork<'conn> {
    pub(crate) fn begin(
        conn: &'conn mut Connection,
        registry: Arc<HookRegistry>,
        clock: Arc<dyn Clock>,
    ) -> UowResult<Self> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let scope = Uuid::new_v4();
        debug!("event=uow_begin module=uow status=ok scope={scope}");

        Ok(Self {
            tx,
            registry,
            clock,
            scope,
            tracker: ChangeTracker::new(scope),
            entities: Vec::new(),
            identity_map: HashMap::new(),
            columns: HashMap::new(),
            totals: FlushReport::default(),
            started_at: Instant::now(),
        })
    }

    pub fn scope_id(&self) -> Uuid {
        self.scope
    }

    /// Stages a new entity. The row is inserted at the next flush.
    pub fn create<K, V>(
        &mut self,
        type_id: &str,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> UowResult<EntityRef>
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let registry = Arc::clone(&self.registry);
        let descriptor = lookup_descriptor(&registry, type_id)?;

        let mut values = BTreeMap::new();
        for (field, value) in fields {
            let field = field.into();
            check_writable(descriptor, &field)?;
            self.require_column(descriptor, &field)?;
            values.insert(field, value.into());
        }

        let slot = self.entities.len();
        self.entities
            .push(Entity::new_unsaved(descriptor.type_id.clone(), values));
        let entity = EntityRef::new(self.scope, slot);
        self.tracker.track(entity, TrackOrigin::New)?;
        Ok(entity)
    }

    /// Loads a persisted entity into this unit.
    ///
    /// Fetching the same row twice returns the same handle.
    pub fn fetch(&mut self, type_id: &str, identity: EntityId) -> UowResult<EntityRef> {
        let registry = Arc::clone(&self.registry);
        let descriptor = lookup_descriptor(&registry, type_id)?;

        let key = (descriptor.type_id.clone(), identity);
        if let Some(slot) = self.identity_map.get(&key) {
            let entity = EntityRef::new(self.scope, *slot);
            self.tracker.track(entity, TrackOrigin::Persisted)?;
            return Ok(entity);
        }

        let loaded = persist::load_row(&self.tx, descriptor, identity)?.ok_or_else(|| {
            UnitOfWorkError::NotFound {
                type_id: descriptor.type_id.clone(),
                identity,
            }
        })?;

        let slot = self.entities.len();
        self.entities.push(loaded);
        self.identity_map.insert(key, slot);
        let entity = EntityRef::new(self.scope, slot);
        self.tracker.track(entity, TrackOrigin::Persisted)?;
        Ok(entity)
    }

    /// Writes one business field.
    ///
    /// Returns `false` when the value equals the current one; such writes are
    /// not mutations.
    pub fn mutate(
        &mut self,
        entity: EntityRef,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> UowResult<bool> {
        let slot = self.slot(entity)?;
        let registry = Arc::clone(&self.registry);
        let descriptor = lookup_descriptor(&registry, self.entities[slot].type_id())?;
        check_writable(descriptor, field)?;
        if !self.entities[slot].has_field(field) {
            self.require_column(descriptor, field)?;
        }

        if !self.entities[slot].write_field(field, value.into()) {
            return Ok(false);
        }
        self.tracker.record_mutation(entity, field, descriptor)?;
        Ok(true)
    }

    /// Current in-scope state of an entity.
    pub fn entity(&self, entity: EntityRef) -> UowResult<&Entity> {
        let slot = self.slot(entity)?;
        Ok(&self.entities[slot])
    }

    /// Classification the next flush would apply.
    pub fn pending_changes(&self) -> Vec<ChangeRecord> {
        self.tracker.classify_all()
    }

    /// Classifies, stamps and persists everything touched since the last flush.
    pub fn flush(&mut self) -> UowResult<FlushReport> {
        let started_at = Instant::now();
        let records = self.tracker.classify_all();
        let mut report = FlushReport::default();
        for record in &records {
            match record.kind {
                ChangeKind::Created => report.created += 1,
                ChangeKind::Updated => report.updated += 1,
                ChangeKind::Unchanged => report.unchanged += 1,
            }
        }

        if report.created == 0 && report.updated == 0 {
            self.tracker.mark_flushed(&records);
            self.totals.absorb(report);
            return Ok(report);
        }

        let now = self.flush_time(&records);
        let registry = Arc::clone(&self.registry);
        let mut staged = self.stage(&registry, &records, now)?;

        if let Err(err) = self.persist(&mut staged) {
            error!(
                "event=uow_flush module=uow status=error scope={} duration_ms={} error={}",
                self.scope,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }

        for change in staged {
            let slot = change.record.entity.slot;
            let target = &mut self.entities[slot];
            if let (None, Some(identity)) = (target.identity(), change.identity) {
                target.assign_identity(identity);
                self.identity_map
                    .insert((change.descriptor.type_id.clone(), identity), slot);
                debug!(
                    "event=entity_insert module=uow status=ok scope={} type={} identity={}",
                    self.scope, change.descriptor.type_id, identity
                );
            }
            target.replace_stamps(change.after);
        }
        self.tracker.mark_flushed(&records);

        report.stamped_at = Some(now);
        self.totals.absorb(report);
        info!(
            "event=uow_flush module=uow status=ok scope={} created={} updated={} unchanged={} duration_ms={}",
            self.scope,
            report.created,
            report.updated,
            report.unchanged,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Flushes pending changes and commits the transaction.
    ///
    /// On error the transaction is rolled back and nothing is committed.
    pub fn commit(mut self) -> UowResult<Committed> {
        if let Err(err) = self.flush() {
            warn!(
                "event=uow_commit module=uow status=error scope={} error_code=flush_failed error={}",
                self.scope, err
            );
            return Err(err);
        }

        let Self {
            tx,
            scope,
            entities,
            totals,
            started_at,
            ..
        } = self;
        tx.commit()?;
        info!(
            "event=uow_commit module=uow status=ok scope={} entities={} created={} updated={} duration_ms={}",
            scope,
            entities.len(),
            totals.created,
            totals.updated,
            started_at.elapsed().as_millis()
        );

        Ok(Committed {
            scope,
            entities,
            report: totals,
        })
    }

    /// Discards every change made in this unit.
    pub fn rollback(self) -> UowResult<()> {
        let scope = self.scope;
        self.tx.rollback()?;
        info!("event=uow_rollback module=uow status=ok scope={scope}");
        Ok(())
    }

    /// One clock reading, raised to the newest stamp among updated records so
    /// no `updated_at` moves backwards when the clock does.
    fn flush_time(&self, records: &[ChangeRecord]) -> DateTime<Utc> {
        let clock_now = truncate_to_millis(self.clock.now_utc());
        records
            .iter()
            .filter(|record| record.kind == ChangeKind::Updated)
            .filter_map(|record| self.entities[record.entity.slot].stamps().latest())
            .fold(clock_now, |latest, stamp| latest.max(stamp))
    }

    fn stage<'r>(
        &self,
        registry: &'r HookRegistry,
        records: &[ChangeRecord],
        now: DateTime<Utc>,
    ) -> UowResult<Vec<StagedChange<'r>>> {
        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            if record.kind == ChangeKind::Unchanged {
                continue;
            }
            let entity = &self.entities[record.entity.slot];
            let descriptor = lookup_descriptor(registry, entity.type_id())?;
            let before = entity.stamps();
            let mut after = before;
            if let Some(HookBinding::Stamped(hook)) = registry.hook_for(entity.type_id()) {
                hook.apply(record.kind, descriptor, &mut after, now)?;
            }
            staged.push(StagedChange {
                record: *record,
                descriptor,
                identity: entity.identity(),
                before,
                after,
            });
        }
        Ok(staged)
    }

    fn persist(&mut self, staged: &mut [StagedChange<'_>]) -> UowResult<()> {
        let savepoint = self.tx.savepoint()?;

        for change in staged.iter_mut() {
            let entity_ref = change.record.entity;
            let entity = &self.entities[entity_ref.slot];
            let descriptor = change.descriptor;

            let identity = match (change.record.kind, change.identity) {
                (ChangeKind::Created, _) => {
                    let identity = persist::insert_row(&savepoint, descriptor, entity.fields())?;
                    change.identity = Some(identity);
                    identity
                }
                (ChangeKind::Updated, Some(identity)) => {
                    let dirty = self.tracker.dirty_fields(entity_ref)?;
                    let columns: Vec<(&str, &FieldValue)> = dirty
                        .into_iter()
                        .filter_map(|field| entity.field(field).map(|value| (field, value)))
                        .collect();
                    if persist::update_row(&savepoint, descriptor, identity, &columns)? == 0 {
                        return Err(UnitOfWorkError::NotFound {
                            type_id: descriptor.type_id.clone(),
                            identity,
                        });
                    }
                    identity
                }
                (ChangeKind::Updated, None) => {
                    return Err(ClassificationError::Untracked(entity_ref).into());
                }
                (ChangeKind::Unchanged, _) => continue,
            };

            persist::write_stamps(&savepoint, descriptor, identity, change.before, change.after)
                .map_err(|source| TimestampWriteError::Storage {
                    type_id: descriptor.type_id.clone(),
                    source,
                })?;
        }

        savepoint.commit()?;
        Ok(())
    }

    fn slot(&self, entity: EntityRef) -> UowResult<usize> {
        if entity.scope != self.scope {
            return Err(ClassificationError::ForeignScope {
                expected: self.scope,
                entity,
            }
            .into());
        }
        if !self.tracker.is_tracked(entity) || entity.slot >= self.entities.len() {
            return Err(ClassificationError::Untracked(entity).into());
        }
        Ok(entity.slot)
    }

    fn require_column(&mut self, descriptor: &EntityDescriptor, field: &str) -> UowResult<()> {
        if !self.columns.contains_key(&descriptor.table) {
            let columns = table_columns(&self.tx, &descriptor.table)?;
            self.columns.insert(descriptor.table.clone(), columns);
        }
        let known = self
            .columns
            .get(&descriptor.table)
            .is_some_and(|columns| columns.contains(field));
        if known {
            Ok(())
        } else {
            Err(UnitOfWorkError::UnknownField {
                type_id: descriptor.type_id.clone(),
                field: field.to_string(),
            })
        }
    }
}

fn lookup_descriptor<'r>(
    registry: &'r HookRegistry,
    type_id: &str,
) -> UowResult<&'r EntityDescriptor> {
    registry
        .descriptor(type_id)
        .ok_or_else(|| UnitOfWorkError::UnknownEntityType(type_id.to_string()))
}

fn check_writable(descriptor: &EntityDescriptor, field: &str) -> UowResult<()> {
    if field == descriptor.identity_field {
        return Err(UnitOfWorkError::ImmutableField {
            type_id: descriptor.type_id.clone(),
            field: field.to_string(),
        });
    }
    if descriptor.is_audit_field(field) {
        return Err(UnitOfWorkError::ReservedField {
            type_id: descriptor.type_id.clone(),
            field: field.to_string(),
        });
    }
    Ok(())
}
