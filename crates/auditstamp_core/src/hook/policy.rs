//! Timestamp policy hook.
//!
//! # Responsibility
//! - Turn one change classification into audit stamp assignments.
//!
//! # Invariants
//! - `Created` writes only the creation stamp; the update stamp stays empty.
//! - `Updated` writes only the update stamp; the creation stamp is write-once.
//! - `Unchanged` writes nothing.
//! - Every stamp written is exactly `now`; callers choose one `now` per flush.

use chrono::{DateTime, Utc};
use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::model::descriptor::{EntityDescriptor, EntityTypeId};
use crate::model::entity::AuditStamps;
use crate::tracker::ChangeKind;

/// Failure while assigning an audit stamp.
#[derive(Debug)]
pub enum TimestampWriteError {
    /// Creation stamp is already present and may not be reassigned.
    AlreadyStamped {
        type_id: EntityTypeId,
        field: String,
    },
    /// A hook refused to stamp the entity.
    Rejected {
        type_id: EntityTypeId,
        reason: String,
    },
    /// Storage rejected the stamp statement.
    Storage {
        type_id: EntityTypeId,
        source: rusqlite::Error,
    },
}

impl Display for TimestampWriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyStamped { type_id, field } => {
                write!(f, "{type_id}.{field} is already stamped")
            }
            Self::Rejected { type_id, reason } => {
                write!(f, "timestamp hook rejected {type_id}: {reason}")
            }
            Self::Storage { type_id, source } => {
                write!(f, "storage rejected audit stamps for {type_id}: {source}")
            }
        }
    }
}

impl Error for TimestampWriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::AlreadyStamped { .. } => None,
            Self::Rejected { .. } => None,
            Self::Storage { source, .. } => Some(source),
        }
    }
}

/// Handler run for each classified entity during a flush.
///
/// Implementations mutate `stamps` only; the caller persists them and
/// publishes them to the entity once the whole flush succeeds.
pub trait TimestampHook: Send + Sync {
    fn apply(
        &self,
        kind: ChangeKind,
        descriptor: &EntityDescriptor,
        stamps: &mut AuditStamps,
        now: DateTime<Utc>,
    ) -> Result<(), TimestampWriteError>;
}

/// Default created/updated stamping policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampPolicy;

impl TimestampHook for TimestampPolicy {
    fn apply(
        &self,
        kind: ChangeKind,
        descriptor: &EntityDescriptor,
        stamps: &mut AuditStamps,
        now: DateTime<Utc>,
    ) -> Result<(), TimestampWriteError> {
        match kind {
            ChangeKind::Created => {
                let Some(field) = descriptor.created_at_field.as_ref() else {
                    return Ok(());
                };
                if stamps.created_at.is_some() {
                    return Err(TimestampWriteError::AlreadyStamped {
                        type_id: descriptor.type_id.clone(),
                        field: field.clone(),
                    });
                }
                stamps.created_at = Some(now);
            }
            ChangeKind::Updated => {
                if descriptor.updated_at_field.is_none() {
                    return Ok(());
                }
                stamps.updated_at = Some(now);
            }
            ChangeKind::Unchanged => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{TimestampHook, TimestampPolicy, TimestampWriteError};
    use crate::clock::from_epoch_millis;
    use crate::model::descriptor::EntityDescriptor;
    use crate::model::entity::AuditStamps;
    use crate::tracker::ChangeKind;

    fn users() -> EntityDescriptor {
        EntityDescriptor::new("User", "users").with_audit_columns()
    }

    #[test]
    fn created_sets_only_created_at() {
        let now = from_epoch_millis(5_000).unwrap();
        let mut stamps = AuditStamps::default();
        TimestampPolicy
            .apply(ChangeKind::Created, &users(), &mut stamps, now)
            .unwrap();
        assert_eq!(stamps.created_at, Some(now));
        assert_eq!(stamps.updated_at, None);
    }

    #[test]
    fn updated_sets_only_updated_at() {
        let created = from_epoch_millis(1_000).unwrap();
        let now = from_epoch_millis(5_000).unwrap();
        let mut stamps = AuditStamps {
            created_at: Some(created),
            updated_at: None,
        };
        TimestampPolicy
            .apply(ChangeKind::Updated, &users(), &mut stamps, now)
            .unwrap();
        assert_eq!(stamps.created_at, Some(created));
        assert_eq!(stamps.updated_at, Some(now));
    }

    #[test]
    fn unchanged_is_noop() {
        let created = from_epoch_millis(1_000).unwrap();
        let mut stamps = AuditStamps {
            created_at: Some(created),
            updated_at: None,
        };
        let before = stamps;
        TimestampPolicy
            .apply(
                ChangeKind::Unchanged,
                &users(),
                &mut stamps,
                from_epoch_millis(9_000).unwrap(),
            )
            .unwrap();
        assert_eq!(stamps, before);
    }

    #[test]
    fn created_at_is_write_once() {
        let mut stamps = AuditStamps {
            created_at: from_epoch_millis(1_000),
            updated_at: None,
        };
        let err = TimestampPolicy
            .apply(
                ChangeKind::Created,
                &users(),
                &mut stamps,
                from_epoch_millis(2_000).unwrap(),
            )
            .expect_err("second creation stamp must fail");
        assert!(matches!(err, TimestampWriteError::AlreadyStamped { ref field, .. } if field == "created_at"));
        assert_eq!(stamps.created_at, from_epoch_millis(1_000));
    }

    #[test]
    fn updated_overwrites_previous_update_stamp_with_now() {
        let mut stamps = AuditStamps {
            created_at: from_epoch_millis(1_000),
            updated_at: from_epoch_millis(8_000),
        };
        TimestampPolicy
            .apply(
                ChangeKind::Updated,
                &users(),
                &mut stamps,
                from_epoch_millis(9_500).unwrap(),
            )
            .unwrap();
        assert_eq!(stamps.created_at, from_epoch_millis(1_000));
        assert_eq!(stamps.updated_at, from_epoch_millis(9_500));
    }

    #[test]
    fn undeclared_fields_are_skipped() {
        let created_only = EntityDescriptor::new("Event", "events").with_created_at("created_at");
        let mut stamps = AuditStamps {
            created_at: from_epoch_millis(1_000),
            updated_at: None,
        };
        TimestampPolicy
            .apply(
                ChangeKind::Updated,
                &created_only,
                &mut stamps,
                from_epoch_millis(2_000).unwrap(),
            )
            .unwrap();
        assert_eq!(stamps.updated_at, None);

        let updated_only = EntityDescriptor::new("Counter", "counters").with_updated_at("touched_at");
        let mut stamps = AuditStamps::default();
        TimestampPolicy
            .apply(
                ChangeKind::Created,
                &updated_only,
                &mut stamps,
                from_epoch_millis(2_000).unwrap(),
            )
            .unwrap();
        assert_eq!(stamps, AuditStamps::default());
    }
}
