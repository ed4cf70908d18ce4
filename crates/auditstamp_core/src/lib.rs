//! Audit timestamp auto-fill for transactional entity storage.
//! Entities created in a unit of work get `created_at`; persisted entities
//! whose business fields change get `updated_at`. Both are assigned at flush.

pub mod clock;
pub mod config;
pub mod db;
pub mod hook;
pub mod logging;
pub mod model;
pub mod tracker;
pub mod uow;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, LoggingConfig, StoreConfig};
pub use hook::{
    ConfigurationError, HookBinding, HookRegistry, TimestampHook, TimestampPolicy,
    TimestampWriteError,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::descriptor::{DescriptorError, EntityDescriptor, EntityTypeId};
pub use model::entity::{AuditStamps, Entity, EntityId, EntityRef, FieldValue};
pub use tracker::{ChangeKind, ChangeRecord, ChangeTracker, ClassificationError, TrackOrigin};
pub use uow::{
    AuditStore, Committed, FlushReport, StoreError, StoreResult, UnitOfWork, UnitOfWorkError,
    UowResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
