//! Hook registry binding entity kinds to timestamp hooks.
//!
//! # Responsibility
//! - Hold one descriptor and hook binding per entity kind.
//! - Reject inconsistent registrations at setup time.
//!
//! # Invariants
//! - Registration is idempotent for identical descriptors and hooks.
//! - The registry is populated before any store opens and is shared
//!   read-only afterwards (`Arc<HookRegistry>`).

use log::{info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::hook::policy::{TimestampHook, TimestampPolicy};
use crate::model::descriptor::{DescriptorError, EntityDescriptor, EntityTypeId};

/// Setup-time configuration failure. Fatal for store startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    InvalidDescriptor {
        type_id: EntityTypeId,
        source: DescriptorError,
    },
    TypeIdMismatch {
        registered_as: EntityTypeId,
        descriptor_type: EntityTypeId,
    },
    ConflictingDescriptor(EntityTypeId),
    ConflictingHook(EntityTypeId),
    MissingTable {
        type_id: EntityTypeId,
        table: String,
    },
    MissingColumn {
        type_id: EntityTypeId,
        table: String,
        column: String,
    },
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDescriptor { type_id, source } => {
                write!(f, "invalid descriptor for {type_id}: {source}")
            }
            Self::TypeIdMismatch {
                registered_as,
                descriptor_type,
            } => write!(
                f,
                "descriptor for {descriptor_type} cannot be registered as {registered_as}"
            ),
            Self::ConflictingDescriptor(type_id) => {
                write!(f, "{type_id} is already registered with a different descriptor")
            }
            Self::ConflictingHook(type_id) => {
                write!(f, "{type_id} is already registered with a different hook")
            }
            Self::MissingTable { type_id, table } => {
                write!(f, "{type_id} requires table `{table}`")
            }
            Self::MissingColumn {
                type_id,
                table,
                column,
            } => write!(f, "{type_id} requires column `{column}` in table `{table}`"),
        }
    }
}

impl Error for ConfigurationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidDescriptor { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Hook lookup result for one entity kind.
#[derive(Clone, Copy)]
pub enum HookBinding<'a> {
    Stamped(&'a dyn TimestampHook),
    /// Kind declares no audit fields.
    NotConfigured,
}

impl HookBinding<'_> {
    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Stamped(_))
    }
}

struct Registration {
    descriptor: EntityDescriptor,
    hook: Arc<dyn TimestampHook>,
    custom: bool,
}

/// Entity kind registry. Write at setup, read during units of work.
#[derive(Default)]
pub struct HookRegistry {
    types: BTreeMap<EntityTypeId, Registration>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(
                self.types
                    .iter()
                    .map(|(type_id, registration)| (type_id, &registration.descriptor)),
            )
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from descriptors using the default policy for each.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = EntityDescriptor>,
    ) -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            let type_id = descriptor.type_id.clone();
            registry.register(&type_id, descriptor)?;
        }
        Ok(registry)
    }

    /// Registers an entity kind with the default `TimestampPolicy`.
    pub fn register(
        &mut self,
        type_id: &str,
        descriptor: EntityDescriptor,
    ) -> Result<(), ConfigurationError> {
        self.insert(type_id, descriptor, Arc::new(TimestampPolicy), false)
    }

    /// Registers an entity kind with a caller-provided hook.
    pub fn register_with_hook(
        &mut self,
        type_id: &str,
        descriptor: EntityDescriptor,
        hook: Arc<dyn TimestampHook>,
    ) -> Result<(), ConfigurationError> {
        self.insert(type_id, descriptor, hook, true)
    }

    /// Returns the hook binding for `type_id`, or `None` for unknown kinds.
    pub fn hook_for(&self, type_id: &str) -> Option<HookBinding<'_>> {
        let registration = self.types.get(type_id)?;
        if !registration.descriptor.is_stamped() {
            return Some(HookBinding::NotConfigured);
        }
        Some(HookBinding::Stamped(registration.hook.as_ref()))
    }

    pub fn descriptor(&self, type_id: &str) -> Option<&EntityDescriptor> {
        self.types
            .get(type_id)
            .map(|registration| &registration.descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.types.values().map(|registration| &registration.descriptor)
    }

    /// Returns registered kinds, sorted.
    pub fn type_ids(&self) -> Vec<EntityTypeId> {
        self.types.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn insert(
        &mut self,
        type_id: &str,
        descriptor: EntityDescriptor,
        hook: Arc<dyn TimestampHook>,
        custom: bool,
    ) -> Result<(), ConfigurationError> {
        if descriptor.type_id != type_id {
            return Err(ConfigurationError::TypeIdMismatch {
                registered_as: type_id.to_string(),
                descriptor_type: descriptor.type_id,
            });
        }
        descriptor
            .validate()
            .map_err(|source| ConfigurationError::InvalidDescriptor {
                type_id: type_id.to_string(),
                source,
            })?;

        if let Some(existing) = self.types.get(type_id) {
            if existing.descriptor != descriptor {
                warn!(
                    "event=hook_register module=hook status=error type={} error_code=conflicting_descriptor",
                    type_id
                );
                return Err(ConfigurationError::ConflictingDescriptor(type_id.to_string()));
            }
            let same_hook = existing.custom == custom
                && (!custom || std::ptr::addr_eq(Arc::as_ptr(&existing.hook), Arc::as_ptr(&hook)));
            if !same_hook {
                warn!(
                    "event=hook_register module=hook status=error type={} error_code=conflicting_hook",
                    type_id
                );
                return Err(ConfigurationError::ConflictingHook(type_id.to_string()));
            }
            return Ok(());
        }

        let binding = match (descriptor.is_stamped(), custom) {
            (false, _) => "none",
            (true, false) => "default",
            (true, true) => "custom",
        };
        info!(
            "event=hook_register module=hook status=ok type={} table={} binding={}",
            type_id, descriptor.table, binding
        );
        self.types.insert(
            type_id.to_string(),
            Registration {
                descriptor,
                hook,
                custom,
            },
        );
        Ok(())
    }
}
