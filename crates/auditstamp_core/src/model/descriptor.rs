//! Entity descriptor model.
//!
//! # Responsibility
//! - Describe one persisted entity kind: table, identity column and the
//!   optional audit timestamp columns.
//! - Validate identifier shape before a descriptor enters the registry.
//!
//! # Invariants
//! - Descriptors are immutable after registration.
//! - `created_at_field`, `updated_at_field` and `identity_field` are pairwise
//!   distinct when present.
//! - A descriptor with neither timestamp field opts out of auto-stamping.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Entity kind name, e.g. `User` or `Role`.
pub type EntityTypeId = String;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Static metadata for one persisted entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Entity kind name used as registry key.
    pub type_id: EntityTypeId,
    /// Storage table backing this kind.
    pub table: String,
    /// Primary key column, assigned by storage on insert.
    #[serde(default = "default_identity_field")]
    pub identity_field: String,
    /// Nullable creation timestamp column.
    #[serde(default)]
    pub created_at_field: Option<String>,
    /// Nullable update timestamp column.
    #[serde(default)]
    pub updated_at_field: Option<String>,
}

fn default_identity_field() -> String {
    "id".to_string()
}

/// Reason a descriptor was rejected before registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    InvalidIdentifier { role: &'static str, value: String },
    DuplicateField(String),
}

impl Display for DescriptorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier { role, value } => {
                write!(f, "invalid {role} identifier `{value}`")
            }
            Self::DuplicateField(field) => {
                write!(f, "field `{field}` is declared for more than one role")
            }
        }
    }
}

impl Error for DescriptorError {}

impl EntityDescriptor {
    /// Creates a descriptor with identity column `id` and no audit columns.
    pub fn new(type_id: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            table: table.into(),
            identity_field: default_identity_field(),
            created_at_field: None,
            updated_at_field: None,
        }
    }

    /// Overrides the identity column.
    pub fn with_identity(mut self, field: impl Into<String>) -> Self {
        self.identity_field = field.into();
        self
    }

    /// Declares the creation timestamp column.
    pub fn with_created_at(mut self, field: impl Into<String>) -> Self {
        self.created_at_field = Some(field.into());
        self
    }

    /// Declares the update timestamp column.
    pub fn with_updated_at(mut self, field: impl Into<String>) -> Self {
        self.updated_at_field = Some(field.into());
        self
    }

    /// Declares both audit columns with the conventional names.
    pub fn with_audit_columns(self) -> Self {
        self.with_created_at("created_at").with_updated_at("updated_at")
    }

    /// Returns whether this kind carries at least one audit column.
    pub fn is_stamped(&self) -> bool {
        self.created_at_field.is_some() || self.updated_at_field.is_some()
    }

    /// Returns whether `field` is one of the audit columns.
    pub fn is_audit_field(&self, field: &str) -> bool {
        self.created_at_field.as_deref() == Some(field)
            || self.updated_at_field.as_deref() == Some(field)
    }

    /// Checks identifier shape and field distinctness.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        check_identifier("type", &self.type_id)?;
        check_identifier("table", &self.table)?;
        check_identifier("identity", &self.identity_field)?;

        let mut seen = vec![self.identity_field.as_str()];
        for (role, field) in [
            ("created_at", self.created_at_field.as_deref()),
            ("updated_at", self.updated_at_field.as_deref()),
        ] {
            let Some(field) = field else {
                continue;
            };
            check_identifier(role, field)?;
            if seen.contains(&field) {
                return Err(DescriptorError::DuplicateField(field.to_string()));
            }
            seen.push(field);
        }

        Ok(())
    }
}

fn check_identifier(role: &'static str, value: &str) -> Result<(), DescriptorError> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(DescriptorError::InvalidIdentifier {
            role,
            value: value.to_string(),
        })
    }
}
