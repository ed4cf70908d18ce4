//! Timestamp hooks and their registry.
//!
//! # Responsibility
//! - Apply created/updated stamps for classified changes (`policy`).
//! - Bind entity kinds to hooks with typed lookup (`registry`).

pub mod policy;
pub mod registry;

pub use policy::{TimestampHook, TimestampPolicy, TimestampWriteError};
pub use registry::{ConfigurationError, HookBinding, HookRegistry};
