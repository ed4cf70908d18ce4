//! Entity model for audit stamping.
//!
//! # Responsibility
//! - Define static per-kind metadata (`EntityDescriptor`).
//! - Define the per-instance record carried through a unit of work (`Entity`).
//!
//! # Invariants
//! - Business fields are opaque; only identity and audit stamps have meaning
//!   to the core.

pub mod descriptor;
pub mod entity;
