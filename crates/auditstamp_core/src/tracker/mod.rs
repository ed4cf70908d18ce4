//! Change tracking for units of work.
//!
//! # Responsibility
//! - Classify each touched entity as created, updated or unchanged per flush.
//!
//! # Invariants
//! - One tracker per unit of work; trackers are never shared.

mod change_tracker;

pub use change_tracker::{
    ChangeKind, ChangeRecord, ChangeTracker, ClassificationError, TrackOrigin,
};
