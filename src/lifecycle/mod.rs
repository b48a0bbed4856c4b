//! # Lifecycle Tracker
//!
//! Per-item hash of set-once stage timestamps plus pending-set membership. Every
//! other component uses it as its idempotency guard.

pub mod tracker;

pub use tracker::{LifecycleTracker, Mark, MarkOutcome};
