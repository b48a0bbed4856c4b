//! # Relationship Writes
//!
//! Producers push [`EdgeWriteRequest`](crate::models::EdgeWriteRequest)s onto one
//! shared queue through [`EdgeQueue`]; the [`EdgeBatcher`] is its single consumer.

pub mod batcher;
pub mod queue;
pub mod type_resolution;

pub use batcher::{group_requests, BatchReport, EdgeBatcher};
pub use queue::EdgeQueue;
pub use type_resolution::{default_kinds, is_identifier, resolve_kinds};
