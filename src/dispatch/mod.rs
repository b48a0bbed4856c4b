//! # Dispatch
//!
//! Moves enriched items from the transient `complete`/`incomplete` partitions into
//! the destination store. Two paths share one guarded write routine: the
//! notification listener reacts to channel messages, and the periodic
//! reconciliation sweep catches anything the listener missed.

pub mod dispatcher;
pub mod publisher;
pub mod reconciler;
pub mod service;

pub use dispatcher::{symbol_edges, DispatchOutcome, Dispatcher};
pub use publisher::TransientPublisher;
pub use reconciler::{ReconcileReport, Reconciler};
pub use service::DispatchService;
