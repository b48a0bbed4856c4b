//! # Document Work Subsystem
//!
//! Heavy per-document work: classification into cost tiers, atomic job routing,
//! bounded-concurrency worker pools, and deadline-bounded section extraction for
//! processors that split a document into sections.

pub mod classifier;
pub mod router;
pub mod section;
pub mod worker_pool;

pub use classifier::{Classification, DocumentClassifier};
pub use router::{DocumentRouter, RouteOutcome};
pub use section::{SectionBatchProcessor, SectionBatchResult, SectionExtractor};
pub use worker_pool::{DocumentProcessor, JobOutcome, WorkerPool};
