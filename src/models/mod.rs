//! # Data Models
//!
//! Items and their source-typed payloads, lifecycle records, document jobs, edge
//! write requests and the destination-store views of them.

pub mod document_job;
pub mod edge;
pub mod graph_item;
pub mod item;
pub mod lifecycle;

pub use document_job::{DocumentJob, DocumentJobPayload, DocumentJobRequest, DocumentTier};
pub use edge::{EdgeGroup, EdgeGroupKey, EdgeWriteRequest, GroupedEdge};
pub use graph_item::GraphItem;
pub use item::{
    FilingItem, ItemIdentity, ItemState, Namespace, NewsItem, NormalizableItem, NormalizedItem,
    ProcessedItem, SourceItem, SourceKind, TranscriptItem,
};
pub use lifecycle::{LifecycleRecord, TerminalOutcome};
