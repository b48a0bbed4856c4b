//! # System Constants
//!
//! Field names, key prefixes and defaults that define the wire contract between the
//! pipeline components and the shared store.

/// Lifecycle record field names (set-once timestamps and audit fields)
pub mod lifecycle_fields {
    pub const INGESTED_AT: &str = "ingested_at";
    pub const SOURCE_API_TIMESTAMP: &str = "source_api_timestamp";
    pub const FILTERED_AT: &str = "filtered_at";
    pub const FILTERED_REASON: &str = "filtered_reason";
    pub const FAILED_AT: &str = "failed_at";
    pub const FAILED_REASON: &str = "failed_reason";
    pub const INSERTED_AT: &str = "inserted_at";
}

/// Key prefixes owned by the lifecycle tracker
pub mod tracking {
    pub const META_PREFIX: &str = "tracking:meta";
    pub const PENDING_PREFIX: &str = "tracking:pending";
}

/// Reasons recorded alongside terminal lifecycle fields
pub mod reasons {
    pub const NO_MATCHING_SYMBOLS: &str = "no_matching_symbols";
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const ENRICHMENT_FAILED: &str = "enrichment_failed";
}

/// Relationship write queue shared by every producer of graph edges
pub const DEFAULT_EDGE_QUEUE: &str = "edges:queues:pending";

/// Prefix for the cost-tiered document job queues
pub const DEFAULT_DOCUMENT_QUEUE_PREFIX: &str = "documents:queues";

/// Placeholder recorded when a caller supplies no reason for a terminal field
pub const UNSPECIFIED_REASON: &str = "unspecified";
