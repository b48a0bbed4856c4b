//! # Pipeline Metrics
//!
//! OpenTelemetry instruments for every pipeline component. Instruments are no-ops
//! unless the host process installs a global meter provider.
//!
//! ## Usage
//!
//! ```rust
//! use eventgraph_core::metrics::*;
//! use opentelemetry::KeyValue;
//!
//! items_processed_total().add(1, &[KeyValue::new("source", "news")]);
//!
//! let start = std::time::Instant::now();
//! // ... write to the destination store ...
//! destination_write_duration().record(
//!     start.elapsed().as_millis() as f64,
//!     &[KeyValue::new("source", "news")],
//! );
//! ```

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static PIPELINE_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    PIPELINE_METER.get_or_init(|| opentelemetry::global::meter_provider().meter("eventgraph"))
}

/// Label set carrying only the source name
pub fn source_labels(source: &str) -> [KeyValue; 1] {
    [KeyValue::new("source", source.to_string())]
}

// Item processor

/// Items promoted to the processed namespace
///
/// Labels:
/// - source: news, filing, transcript
pub fn items_processed_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.items.processed.total")
        .with_description("Items promoted to the processed namespace")
        .build()
}

/// Items dropped because no tracked symbol matched the monitored universe
pub fn items_filtered_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.items.filtered.total")
        .with_description("Items filtered out by the symbol universe")
        .build()
}

/// Items routed to the failed lane
///
/// Labels:
/// - source
/// - reason: validation_failed, enrichment_failed
pub fn items_failed_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.items.failed.total")
        .with_description("Items routed to the failed lane")
        .build()
}

/// Items short-circuited because a processed entry already existed
pub fn items_duplicate_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.items.duplicate.total")
        .with_description("Duplicate items short-circuited by the processor")
        .build()
}

/// Store reconnections triggered by the consecutive-error tracker
///
/// Labels:
/// - component
/// - error_class: transient_io, downstream_failure
pub fn store_reconnects_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.store.reconnects.total")
        .with_description("Store reconnections after consecutive errors")
        .build()
}

// Dispatch and reconciliation

/// Destination store writes performed by the dispatcher or reconciler
///
/// Labels:
/// - source
/// - path: dispatch, reconcile
/// - created: true, false
pub fn destination_writes_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.destination.writes.total")
        .with_description("Destination store item writes")
        .build()
}

/// Notifications or sweep entries skipped because `inserted_at` was already set
pub fn dedup_skips_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.dispatch.dedup_skips.total")
        .with_description("Writes skipped by the lifecycle dedup guard")
        .build()
}

/// Completed reconciliation sweeps
pub fn reconciliation_runs_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.reconciliation.runs.total")
        .with_description("Completed reconciliation sweeps")
        .build()
}

/// Items and jobs re-driven by reconciliation
///
/// Labels:
/// - kind: item, job
pub fn reconciliation_redriven_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.reconciliation.redriven.total")
        .with_description("Items and document jobs re-driven by reconciliation")
        .build()
}

/// Destination write duration in milliseconds
pub fn destination_write_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("eventgraph.destination.write.duration")
        .with_description("Destination store item write duration")
        .with_unit("ms")
        .build()
}

/// Reconciliation sweep duration in milliseconds
pub fn reconciliation_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("eventgraph.reconciliation.duration")
        .with_description("Reconciliation sweep duration")
        .with_unit("ms")
        .build()
}

// Document work

/// Document jobs reaching a status
///
/// Labels:
/// - status: queued, completed, failed, skipped, reference_only
/// - tier: heavy, medium, light
pub fn document_jobs_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.documents.jobs.total")
        .with_description("Document jobs by resulting status")
        .build()
}

/// Jobs demoted to PENDING because no concurrency slot was available
pub fn semaphore_demotions_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.documents.semaphore_demotions.total")
        .with_description("Document jobs demoted after semaphore exhaustion")
        .build()
}

// Edge batcher

/// Committed edge groups
///
/// Labels:
/// - relationship_type
pub fn edge_groups_committed_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.edges.groups_committed.total")
        .with_description("Edge groups committed to the destination store")
        .build()
}

/// Committed edge batches
pub fn edge_batches_committed_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.edges.batches_committed.total")
        .with_description("Edge batches committed to the destination store")
        .build()
}

/// Edge requests skipped because they were malformed or their kinds were unresolved
///
/// Labels:
/// - reason: malformed, unresolved_kind
pub fn edge_requests_skipped_total() -> Counter<u64> {
    meter()
        .u64_counter("eventgraph.edges.requests_skipped.total")
        .with_description("Edge write requests skipped")
        .build()
}

/// Edge batch commit duration in milliseconds
pub fn edge_batch_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("eventgraph.edges.batch.duration")
        .with_description("Edge batch commit duration")
        .with_unit("ms")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruments_are_usable_without_provider() {
        items_processed_total().add(1, &source_labels("news"));
        destination_write_duration().record(1.5, &source_labels("filing"));
        edge_groups_committed_total().add(
            2,
            &[KeyValue::new("relationship_type", "INFLUENCES")],
        );
    }
}
