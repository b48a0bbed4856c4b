//! Guarded destination write path shared by notifications and reconciliation.
//!
//! `dispatch` resolves the transient entry (historical first, then live), consults
//! the lifecycle record, writes to the destination store and then records
//! `inserted_at`, deletes a consumed `complete` entry and queues the item's symbol
//! relationships in one store batch.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::constants::lifecycle_fields as fields;
use crate::constants::reasons;
use crate::edges::EdgeQueue;
use crate::error::{ErrorClass, PipelineResult};
use crate::graph::GraphStore;
use crate::keys::item_key;
use crate::lifecycle::{LifecycleTracker, Mark};
use crate::logging::log_item_operation;
use crate::metrics::{dedup_skips_total, destination_write_duration, destination_writes_total, source_labels};
use crate::models::{EdgeWriteRequest, GraphItem, ItemState, Namespace, SourceKind};
use crate::store::{KvStore, StoreBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Written for the first time; `created` reports a fresh destination node
    Written { created: bool },
    /// Mutable entity rewritten because the transient version was strictly newer
    Refreshed,
    /// Already inserted; only stale transient state was cleaned up
    Deduplicated,
    /// No transient entry under either namespace
    Missing,
    /// Payload could not be turned into a destination item; recorded as failed
    Invalid,
}

impl DispatchOutcome {
    pub fn wrote(&self) -> bool {
        matches!(self, Self::Written { .. } | Self::Refreshed)
    }

    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Deduplicated => Some(ErrorClass::Duplicate),
            Self::Invalid => Some(ErrorClass::Validation),
            _ => None,
        }
    }
}

/// Symbol relationships implied by an item; kinds come from the type table
pub fn symbol_edges(item: &GraphItem) -> Vec<EdgeWriteRequest> {
    item.symbols
        .iter()
        .map(|symbol| match item.source {
            SourceKind::News => EdgeWriteRequest::new("INFLUENCES", &item.id, symbol),
            SourceKind::Filing => EdgeWriteRequest::new("PRIMARY_FILER", &item.id, symbol),
            SourceKind::Transcript => EdgeWriteRequest::new("HAS_TRANSCRIPT", symbol, &item.id),
        })
        .collect()
}

pub struct Dispatcher {
    store: Arc<dyn KvStore>,
    tracker: LifecycleTracker,
    graph: Arc<dyn GraphStore>,
    edges: EdgeQueue,
    config: Arc<PipelineConfig>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("graph", &self.graph.backend_name())
            .field("edges", &self.edges)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        tracker: LifecycleTracker,
        graph: Arc<dyn GraphStore>,
        edges: EdgeQueue,
        config: Arc<PipelineConfig>,
    ) -> Self {
        Self {
            store: Arc::clone(tracker.store()),
            tracker,
            graph,
            edges,
            config,
        }
    }

    async fn resolve(
        &self,
        source: SourceKind,
        state: ItemState,
        id: &str,
    ) -> PipelineResult<Option<(String, String)>> {
        for namespace in Namespace::LOOKUP_ORDER {
            let key = item_key(source, namespace, state, id);
            if let Some(payload) = self.store.get(&key).await? {
                return Ok(Some((key, payload)));
            }
        }
        Ok(None)
    }

    /// Run the guarded write path for one transient entry
    pub async fn dispatch(&self, source: SourceKind, state: ItemState, id: &str) -> PipelineResult<DispatchOutcome> {
        let Some((key, payload)) = self.resolve(source, state, id).await? else {
            debug!(source = %source, item_id = id, state = %state, "Transient entry missing");
            return Ok(DispatchOutcome::Missing);
        };
        // Incomplete entries belong to the promotion stage
        let consumes_key = state == ItemState::Complete;

        if self.tracker.is_inserted(source, id).await? {
            return self.dispatch_inserted(source, id, &key, &payload, consumes_key).await;
        }

        let item = match GraphItem::from_payload(source, id, &payload) {
            Ok(item) => item,
            Err(e) => {
                let mut batch = StoreBatch::new();
                self.tracker
                    .mark_timestamp(
                        source,
                        id,
                        Mark::now(fields::FAILED_AT).with_reason(reasons::VALIDATION_FAILED),
                        Some(&mut batch),
                    )
                    .await?;
                if consumes_key {
                    batch.delete(&key);
                }
                self.store.execute(batch).await?;
                log_item_operation("dispatch", source.as_str(), id, "invalid", Some(&e.to_string()));
                return Ok(DispatchOutcome::Invalid);
            }
        };

        let created = self.write(&item).await?;

        let mut batch = StoreBatch::new();
        self.tracker
            .mark_timestamp(source, id, Mark::now(fields::INSERTED_AT), Some(&mut batch))
            .await?;
        if consumes_key {
            batch.delete(&key);
        }
        self.push_edges(&mut batch, &item)?;
        self.store.execute(batch).await?;

        log_item_operation(
            "dispatch",
            source.as_str(),
            id,
            "inserted",
            Some(if created { "created" } else { "updated" }),
        );
        Ok(DispatchOutcome::Written { created })
    }

    /// Already-inserted items: refresh a strictly newer mutable version, otherwise
    /// only clean up the consumed transient entry
    async fn dispatch_inserted(
        &self,
        source: SourceKind,
        id: &str,
        key: &str,
        payload: &str,
        consumes_key: bool,
    ) -> PipelineResult<DispatchOutcome> {
        if self.config.is_mutable(source) {
            match GraphItem::from_payload(source, id, payload) {
                Ok(item) if self.is_newer(&item).await? => {
                    self.write(&item).await?;
                    let mut batch = StoreBatch::new();
                    if consumes_key {
                        batch.delete(key);
                    }
                    self.push_edges(&mut batch, &item)?;
                    self.store.execute(batch).await?;
                    log_item_operation("dispatch", source.as_str(), id, "refreshed", None);
                    return Ok(DispatchOutcome::Refreshed);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(source = %source, item_id = id, error = %e, "Unreadable update for inserted item; ignored");
                }
            }
        }

        if consumes_key {
            let mut batch = StoreBatch::new();
            batch.delete(key);
            self.store.execute(batch).await?;
        }
        dedup_skips_total().add(1, &source_labels(source.as_str()));
        debug!(source = %source, item_id = id, "Already inserted; skipped");
        Ok(DispatchOutcome::Deduplicated)
    }

    async fn is_newer(&self, item: &GraphItem) -> PipelineResult<bool> {
        let Some(version) = item.version else {
            return Ok(false);
        };
        let stored = self.graph.item_version(item.source, &item.id).await?;
        Ok(stored.map_or(true, |stored| version > stored))
    }

    async fn write(&self, item: &GraphItem) -> PipelineResult<bool> {
        let start = Instant::now();
        let outcome = self.graph.upsert_item(item).await?;
        destination_write_duration().record(
            start.elapsed().as_secs_f64() * 1000.0,
            &source_labels(item.source.as_str()),
        );
        destination_writes_total().add(
            1,
            &[
                KeyValue::new("source", item.source.as_str()),
                KeyValue::new("created", outcome.created),
            ],
        );
        Ok(outcome.created)
    }

    fn push_edges(&self, batch: &mut StoreBatch, item: &GraphItem) -> PipelineResult<()> {
        for request in symbol_edges(item) {
            self.edges.push_into(batch, &request)?;
        }
        Ok(())
    }
}
