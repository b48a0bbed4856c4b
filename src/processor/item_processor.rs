//! # Item Processor
//!
//! One processor per source. Each iteration pops one raw reference and drives the
//! item to exactly one of: dropped (payload gone), filtered (no monitored symbol),
//! failed lane (validation or enrichment failure), processed, or duplicate.
//!
//! The success path is a single `PromoteProcessed` store operation: the processed
//! entry is written, queued and announced only if it did not already exist, and the
//! raw entry is deleted either way.

use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use super::plugin::{EnrichmentService, SourcePlugin, SymbolUniverse};
use crate::config::{ProcessorConfig, SourceConfig};
use crate::constants::lifecycle_fields as fields;
use crate::constants::reasons;
use crate::documents::DocumentRouter;
use crate::error::{ErrorClass, PipelineError, PipelineResult};
use crate::keys::{channel, item_key, queue_key, ItemRef, QueueLane};
use crate::lifecycle::{LifecycleTracker, Mark};
use crate::logging::{log_error, log_item_operation};
use crate::metrics::{
    items_duplicate_total, items_failed_total, items_filtered_total, items_processed_total,
    source_labels, store_reconnects_total,
};
use crate::models::{DocumentJobRequest, ItemState, NormalizedItem, ProcessedItem, SourceKind};
use crate::resilience::{ConsecutiveErrorTracker, ErrorAction};
use crate::shutdown::ShutdownSignal;
use crate::store::{KvStore, StoreBatch, StoreOp};

/// Terminal handling of one popped reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Nothing arrived within the pop timeout
    Idle,
    /// Reference unparseable or payload already gone
    Dropped,
    Filtered,
    Failed { reason: String },
    Processed,
    /// A processed entry already existed; raw entry cleaned up
    Duplicate,
}

impl ProcessOutcome {
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Failed { .. } => Some(ErrorClass::Validation),
            Self::Duplicate => Some(ErrorClass::Duplicate),
            _ => None,
        }
    }
}

/// Payload stored in the failed lane
#[derive(Debug, serde::Serialize)]
struct FailedEntry<'a> {
    reason: &'a str,
    error: String,
    failed_at: String,
    payload: &'a str,
}

pub struct ItemProcessor {
    source: SourceConfig,
    store: Arc<dyn KvStore>,
    tracker: LifecycleTracker,
    plugin: Arc<dyn SourcePlugin>,
    enrichment: Arc<dyn EnrichmentService>,
    universe: SymbolUniverse,
    router: Option<Arc<DocumentRouter>>,
    config: ProcessorConfig,
}

impl std::fmt::Debug for ItemProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemProcessor")
            .field("source", &self.source.kind)
            .field("universe", &self.universe.len())
            .field("documents", &self.router.is_some())
            .finish()
    }
}

impl ItemProcessor {
    pub fn new(
        source: SourceConfig,
        tracker: LifecycleTracker,
        plugin: Arc<dyn SourcePlugin>,
        enrichment: Arc<dyn EnrichmentService>,
        config: &ProcessorConfig,
    ) -> Self {
        Self {
            store: Arc::clone(tracker.store()),
            universe: SymbolUniverse::new(&config.symbols),
            source,
            tracker,
            plugin,
            enrichment,
            router: None,
            config: config.clone(),
        }
    }

    /// Submit document jobs for processed items of this source
    pub fn with_router(mut self, router: Arc<DocumentRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn source(&self) -> SourceKind {
        self.source.kind
    }

    /// Pop and handle one raw reference
    pub async fn process_next(&self) -> PipelineResult<ProcessOutcome> {
        let source = self.source.kind;
        let raw_queue = queue_key(source, QueueLane::Raw);
        let Some(reference) = self
            .store
            .pop_blocking(&raw_queue, self.config.pop_timeout())
            .await?
        else {
            return Ok(ProcessOutcome::Idle);
        };

        let Some(item_ref) = ItemRef::parse(&reference) else {
            warn!(source = %source, reference = %reference, "Unparseable raw reference");
            return Ok(ProcessOutcome::Dropped);
        };
        self.process_ref(&item_ref).await
    }

    /// Handle one raw item by reference
    pub async fn process_ref(&self, item_ref: &ItemRef) -> PipelineResult<ProcessOutcome> {
        let source = self.source.kind;
        let id = item_ref.id.as_str();
        let raw_key = item_key(source, item_ref.namespace, ItemState::Raw, id);

        let Some(payload) = self.store.get(&raw_key).await? else {
            debug!(source = %source, item_id = id, "Raw payload missing; dropping reference");
            return Ok(ProcessOutcome::Dropped);
        };

        let item = match self.plugin.normalize(&payload) {
            Ok(item) => item,
            Err(e) => {
                return self
                    .fail(item_ref, &raw_key, &payload, reasons::VALIDATION_FAILED, &e)
                    .await;
            }
        };

        let matched = self.universe.matching(&item.symbols);
        if matched.is_empty() {
            let mut batch = StoreBatch::new();
            batch.delete(&raw_key);
            self.tracker
                .mark_timestamp(
                    source,
                    id,
                    Mark::now(fields::FILTERED_AT).with_reason(reasons::NO_MATCHING_SYMBOLS),
                    Some(&mut batch),
                )
                .await?;
            self.store.execute(batch).await?;
            items_filtered_total().add(1, &source_labels(source.as_str()));
            log_item_operation("filter", source.as_str(), id, "filtered", Some(reasons::NO_MATCHING_SYMBOLS));
            return Ok(ProcessOutcome::Filtered);
        }

        let mut item = self.plugin.clean(item);
        item.symbols = matched;

        let enrichment = match self.enrichment.enrich(&item).await {
            Ok(enrichment) => enrichment,
            Err(e) => {
                return self
                    .fail(item_ref, &raw_key, &payload, reasons::ENRICHMENT_FAILED, &e)
                    .await;
            }
        };

        let processed = ProcessedItem {
            item,
            enrichment,
            processed_at: Utc::now(),
        };
        let mut batch = StoreBatch::new();
        let promote = batch.push(StoreOp::PromoteProcessed {
            processed_key: item_key(source, item_ref.namespace, ItemState::Processed, id),
            payload: serde_json::to_string(&processed)?,
            queue: queue_key(source, QueueLane::Processed),
            queue_value: item_ref.to_string(),
            channel: channel(source, ItemState::Processed),
            message: id.to_string(),
            raw_key,
        });
        let replies = self.store.execute(batch).await?;
        let promoted = replies.get(promote).is_some_and(|r| r.flag());

        if !promoted {
            items_duplicate_total().add(1, &source_labels(source.as_str()));
            log_item_operation("process", source.as_str(), id, "duplicate", None);
            return Ok(ProcessOutcome::Duplicate);
        }

        items_processed_total().add(1, &source_labels(source.as_str()));
        log_item_operation("process", source.as_str(), id, "processed", None);
        self.submit_document_job(id, &processed.item).await;
        Ok(ProcessOutcome::Processed)
    }

    async fn fail(
        &self,
        item_ref: &ItemRef,
        raw_key: &str,
        payload: &str,
        reason: &str,
        error: &PipelineError,
    ) -> PipelineResult<ProcessOutcome> {
        let source = self.source.kind;
        let id = item_ref.id.as_str();
        let entry = FailedEntry {
            reason,
            error: error.to_string(),
            failed_at: crate::models::lifecycle::format_timestamp(Utc::now()),
            payload,
        };

        let mut batch = StoreBatch::new();
        batch.set(
            item_key(source, item_ref.namespace, ItemState::Failed, id),
            serde_json::to_string(&entry)?,
            None,
        );
        batch.push_queue(queue_key(source, QueueLane::Failed), item_ref.to_string());
        batch.delete(raw_key);
        self.tracker
            .mark_timestamp(
                source,
                id,
                Mark::now(fields::FAILED_AT).with_reason(reason),
                Some(&mut batch),
            )
            .await?;
        self.store.execute(batch).await?;

        items_failed_total().add(
            1,
            &[
                KeyValue::new("source", source.as_str()),
                KeyValue::new("reason", reason.to_string()),
            ],
        );
        log_item_operation("process", source.as_str(), id, "failed", Some(&error.to_string()));
        Ok(ProcessOutcome::Failed {
            reason: reason.to_string(),
        })
    }

    /// Document job submission never fails the item; reconciliation covers gaps
    async fn submit_document_job(&self, id: &str, item: &NormalizedItem) {
        let Some(router) = self.router.as_ref().filter(|_| self.source.documents) else {
            return;
        };
        let request = DocumentJobRequest {
            job_id: format!("{}:{id}", self.source.kind),
            owner_id: item.metadata_str("cik").map(str::to_string),
            routing_key: item
                .metadata_str("primary_document_url")
                .map(str::to_string)
                .unwrap_or_else(|| id.to_string()),
            document_type: item.metadata_str("form_type").map(str::to_string),
        };
        if let Err(e) = router.submit(request).await {
            log_error(
                "item_processor",
                "submit_document_job",
                &e.to_string(),
                Some(id),
            );
        }
    }

    /// Process until `shutdown` triggers. A failing item never ends the loop.
    pub async fn run(&self, shutdown: ShutdownSignal) {
        let source = self.source.kind;
        let component = format!("processor:{source}");
        let mut errors = ConsecutiveErrorTracker::new(
            &component,
            self.config.io_error_threshold,
            self.config.generic_error_threshold,
        );
        info!(source = %source, "Item processor started");

        while !shutdown.is_triggered() {
            match self.process_next().await {
                Ok(_) => errors.record_success(),
                Err(e) => {
                    log_error(&component, "process_next", &e.to_string(), None);
                    if errors.record_failure(&e) == ErrorAction::Reconnect {
                        store_reconnects_total().add(1, &[KeyValue::new("component", component.clone())]);
                        if let Err(e) = self.store.reconnect().await {
                            warn!(source = %source, error = %e, "Store reconnect failed");
                        }
                        shutdown.sleep(self.config.reconnect_backoff()).await;
                    }
                }
            }
        }
        info!(source = %source, "Item processor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LifecycleConfig;
    use crate::processor::{JsonSourcePlugin, NoEnrichment, RawIngress};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;

    struct FailingEnrichment;

    #[async_trait]
    impl EnrichmentService for FailingEnrichment {
        async fn enrich(&self, _item: &NormalizedItem) -> PipelineResult<serde_json::Value> {
            Err(PipelineError::Enrichment("returns window unavailable".into()))
        }
    }

    fn setup(
        symbols: &[&str],
        enrichment: Arc<dyn EnrichmentService>,
    ) -> (ItemProcessor, RawIngress, Arc<InMemoryStore>, LifecycleTracker) {
        let store = Arc::new(InMemoryStore::new());
        let tracker = LifecycleTracker::new(store.clone(), LifecycleConfig::default());
        let config = ProcessorConfig {
            pop_timeout_ms: 10,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            ..ProcessorConfig::default()
        };
        let processor = ItemProcessor::new(
            SourceConfig::new(SourceKind::News),
            tracker.clone(),
            Arc::new(JsonSourcePlugin::new(SourceKind::News)),
            enrichment,
            &config,
        );
        (processor, RawIngress::new(tracker.clone()), store, tracker)
    }

    fn news(id: &str, symbol: &str) -> String {
        serde_json::json!({
            "id": id,
            "created": "2024-03-01T09:00:00Z",
            "title": "headline",
            "symbols": [symbol],
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_processed_path() {
        let (processor, ingress, store, _) = setup(&["AAPL"], Arc::new(NoEnrichment));
        ingress.submit_live(SourceKind::News, "1", &news("1", "aapl")).await.unwrap();

        assert_eq!(processor.process_next().await.unwrap(), ProcessOutcome::Processed);
        assert!(store.get("news:live:raw:1").await.unwrap().is_none());
        assert!(store.exists("news:live:processed:1").await.unwrap());
        assert_eq!(store.queue_len("news:queues:processed").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_second_run_is_duplicate() {
        let (processor, ingress, store, _) = setup(&[], Arc::new(NoEnrichment));
        ingress.submit_live(SourceKind::News, "1", &news("1", "MSFT")).await.unwrap();
        processor.process_next().await.unwrap();
        ingress.submit_live(SourceKind::News, "1", &news("1", "MSFT")).await.unwrap();

        let outcome = processor.process_next().await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Duplicate);
        assert_eq!(outcome.class(), Some(ErrorClass::Duplicate));
        assert_eq!(store.queue_len("news:queues:processed").await.unwrap(), 1);
        assert!(store.get("news:live:raw:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unmonitored_symbols_are_filtered() {
        let (processor, ingress, store, tracker) = setup(&["AAPL"], Arc::new(NoEnrichment));
        ingress.submit_live(SourceKind::News, "2", &news("2", "TSLA")).await.unwrap();

        assert_eq!(processor.process_next().await.unwrap(), ProcessOutcome::Filtered);
        assert!(store.get("news:live:raw:2").await.unwrap().is_none());
        let record = tracker.record(SourceKind::News, "2").await.unwrap().unwrap();
        assert_eq!(record.filtered_reason.as_deref(), Some(reasons::NO_MATCHING_SYMBOLS));
        assert!(tracker.pending_ids(SourceKind::News).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enrichment_failure_goes_to_failed_lane() {
        let (processor, ingress, store, tracker) = setup(&[], Arc::new(FailingEnrichment));
        ingress.submit_live(SourceKind::News, "3", &news("3", "AAPL")).await.unwrap();

        let outcome = processor.process_next().await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Failed {
                reason: reasons::ENRICHMENT_FAILED.to_string()
            }
        );
        assert_eq!(store.queue_len("news:queues:failed").await.unwrap(), 1);
        assert!(store.exists("news:live:failed:3").await.unwrap());
        assert!(tracker.has_field(SourceKind::News, "3", fields::FAILED_AT).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_payload_fails_validation() {
        let (processor, ingress, _store, tracker) = setup(&[], Arc::new(NoEnrichment));
        ingress.submit_live(SourceKind::News, "4", r#"{"id":"4"}"#).await.unwrap();

        let outcome = processor.process_next().await.unwrap();
        assert_eq!(outcome.class(), Some(ErrorClass::Validation));
        let record = tracker.record(SourceKind::News, "4").await.unwrap().unwrap();
        assert_eq!(record.failed_reason.as_deref(), Some(reasons::VALIDATION_FAILED));
    }

    #[tokio::test]
    async fn test_missing_payload_is_dropped() {
        let (processor, _ingress, store, _) = setup(&[], Arc::new(NoEnrichment));
        let mut batch = StoreBatch::new();
        batch.push_queue("news:queues:raw", "live:gone");
        store.execute(batch).await.unwrap();
        assert_eq!(processor.process_next().await.unwrap(), ProcessOutcome::Dropped);
        assert_eq!(processor.process_next().await.unwrap(), ProcessOutcome::Idle);
    }
}
