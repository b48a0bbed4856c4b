//! Adapter-side entry point: write a raw item and start its lifecycle.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::constants::lifecycle_fields as fields;
use crate::error::{PipelineError, PipelineResult};
use crate::keys::{item_key, queue_key, ItemRef, QueueLane};
use crate::lifecycle::{LifecycleTracker, Mark};
use crate::models::{ItemState, Namespace, SourceKind};
use crate::store::StoreBatch;

/// Writes raw payloads, queues their references and marks `ingested_at` in one batch
#[derive(Debug, Clone)]
pub struct RawIngress {
    tracker: LifecycleTracker,
}

impl RawIngress {
    pub fn new(tracker: LifecycleTracker) -> Self {
        Self { tracker }
    }

    /// Submit one raw item; `source_api_timestamp` is the adapter-reported publish time
    pub async fn submit(
        &self,
        source: SourceKind,
        namespace: Namespace,
        id: &str,
        payload: &str,
        source_api_timestamp: Option<DateTime<Utc>>,
    ) -> PipelineResult<ItemRef> {
        let id = id.trim();
        if id.is_empty() || id.contains(':') {
            return Err(PipelineError::validation(format!(
                "{source} raw item id '{id}' is empty or contains ':'"
            )));
        }

        let reference = ItemRef::new(namespace, id);
        let mut batch = StoreBatch::new();
        batch.set(item_key(source, namespace, ItemState::Raw, id), payload, None);
        batch.push_queue(queue_key(source, QueueLane::Raw), reference.to_string());
        self.tracker
            .mark_timestamp(source, id, Mark::now(fields::INGESTED_AT), Some(&mut batch))
            .await?;
        if let Some(at) = source_api_timestamp {
            self.tracker
                .mark_timestamp(
                    source,
                    id,
                    Mark::at(fields::SOURCE_API_TIMESTAMP, at),
                    Some(&mut batch),
                )
                .await?;
        }
        self.tracker.store().execute(batch).await?;

        debug!(source = %source, item_id = id, namespace = %namespace, "Raw item ingested");
        Ok(reference)
    }

    pub async fn submit_live(&self, source: SourceKind, id: &str, payload: &str) -> PipelineResult<ItemRef> {
        self.submit(source, Namespace::Live, id, payload, None).await
    }
}
