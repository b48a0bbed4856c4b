//! Producer side of the shared relationship-write queue.

use std::sync::Arc;

use crate::error::PipelineResult;
use crate::models::EdgeWriteRequest;
use crate::store::{KvStore, StoreBatch};

#[derive(Clone)]
pub struct EdgeQueue {
    store: Arc<dyn KvStore>,
    queue: String,
}

impl std::fmt::Debug for EdgeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeQueue").field("queue", &self.queue).finish()
    }
}

impl EdgeQueue {
    pub fn new(store: Arc<dyn KvStore>, queue: impl Into<String>) -> Self {
        Self {
            store,
            queue: queue.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.queue
    }

    /// Append a request to a caller batch so it commits with the caller's other writes
    pub fn push_into(&self, batch: &mut StoreBatch, request: &EdgeWriteRequest) -> PipelineResult<()> {
        batch.push_queue(&self.queue, serde_json::to_string(request)?);
        Ok(())
    }

    pub async fn enqueue(&self, request: &EdgeWriteRequest) -> PipelineResult<()> {
        self.enqueue_many(std::slice::from_ref(request)).await
    }

    /// Enqueue every request in one round trip
    pub async fn enqueue_many(&self, requests: &[EdgeWriteRequest]) -> PipelineResult<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let mut batch = StoreBatch::new();
        for request in requests {
            self.push_into(&mut batch, request)?;
        }
        self.store.execute(batch).await?;
        Ok(())
    }

    /// Push raw serialized requests back, e.g. after a failed commit
    pub async fn requeue_raw(&self, raw: &[String]) -> PipelineResult<()> {
        if raw.is_empty() {
            return Ok(());
        }
        let mut batch = StoreBatch::new();
        for entry in raw {
            batch.push_queue(&self.queue, entry.as_str());
        }
        self.store.execute(batch).await?;
        Ok(())
    }

    pub async fn len(&self) -> PipelineResult<usize> {
        Ok(self.store.queue_len(&self.queue).await?)
    }

    pub async fn is_empty(&self) -> PipelineResult<bool> {
        Ok(self.len().await? == 0)
    }
}
