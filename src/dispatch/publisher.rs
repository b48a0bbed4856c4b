//! Producer side of the complete/incomplete contract.
//!
//! The external enrichment stage decides when an item's tracked entities are fully
//! enriched. This helper performs its store writes: place the transient entry and
//! announce the id on the matching channel, atomically.

use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};
use crate::keys::{channel, item_key};
use crate::models::{ItemState, Namespace, SourceKind};
use crate::store::{KvStore, StoreBatch};

#[derive(Clone)]
pub struct TransientPublisher {
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for TransientPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientPublisher")
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

fn check_state(state: ItemState) -> PipelineResult<()> {
    if state.is_transient_outcome() {
        Ok(())
    } else {
        Err(PipelineError::validation(format!(
            "'{state}' is not a transient outcome state"
        )))
    }
}

impl TransientPublisher {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Write `payload` under the transient key and publish the id
    pub async fn publish(
        &self,
        source: SourceKind,
        namespace: Namespace,
        state: ItemState,
        id: &str,
        payload: &str,
    ) -> PipelineResult<()> {
        check_state(state)?;
        let mut batch = StoreBatch::new();
        batch.set(item_key(source, namespace, state, id), payload, None);
        batch.publish(channel(source, state), id);
        self.store.execute(batch).await?;
        Ok(())
    }

    /// Move a processed entry into a transient state; returns false when there is
    /// no processed entry for the id
    pub async fn promote_processed(
        &self,
        source: SourceKind,
        namespace: Namespace,
        state: ItemState,
        id: &str,
    ) -> PipelineResult<bool> {
        check_state(state)?;
        let processed_key = item_key(source, namespace, ItemState::Processed, id);
        let Some(payload) = self.store.get(&processed_key).await? else {
            return Ok(false);
        };
        let mut batch = StoreBatch::new();
        batch.set(item_key(source, namespace, state, id), payload, None);
        batch.delete(processed_key);
        batch.publish(channel(source, state), id);
        self.store.execute(batch).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, Subscription};
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_announces_id() {
        let store = Arc::new(InMemoryStore::new());
        let publisher = TransientPublisher::new(store.clone());
        let mut subscription = store
            .subscribe(&["news:live:complete".to_string()])
            .await
            .unwrap();

        publisher
            .publish(SourceKind::News, Namespace::Live, ItemState::Complete, "7", "{}")
            .await
            .unwrap();
        let notification = subscription
            .next_notification(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.payload, "7");
        assert!(store.exists("news:live:complete:7").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_non_transient_state() {
        let publisher = TransientPublisher::new(Arc::new(InMemoryStore::new()));
        assert!(publisher
            .publish(SourceKind::News, Namespace::Live, ItemState::Raw, "7", "{}")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_promote_processed_moves_entry() {
        let store = Arc::new(InMemoryStore::new());
        let publisher = TransientPublisher::new(store.clone());
        let mut batch = StoreBatch::new();
        batch.set("filing:hist:processed:9", "{\"x\":1}", None);
        store.execute(batch).await.unwrap();

        assert!(publisher
            .promote_processed(SourceKind::Filing, Namespace::Historical, ItemState::Incomplete, "9")
            .await
            .unwrap());
        assert!(!store.exists("filing:hist:processed:9").await.unwrap());
        assert_eq!(
            store.get("filing:hist:incomplete:9").await.unwrap().as_deref(),
            Some("{\"x\":1}")
        );
        assert!(!publisher
            .promote_processed(SourceKind::Filing, Namespace::Historical, ItemState::Complete, "9")
            .await
            .unwrap());
    }
}
