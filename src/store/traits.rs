use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use super::batch::{OpReply, StoreBatch};
use super::errors::StoreResult;

/// Message received on a subscribed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// Live subscription to one or more channels
#[async_trait]
pub trait Subscription: Send {
    /// Wait up to `timeout` for the next message; `Ok(None)` on timeout
    async fn next_notification(&mut self, timeout: Duration) -> StoreResult<Option<Notification>>;
}

/// Shared queue and lifecycle store.
///
/// Every mutation goes through [`KvStore::execute`], which applies a batch
/// atomically. Implementations must never emulate a conditional write with a
/// read followed by a write from the caller's side.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn execute(&self, batch: StoreBatch) -> StoreResult<Vec<OpReply>>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    async fn hash_exists(&self, key: &str, field: &str) -> StoreResult<bool>;

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Pop the oldest queue entry, waiting up to `timeout`
    async fn pop_blocking(&self, queue: &str, timeout: Duration) -> StoreResult<Option<String>>;

    /// Pop up to `max` of the oldest entries without waiting
    async fn pop_batch(&self, queue: &str, max: usize) -> StoreResult<Vec<String>>;

    async fn queue_len(&self, queue: &str) -> StoreResult<usize>;

    /// Keys matching a glob pattern (`*` and `?` wildcards)
    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    async fn subscribe(&self, channels: &[String]) -> StoreResult<Box<dyn Subscription>>;

    /// Rebuild the underlying connections
    async fn reconnect(&self) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}
