//! # Shared Queue and Lifecycle Store
//!
//! The store every component communicates through. All mutation is expressed as
//! atomic [`StoreBatch`]es of typed operations; no component takes external locks.
//!
//! Backends:
//! - [`InMemoryStore`]: tests and embedded single-process runs
//! - `RedisStore` (feature `redis-store`): production backend

pub mod batch;
pub mod errors;
pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis;
pub mod traits;

use std::sync::Arc;

pub use batch::{OpReply, PendingSetUpdate, StoreBatch, StoreOp};
pub use errors::{StoreError, StoreResult};
pub use memory::InMemoryStore;
#[cfg(feature = "redis-store")]
pub use self::redis::RedisStore;
pub use traits::{KvStore, Notification, Subscription};

use crate::config::{StoreBackend, StoreConfig};

/// Build the configured store backend
pub async fn connect_store(config: &StoreConfig) -> StoreResult<Arc<dyn KvStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        #[cfg(feature = "redis-store")]
        StoreBackend::Redis => Ok(Arc::new(RedisStore::from_config(config).await?)),
        #[cfg(not(feature = "redis-store"))]
        StoreBackend::Redis => Err(StoreError::ConnectionError(
            "redis backend requires the `redis-store` feature".to_string(),
        )),
    }
}
