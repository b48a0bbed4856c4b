#![allow(clippy::doc_markdown)] // Allow technical terms like Neo4j, Redis in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # EventGraph Core
//!
//! Lifecycle pipeline for financial event streams (news, regulatory filings and
//! earnings-call transcripts) moving from upstream sources into a graph store.
//!
//! ## Overview
//!
//! Items travel through a shared key-value store partitioned by source, namespace
//! (`live`/`hist`) and state. Each stage consumes one partition and produces the next:
//!
//! 1. **Ingress** writes `raw` payloads and queues a reference
//! 2. **Item processors** (one per source) filter against the symbol universe, clean,
//!    enrich and promote into `processed` or move to `failed`
//! 3. An external stage decides when entities are fully enriched and publishes the item
//!    as `complete` or `incomplete`
//! 4. The **dispatcher** writes each published item to the destination store exactly
//!    once, guarded by the lifecycle record, and queues its symbol relationships
//! 5. **Reconciliation** periodically sweeps the transient partitions and re-drives
//!    stale document jobs
//! 6. **Document worker pools** handle heavy per-document work under a shared
//!    concurrency limit
//! 7. The **edge batcher** is the single writer of relationships, committing grouped
//!    batches in one transaction
//!
//! Every item carries a lifecycle record whose timestamps are written at most once and
//! whose terminal outcome (`filtered`, `failed`, `inserted`) is unique.
//!
//! ## Module Organization
//!
//! - [`config`] - Layered TOML configuration with environment overrides
//! - [`store`] - Shared store contract with Redis and in-memory backends
//! - [`graph`] - Destination store contract with Neo4j and in-memory backends
//! - [`lifecycle`] - Write-once lifecycle tracking
//! - [`processor`] - Ingress and per-source item processing
//! - [`dispatch`] - Guarded destination writes, notifications and reconciliation
//! - [`documents`] - Document classification, routing and tiered worker pools
//! - [`edges`] - Relationship queue and single-writer batcher
//! - [`state_machine`] - Document job status transitions
//! - [`pipeline`] - Bootstrap and lifecycle of all long-running loops
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eventgraph_core::config::ConfigManager;
//! use eventgraph_core::pipeline::EventPipeline;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let pipeline = EventPipeline::from_config_manager(&manager).await?;
//! let handle = pipeline.start();
//!
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown(Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod dispatch;
pub mod documents;
pub mod edges;
pub mod error;
pub mod graph;
pub mod keys;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod processor;
pub mod resilience;
pub mod shutdown;
pub mod state_machine;
pub mod store;

pub use config::{ConfigManager, PipelineConfig};
pub use error::{ErrorClass, PipelineError, PipelineResult};
pub use models::{ItemState, Namespace, SourceKind};
pub use pipeline::{EventPipeline, PipelineBuilder, PipelineHandle};
pub use shutdown::ShutdownSignal;
