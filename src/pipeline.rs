//! # Pipeline Bootstrap
//!
//! Wires every stage from one [`PipelineConfig`]: the shared store and destination
//! backend, one item processor per configured source, the dispatch service (notification
//! listener plus reconciliation), one worker pool per document tier behind a single
//! shared concurrency semaphore, and the single-writer edge batcher.
//!
//! [`EventPipeline::start`] spawns each long-running loop as its own task and returns a
//! [`PipelineHandle`]; [`PipelineHandle::shutdown`] raises the shared shutdown signal and
//! waits for the loops to drain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ConfigManager, PipelineConfig};
use crate::dispatch::{DispatchService, Dispatcher, Reconciler, TransientPublisher};
use crate::documents::{DocumentProcessor, DocumentRouter, WorkerPool};
use crate::edges::{EdgeBatcher, EdgeQueue};
use crate::error::{PipelineError, PipelineResult};
use crate::graph::{connect_graph, GraphHandles};
use crate::lifecycle::LifecycleTracker;
use crate::models::{DocumentTier, SourceKind};
use crate::processor::{EnrichmentService, ItemProcessor, JsonSourcePlugin, NoEnrichment, RawIngress, SourcePlugin};
use crate::shutdown::ShutdownSignal;
use crate::store::{connect_store, KvStore};

/// Collects the pluggable pieces before connecting backends
pub struct PipelineBuilder {
    config: Arc<PipelineConfig>,
    store: Option<Arc<dyn KvStore>>,
    graph: Option<GraphHandles>,
    plugins: HashMap<SourceKind, Arc<dyn SourcePlugin>>,
    enrichment: Arc<dyn EnrichmentService>,
    document_processor: Option<Arc<dyn DocumentProcessor>>,
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("sources", &self.config.sources.len())
            .field("plugins", &self.plugins.len())
            .field("documents", &self.document_processor.is_some())
            .finish()
    }
}

impl PipelineBuilder {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self {
            config,
            store: None,
            graph: None,
            plugins: HashMap::new(),
            enrichment: Arc::new(NoEnrichment),
            document_processor: None,
        }
    }

    /// Use an existing store instead of connecting the configured one
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use an existing destination backend instead of connecting the configured one
    pub fn with_graph(mut self, graph: GraphHandles) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn SourcePlugin>) -> Self {
        self.plugins.insert(plugin.source(), plugin);
        self
    }

    pub fn with_enrichment(mut self, enrichment: Arc<dyn EnrichmentService>) -> Self {
        self.enrichment = enrichment;
        self
    }

    /// Enable the document worker pools
    pub fn with_document_processor(mut self, processor: Arc<dyn DocumentProcessor>) -> Self {
        self.document_processor = Some(processor);
        self
    }

    pub async fn build(self) -> PipelineResult<EventPipeline> {
        self.config.validate()?;
        let config = self.config;

        let store = match self.store {
            Some(store) => store,
            None => connect_store(&config.store).await?,
        };
        let graph = match self.graph {
            Some(graph) => graph,
            None => connect_graph(&config.graph).await?,
        };
        info!(
            store = store.backend_name(),
            graph = graph.graph.backend_name(),
            "Pipeline backends ready"
        );

        let tracker = LifecycleTracker::new(Arc::clone(&store), config.lifecycle.clone());
        let router = Arc::new(DocumentRouter::new(
            Arc::clone(&store),
            Arc::clone(&graph.jobs),
            &config.documents,
        ));

        let processors = config
            .sources
            .iter()
            .map(|source| {
                let plugin = self
                    .plugins
                    .get(&source.kind)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(JsonSourcePlugin::new(source.kind)));
                let processor = ItemProcessor::new(
                    source.clone(),
                    tracker.clone(),
                    plugin,
                    Arc::clone(&self.enrichment),
                    &config.processor,
                );
                let processor = if source.documents {
                    processor.with_router(Arc::clone(&router))
                } else {
                    processor
                };
                Arc::new(processor)
            })
            .collect();

        let dispatcher = Arc::new(Dispatcher::new(
            tracker.clone(),
            Arc::clone(&graph.graph),
            EdgeQueue::new(Arc::clone(&store), config.edges.queue.clone()),
            Arc::clone(&config),
        ));
        let reconciler = Arc::new(
            Reconciler::new(Arc::clone(&store), Arc::clone(&dispatcher), Arc::clone(&config))
                .with_jobs(Arc::clone(&graph.jobs), Arc::clone(&router)),
        );
        let dispatch = Arc::new(DispatchService::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            reconciler,
            Arc::clone(&config),
        ));

        let worker_pools = match self.document_processor {
            Some(processor) => {
                let semaphore = Arc::new(Semaphore::new(config.documents.concurrency_limit));
                DocumentTier::ALL
                    .iter()
                    .map(|tier| {
                        Arc::new(WorkerPool::new(
                            *tier,
                            Arc::clone(&store),
                            Arc::clone(&graph.jobs),
                            Arc::clone(&processor),
                            Arc::clone(&semaphore),
                            &config.documents,
                        ))
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        let edge_batcher = Arc::new(EdgeBatcher::new(
            Arc::clone(&store),
            Arc::clone(&graph.graph),
            &config.edges,
        ));

        Ok(EventPipeline {
            ingress: RawIngress::new(tracker.clone()),
            publisher: TransientPublisher::new(Arc::clone(&store)),
            config,
            store,
            graph,
            tracker,
            router,
            processors,
            dispatcher,
            dispatch,
            worker_pools,
            edge_batcher,
        })
    }
}

/// Fully wired pipeline; cheap handles onto every stage
pub struct EventPipeline {
    config: Arc<PipelineConfig>,
    store: Arc<dyn KvStore>,
    graph: GraphHandles,
    tracker: LifecycleTracker,
    ingress: RawIngress,
    publisher: TransientPublisher,
    router: Arc<DocumentRouter>,
    processors: Vec<Arc<ItemProcessor>>,
    dispatcher: Arc<Dispatcher>,
    dispatch: Arc<DispatchService>,
    worker_pools: Vec<Arc<WorkerPool>>,
    edge_batcher: Arc<EdgeBatcher>,
}

impl std::fmt::Debug for EventPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPipeline")
            .field("store", &self.store.backend_name())
            .field("graph", &self.graph)
            .field("processors", &self.processors.len())
            .field("worker_pools", &self.worker_pools.len())
            .finish()
    }
}

impl EventPipeline {
    pub fn builder(config: Arc<PipelineConfig>) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Build from a loaded configuration manager with default plugins
    pub async fn from_config_manager(manager: &ConfigManager) -> PipelineResult<Self> {
        PipelineBuilder::new(manager.config_arc()).build().await
    }

    pub fn config(&self) -> &Arc<PipelineConfig> {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn graph(&self) -> &GraphHandles {
        &self.graph
    }

    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }

    pub fn ingress(&self) -> &RawIngress {
        &self.ingress
    }

    pub fn publisher(&self) -> &TransientPublisher {
        &self.publisher
    }

    pub fn router(&self) -> &Arc<DocumentRouter> {
        &self.router
    }

    pub fn processor(&self, source: SourceKind) -> Option<&Arc<ItemProcessor>> {
        self.processors.iter().find(|p| p.source() == source)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn dispatch_service(&self) -> &Arc<DispatchService> {
        &self.dispatch
    }

    pub fn worker_pools(&self) -> &[Arc<WorkerPool>] {
        &self.worker_pools
    }

    pub fn edge_batcher(&self) -> &Arc<EdgeBatcher> {
        &self.edge_batcher
    }

    /// Spawn every long-running loop
    pub fn start(&self) -> PipelineHandle {
        let shutdown = ShutdownSignal::new();
        let mut tasks = Vec::new();

        for processor in &self.processors {
            let processor = Arc::clone(processor);
            let signal = shutdown.clone();
            tasks.push(tokio::spawn(async move { processor.run(signal).await }));
        }

        let dispatch = Arc::clone(&self.dispatch);
        let signal = shutdown.clone();
        tasks.push(tokio::spawn(async move { dispatch.run(signal).await }));

        for pool in &self.worker_pools {
            tasks.extend(pool.spawn(shutdown.clone()));
        }

        let batcher = Arc::clone(&self.edge_batcher);
        let signal = shutdown.clone();
        tasks.push(tokio::spawn(async move { batcher.run(signal).await }));

        info!(
            processors = self.processors.len(),
            worker_pools = self.worker_pools.len(),
            tasks = tasks.len(),
            "Event pipeline started"
        );
        PipelineHandle { shutdown, tasks }
    }
}

/// Running pipeline tasks plus their shared shutdown signal
#[derive(Debug)]
pub struct PipelineHandle {
    shutdown: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every loop and wait up to `timeout` for them to finish; stragglers are aborted
    pub async fn shutdown(self, timeout: Duration) -> PipelineResult<()> {
        info!("Event pipeline shutdown requested");
        self.shutdown.trigger();

        let mut tasks = self.tasks;
        let joined = tokio::time::timeout(timeout, futures::future::join_all(tasks.iter_mut())).await;
        match joined {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "Pipeline task ended abnormally");
                    }
                }
                info!("Event pipeline stopped");
                Ok(())
            }
            Err(_) => {
                for task in &tasks {
                    task.abort();
                }
                Err(PipelineError::Timeout(format!(
                    "pipeline tasks did not stop within {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphBackend, StoreBackend};

    fn memory_config() -> PipelineConfig {
        let mut config = PipelineConfig::with_all_sources();
        config.store.backend = StoreBackend::Memory;
        config.graph.backend = GraphBackend::Memory;
        config.processor.pop_timeout_ms = 10;
        config.dispatch.poll_timeout_ms = 10;
        config.dispatch.reconcile_on_startup = false;
        config.documents.pop_timeout_ms = 10;
        config.edges.idle_pause_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_build_wires_one_processor_per_source() {
        let pipeline = EventPipeline::builder(Arc::new(memory_config())).build().await.unwrap();
        assert!(pipeline.processor(SourceKind::News).is_some());
        assert!(pipeline.processor(SourceKind::Transcript).is_some());
        assert!(pipeline.worker_pools().is_empty());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let pipeline = EventPipeline::builder(Arc::new(memory_config())).build().await.unwrap();
        let handle = pipeline.start();
        // processors + dispatcher + edge batcher
        assert_eq!(handle.task_count(), 5);
        handle.shutdown(Duration::from_secs(5)).await.unwrap();
    }
}
