//! Test fixtures wiring in-memory backends into the real services.

use std::sync::Arc;
use std::time::Duration;

use eventgraph_core::config::{LifecycleConfig, PipelineConfig, SourceConfig};
use eventgraph_core::dispatch::{Dispatcher, Reconciler, TransientPublisher};
use eventgraph_core::documents::DocumentRouter;
use eventgraph_core::edges::EdgeQueue;
use eventgraph_core::graph::InMemoryGraph;
use eventgraph_core::lifecycle::LifecycleTracker;
use eventgraph_core::processor::{ItemProcessor, JsonSourcePlugin, NoEnrichment, RawIngress};
use eventgraph_core::store::InMemoryStore;
use eventgraph_core::SourceKind;

pub struct Harness {
    pub config: Arc<PipelineConfig>,
    pub store: Arc<InMemoryStore>,
    pub graph: Arc<InMemoryGraph>,
    pub tracker: LifecycleTracker,
    pub ingress: RawIngress,
    pub publisher: TransientPublisher,
    pub router: Arc<DocumentRouter>,
    pub dispatcher: Arc<Dispatcher>,
    pub reconciler: Arc<Reconciler>,
}

pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::with_all_sources();
    config.sources = vec![
        SourceConfig::new(SourceKind::News),
        SourceConfig {
            documents: true,
            ..SourceConfig::new(SourceKind::Filing)
        },
        SourceConfig {
            mutable: true,
            ..SourceConfig::new(SourceKind::Transcript)
        },
    ];
    config.processor.pop_timeout_ms = 10;
    config.processor.symbols = vec!["AAPL".into(), "MSFT".into()];
    config.dispatch.poll_timeout_ms = 10;
    config.dispatch.reconcile_on_startup = false;
    config.documents.pop_timeout_ms = 10;
    config.documents.cooldown_ms = 0;
    config.documents.retry_backoff_ms = 5;
    config.edges.idle_pause_ms = 10;
    config
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(InMemoryStore::new());
        let graph = Arc::new(InMemoryGraph::new());
        let tracker = LifecycleTracker::new(store.clone(), LifecycleConfig::default());
        let router = Arc::new(DocumentRouter::new(store.clone(), graph.clone(), &config.documents));
        let dispatcher = Arc::new(Dispatcher::new(
            tracker.clone(),
            graph.clone(),
            EdgeQueue::new(store.clone(), config.edges.queue.clone()),
            Arc::clone(&config),
        ));
        let reconciler = Arc::new(
            Reconciler::new(store.clone(), Arc::clone(&dispatcher), Arc::clone(&config))
                .with_jobs(graph.clone(), Arc::clone(&router)),
        );
        Self {
            ingress: RawIngress::new(tracker.clone()),
            publisher: TransientPublisher::new(store.clone()),
            config,
            store,
            graph,
            tracker,
            router,
            dispatcher,
            reconciler,
        }
    }

    pub fn processor(&self, source: SourceKind) -> ItemProcessor {
        let source_config = self
            .config
            .source(source)
            .cloned()
            .unwrap_or_else(|| SourceConfig::new(source));
        ItemProcessor::new(
            source_config,
            self.tracker.clone(),
            Arc::new(JsonSourcePlugin::new(source)),
            Arc::new(NoEnrichment),
            &self.config.processor,
        )
        .with_router(Arc::clone(&self.router))
    }
}

pub fn news_payload(id: &str, symbols: &[&str]) -> String {
    serde_json::json!({
        "id": id,
        "created": "2024-03-01T09:30:00Z",
        "updated": "2024-03-01T09:35:00Z",
        "title": "  Quarterly   results beat estimates ",
        "body": "Revenue   rose 12%.",
        "symbols": symbols,
    })
    .to_string()
}

pub fn filing_payload(accession_no: &str, cik: Option<&str>, form_type: &str) -> String {
    serde_json::json!({
        "accession_no": accession_no,
        "filed_at": "2024-02-02T21:05:00Z",
        "form_type": form_type,
        "cik": cik,
        "tickers": ["AAPL"],
        "primary_document_url": format!("https://www.sec.gov/Archives/{accession_no}.htm"),
    })
    .to_string()
}

/// Poll `check` until it returns true or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
