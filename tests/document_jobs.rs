mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use eventgraph_core::documents::{DocumentProcessor, RouteOutcome, WorkerPool};
use eventgraph_core::error::PipelineResult;
use eventgraph_core::graph::{InMemoryGraph, JobStatusStore};
use eventgraph_core::models::{DocumentJobPayload, DocumentJobRequest, DocumentTier};
use eventgraph_core::processor::ProcessOutcome;
use eventgraph_core::state_machine::{allowed_edges, JobStatus, JobTransition};
use eventgraph_core::store::KvStore;
use eventgraph_core::{ShutdownSignal, SourceKind};
use proptest::prelude::*;
use tokio::sync::Semaphore;

struct SlowExtractor {
    delay: Duration,
}

#[async_trait]
impl DocumentProcessor for SlowExtractor {
    async fn process(&self, _job: &DocumentJobPayload) -> PipelineResult<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

fn request(job_id: &str, owner: Option<&str>, form: &str) -> DocumentJobRequest {
    DocumentJobRequest {
        job_id: job_id.to_string(),
        owner_id: owner.map(str::to_string),
        routing_key: format!("https://www.sec.gov/Archives/{job_id}.htm"),
        document_type: Some(form.to_string()),
    }
}

#[tokio::test]
async fn test_scenario_b_job_without_owner_is_reference_only() {
    let h = Harness::new();
    let outcome = h.router.submit(request("filing:0001", None, "10-K")).await.unwrap();
    assert_eq!(outcome, RouteOutcome::ReferenceOnly);
    assert_eq!(h.graph.job_history("filing:0001"), vec![JobStatus::ReferenceOnly]);
    for tier in DocumentTier::ALL {
        assert_eq!(h.store.queue_len(&h.router.queue_for(tier)).await.unwrap(), 0);
    }
}

#[tokio::test]
async fn test_filing_without_filer_becomes_reference_only_job() {
    let h = Harness::new();
    let processor = h.processor(SourceKind::Filing);
    h.ingress
        .submit_live(SourceKind::Filing, "acc-1", &filing_payload("acc-1", None, "10-K"))
        .await
        .unwrap();
    assert_eq!(processor.process_next().await.unwrap(), ProcessOutcome::Processed);

    let job = h.graph.job("filing:acc-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::ReferenceOnly);
}

#[tokio::test]
async fn test_out_of_scope_form_is_skipped() {
    let h = Harness::new();
    let outcome = h.router.submit(request("filing:0002", Some("320193"), "4")).await.unwrap();
    assert_eq!(outcome, RouteOutcome::Skipped);
    assert_eq!(h.graph.job_history("filing:0002"), vec![JobStatus::Skipped]);
}

#[tokio::test]
async fn test_resubmitting_a_tracked_job_is_a_duplicate() {
    let h = Harness::new();
    h.router.submit(request("filing:0003", Some("320193"), "10-Q")).await.unwrap();
    let again = h.router.submit(request("filing:0003", Some("320193"), "10-Q")).await.unwrap();
    assert_eq!(again, RouteOutcome::AlreadyTracked(Some(JobStatus::Queued)));
    assert_eq!(h.store.queue_len(&h.router.queue_for(DocumentTier::Medium)).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_processing_never_exceeds_semaphore_size() {
    let mut config = test_config();
    config.documents.worker_threads = 5;
    config.documents.concurrency_limit = 2;
    config.documents.semaphore_retries = 200;
    config.documents.semaphore_retry_pause_ms = 5;
    let h = Harness::with_config(config);

    let pool = Arc::new(WorkerPool::new(
        DocumentTier::Heavy,
        h.store.clone(),
        h.graph.clone(),
        Arc::new(SlowExtractor {
            delay: Duration::from_millis(20),
        }),
        Arc::new(Semaphore::new(h.config.documents.concurrency_limit)),
        &h.config.documents,
    ));
    for i in 0..20 {
        h.router
            .submit(request(&format!("filing:{i:04}"), Some("320193"), "10-K"))
            .await
            .unwrap();
    }

    let shutdown = ShutdownSignal::new();
    let workers = pool.spawn(shutdown.clone());
    let graph = h.graph.clone();
    let settled = wait_until(Duration::from_secs(10), || {
        graph
            .jobs()
            .iter()
            .all(|j| matches!(j.status, JobStatus::Completed | JobStatus::Pending))
    })
    .await;
    shutdown.trigger();
    for worker in workers {
        worker.await.unwrap();
    }

    assert!(settled);
    assert!(h.graph.peak_processing() <= 2);
    assert!(h.graph.peak_processing() >= 1);
    let completed = h
        .graph
        .jobs()
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .count();
    assert!(completed >= 2);
}

fn history_is_monotone(history: &[JobStatus]) -> bool {
    let edges = allowed_edges();
    let mut previous = None;
    for status in history {
        if !edges.contains(&(previous, *status)) {
            return false;
        }
        previous = Some(*status);
    }
    true
}

proptest! {
    /// Property: whatever order events arrive in, the recorded status sequence only
    /// follows allowed edges and nothing leaves an absorbing status
    #[test]
    fn job_status_sequence_is_monotone(events in prop::collection::vec(job_event_strategy(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let graph = InMemoryGraph::new();
        let mut applied = Vec::new();
        runtime.block_on(async {
            for event in events {
                let outcome = graph
                    .transition_job(&JobTransition::new("job-1", event))
                    .await
                    .unwrap();
                applied.push(outcome.applied);
            }
        });

        let history = graph.job_history("job-1");
        prop_assert_eq!(history.len(), applied.iter().filter(|a| **a).count());
        prop_assert!(history_is_monotone(&history), "history regressed: {:?}", history);
        if let Some(position) = history.iter().position(|s| s.is_terminal()) {
            prop_assert_eq!(position, history.len() - 1);
        }
    }
}
