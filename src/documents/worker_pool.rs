//! # Document Worker Pool
//!
//! A fixed number of workers consume one tier queue. A counting semaphore shared
//! across pools caps how many jobs are actually PROCESSING, so pool depth can exceed
//! true concurrency. A worker that cannot get a permit after a bounded number of
//! tries demotes its job to PENDING and moves on; reconciliation picks it up later.
//!
//! Per job: acquire permit, claim (QUEUED -> PROCESSING), run the external call under
//! [`RetryPolicy`], then COMPLETED plus cooldown or FAILED with a truncated message.
//! [`DocumentProcessor::cleanup`] runs after every claimed job.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DocumentsConfig;
use crate::error::{truncate_error, ErrorClass, PipelineError, PipelineResult};
use crate::graph::JobStatusStore;
use crate::keys::document_queue_key;
use crate::logging::{log_error, log_job_operation};
use crate::metrics::{document_jobs_total, semaphore_demotions_total};
use crate::models::{DocumentJobPayload, DocumentTier};
use crate::resilience::{ConsecutiveErrorTracker, ErrorAction, RetryPolicy};
use crate::shutdown::ShutdownSignal;
use crate::state_machine::{JobEvent, JobStatus, JobTransition};
use crate::store::KvStore;

/// External heavy per-document operation
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    async fn process(&self, job: &DocumentJobPayload) -> PipelineResult<()>;

    /// Release per-job handles; called once per claimed job whatever the outcome
    async fn cleanup(&self, _job: &DocumentJobPayload) {}
}

/// Result of handling one dequeued payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(String),
    /// No permit available; job returned to PENDING
    Demoted,
    /// Another worker or a terminal status owns the job
    NotClaimed(Option<JobStatus>),
}

impl JobOutcome {
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Completed => None,
            Self::Failed(_) => Some(ErrorClass::DownstreamFailure),
            Self::Demoted => Some(ErrorClass::ResourceExhaustion),
            Self::NotClaimed(_) => Some(ErrorClass::Duplicate),
        }
    }
}

pub struct WorkerPool {
    tier: DocumentTier,
    queue: String,
    store: Arc<dyn KvStore>,
    jobs: Arc<dyn JobStatusStore>,
    processor: Arc<dyn DocumentProcessor>,
    semaphore: Arc<Semaphore>,
    retry: RetryPolicy,
    config: DocumentsConfig,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("tier", &self.tier)
            .field("queue", &self.queue)
            .field("workers", &self.config.worker_threads)
            .field("available_permits", &self.semaphore.available_permits())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(
        tier: DocumentTier,
        store: Arc<dyn KvStore>,
        jobs: Arc<dyn JobStatusStore>,
        processor: Arc<dyn DocumentProcessor>,
        semaphore: Arc<Semaphore>,
        config: &DocumentsConfig,
    ) -> Self {
        Self {
            tier,
            queue: document_queue_key(&config.queue_prefix, tier.as_str()),
            store,
            jobs,
            processor,
            semaphore,
            retry: RetryPolicy::from_config(config),
            config: config.clone(),
        }
    }

    pub fn tier(&self) -> DocumentTier {
        self.tier
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Spawn `worker_threads` workers consuming this pool's queue
    pub fn spawn(self: &Arc<Self>, shutdown: ShutdownSignal) -> Vec<JoinHandle<()>> {
        info!(
            tier = %self.tier,
            workers = self.config.worker_threads,
            "Starting document worker pool"
        );
        (0..self.config.worker_threads)
            .map(|worker| {
                let pool = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_worker(worker, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker: usize, shutdown: ShutdownSignal) {
        let component = format!("documents:{}:{worker}", self.tier);
        let mut errors = ConsecutiveErrorTracker::new(&component, 3, 10);

        while !shutdown.is_triggered() {
            let popped = match self
                .store
                .pop_blocking(&self.queue, self.config.pop_timeout())
                .await
            {
                Ok(popped) => popped,
                Err(e) => {
                    let e = PipelineError::from(e);
                    log_error(&component, "pop", &e.to_string(), Some(&self.queue));
                    if errors.record_failure(&e) == ErrorAction::Reconnect {
                        if let Err(e) = self.store.reconnect().await {
                            warn!(component = %component, error = %e, "Store reconnect failed");
                        }
                    }
                    shutdown.sleep(self.config.semaphore_retry_pause()).await;
                    continue;
                }
            };
            let Some(raw) = popped else { continue };

            let payload: DocumentJobPayload = match serde_json::from_str(&raw) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(component = %component, error = %e, "Discarding malformed job payload");
                    continue;
                }
            };

            match self.handle_job(&payload).await {
                Ok(outcome) => {
                    errors.record_success();
                    debug!(component = %component, job_id = %payload.job_id, outcome = ?outcome, "Job handled");
                }
                Err(e) => {
                    log_error(&component, "handle_job", &e.to_string(), Some(&payload.job_id));
                    errors.record_failure(&e);
                }
            }
        }
        debug!(component = %component, "Worker stopped");
    }

    async fn acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        let attempts = self.config.semaphore_retries.max(1);
        for attempt in 1..=attempts {
            if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
                return Some(permit);
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.semaphore_retry_pause()).await;
            }
        }
        None
    }

    /// Execute one dequeued job end to end
    pub async fn handle_job(&self, payload: &DocumentJobPayload) -> PipelineResult<JobOutcome> {
        let Some(permit) = self.acquire_permit().await else {
            let transition = JobTransition::new(&payload.job_id, JobEvent::Demote);
            let outcome = self.jobs.transition_job(&transition).await?;
            if !outcome.applied {
                return Ok(JobOutcome::NotClaimed(outcome.previous));
            }
            semaphore_demotions_total().add(1, &[KeyValue::new("tier", self.tier.as_str())]);
            log_job_operation(
                "demote",
                &payload.job_id,
                Some(self.tier.as_str()),
                JobStatus::Pending.as_str(),
                Some("no concurrency slot"),
            );
            return Ok(JobOutcome::Demoted);
        };

        let claim = self
            .jobs
            .transition_job(&JobTransition::new(&payload.job_id, JobEvent::Start))
            .await?;
        if !claim.applied {
            debug!(job_id = %payload.job_id, previous = ?claim.previous, "Job not claimable");
            return Ok(JobOutcome::NotClaimed(claim.previous));
        }

        let operation = format!("document:{}", self.tier);
        let result = self
            .retry
            .call(&operation, move |_attempt| self.processor.process(payload))
            .await;
        self.processor.cleanup(payload).await;

        let outcome = match result {
            Ok(()) => {
                self.jobs
                    .transition_job(&JobTransition::new(&payload.job_id, JobEvent::Complete))
                    .await?;
                if !self.config.cooldown().is_zero() {
                    tokio::time::sleep(self.config.cooldown()).await;
                }
                JobOutcome::Completed
            }
            Err(e) => {
                let message = truncate_error(&e.to_string(), self.config.max_error_length);
                error!(job_id = %payload.job_id, tier = %self.tier, error = %message, "Document job failed");
                self.jobs
                    .transition_job(&JobTransition::new(
                        &payload.job_id,
                        JobEvent::Fail(message.clone()),
                    ))
                    .await?;
                JobOutcome::Failed(message)
            }
        };
        drop(permit);

        let status = match outcome {
            JobOutcome::Completed => JobStatus::Completed,
            _ => JobStatus::Failed,
        };
        document_jobs_total().add(
            1,
            &[
                KeyValue::new("status", status.as_str()),
                KeyValue::new("tier", self.tier.as_str()),
            ],
        );
        log_job_operation("execute", &payload.job_id, Some(self.tier.as_str()), status.as_str(), None);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraph;
    use crate::store::InMemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures_left: AtomicU32,
        cleanups: AtomicU32,
    }

    #[async_trait]
    impl DocumentProcessor for Flaky {
        async fn process(&self, _job: &DocumentJobPayload) -> PipelineResult<()> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(PipelineError::Document("x".repeat(50)));
            }
            Ok(())
        }

        async fn cleanup(&self, _job: &DocumentJobPayload) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> DocumentsConfig {
        DocumentsConfig {
            max_attempts: 2,
            retry_backoff_ms: 0,
            cooldown_ms: 0,
            semaphore_retries: 2,
            semaphore_retry_pause_ms: 1,
            max_error_length: 20,
            ..DocumentsConfig::default()
        }
    }

    fn payload(job_id: &str) -> DocumentJobPayload {
        DocumentJobPayload {
            job_id: job_id.into(),
            owner_id: "1".into(),
            routing_key: "doc".into(),
            classification: DocumentTier::Heavy,
        }
    }

    async fn pool(failures: u32, permits: usize) -> (WorkerPool, Arc<InMemoryGraph>, Arc<Flaky>) {
        let graph = Arc::new(InMemoryGraph::new());
        let processor = Arc::new(Flaky {
            failures_left: AtomicU32::new(failures),
            cleanups: AtomicU32::new(0),
        });
        graph
            .transition_job(&JobTransition::new("j", JobEvent::Enqueue))
            .await
            .unwrap();
        let pool = WorkerPool::new(
            DocumentTier::Heavy,
            Arc::new(InMemoryStore::new()),
            graph.clone(),
            processor.clone(),
            Arc::new(Semaphore::new(permits)),
            &config(),
        );
        (pool, graph, processor)
    }

    #[tokio::test]
    async fn test_retry_then_complete() {
        let (pool, graph, processor) = pool(1, 1).await;
        let outcome = pool.handle_job(&payload("j")).await.unwrap();
        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(
            graph.job_history("j"),
            vec![JobStatus::Queued, JobStatus::Processing, JobStatus::Completed]
        );
        assert_eq!(processor.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_with_bounded_message() {
        let (pool, graph, processor) = pool(5, 1).await;
        let outcome = pool.handle_job(&payload("j")).await.unwrap();
        let JobOutcome::Failed(message) = outcome else {
            panic!("expected failure");
        };
        assert!(message.len() <= 20);
        let job = graph.job("j").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(message.as_str()));
        assert_eq!(processor.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_permit_demotes_to_pending() {
        let (pool, graph, processor) = pool(0, 0).await;
        let outcome = pool.handle_job(&payload("j")).await.unwrap();
        assert_eq!(outcome, JobOutcome::Demoted);
        assert_eq!(outcome.class(), Some(ErrorClass::ResourceExhaustion));
        assert_eq!(graph.job("j").await.unwrap().unwrap().status, JobStatus::Pending);
        assert_eq!(processor.cleanups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_not_claimed() {
        let (pool, _graph, _processor) = pool(0, 1).await;
        assert_eq!(pool.handle_job(&payload("j")).await.unwrap(), JobOutcome::Completed);
        assert_eq!(
            pool.handle_job(&payload("j")).await.unwrap(),
            JobOutcome::NotClaimed(Some(JobStatus::Completed))
        );
    }
}
