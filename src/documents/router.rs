//! Routes document job requests into the cost-tiered queues.
//!
//! Every status change is one conditional transition on the job store; the queue push
//! only happens after the transition applied, so the primary path and reconciliation
//! can both call in without double-enqueueing.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{debug, warn};

use super::classifier::{Classification, DocumentClassifier};
use crate::config::DocumentsConfig;
use crate::error::{ErrorClass, PipelineResult};
use crate::graph::JobStatusStore;
use crate::keys::document_queue_key;
use crate::logging::log_job_operation;
use crate::metrics::document_jobs_total;
use crate::models::{DocumentJob, DocumentJobPayload, DocumentJobRequest, DocumentTier};
use crate::state_machine::{JobEvent, JobStatus, JobTransition};
use crate::store::{KvStore, StoreBatch};

/// What happened to a submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Queued(DocumentTier),
    ReferenceOnly,
    Skipped,
    /// The job already existed past PENDING; nothing was written
    AlreadyTracked(Option<JobStatus>),
}

impl RouteOutcome {
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::AlreadyTracked(_) => Some(ErrorClass::Duplicate),
            _ => None,
        }
    }
}

pub struct DocumentRouter {
    store: Arc<dyn KvStore>,
    jobs: Arc<dyn JobStatusStore>,
    classifier: DocumentClassifier,
    queue_prefix: String,
}

impl std::fmt::Debug for DocumentRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRouter")
            .field("queue_prefix", &self.queue_prefix)
            .finish()
    }
}

impl DocumentRouter {
    pub fn new(store: Arc<dyn KvStore>, jobs: Arc<dyn JobStatusStore>, config: &DocumentsConfig) -> Self {
        Self {
            store,
            jobs,
            classifier: DocumentClassifier::from_config(&config.classification),
            queue_prefix: config.queue_prefix.clone(),
        }
    }

    pub fn queue_for(&self, tier: DocumentTier) -> String {
        document_queue_key(&self.queue_prefix, tier.as_str())
    }

    pub fn classifier(&self) -> &DocumentClassifier {
        &self.classifier
    }

    async fn push_payload(&self, payload: &DocumentJobPayload) -> PipelineResult<()> {
        let mut batch = StoreBatch::new();
        batch.push_queue(self.queue_for(payload.classification), serde_json::to_string(payload)?);
        self.store.execute(batch).await?;
        Ok(())
    }

    /// Route one request: REFERENCE_ONLY without an owner, SKIPPED when out of scope,
    /// otherwise QUEUED on its tier
    pub async fn submit(&self, request: DocumentJobRequest) -> PipelineResult<RouteOutcome> {
        let owner = request
            .owner_id
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string);

        let Some(owner) = owner else {
            let transition = JobTransition::new(&request.job_id, JobEvent::MarkReferenceOnly)
                .with_routing_key(&request.routing_key);
            let outcome = self.jobs.transition_job(&transition).await?;
            if !outcome.applied {
                return Ok(RouteOutcome::AlreadyTracked(outcome.previous));
            }
            self.record(&request.job_id, None, JobStatus::ReferenceOnly);
            return Ok(RouteOutcome::ReferenceOnly);
        };

        let tier = match self.classifier.classify(request.document_type.as_deref()) {
            Classification::Skip => {
                let transition = JobTransition::new(&request.job_id, JobEvent::Skip)
                    .with_owner(Some(owner))
                    .with_routing_key(&request.routing_key);
                let outcome = self.jobs.transition_job(&transition).await?;
                if !outcome.applied {
                    return Ok(RouteOutcome::AlreadyTracked(outcome.previous));
                }
                self.record(&request.job_id, None, JobStatus::Skipped);
                return Ok(RouteOutcome::Skipped);
            }
            Classification::Tier(tier) => tier,
        };

        let transition = JobTransition::new(&request.job_id, JobEvent::Enqueue)
            .with_owner(Some(owner.clone()))
            .with_routing_key(&request.routing_key)
            .with_classification(tier);
        let outcome = self.jobs.transition_job(&transition).await?;
        if !outcome.applied {
            debug!(job_id = %request.job_id, previous = ?outcome.previous, "Job already tracked");
            return Ok(RouteOutcome::AlreadyTracked(outcome.previous));
        }

        self.push_payload(&DocumentJobPayload {
            job_id: request.job_id.clone(),
            owner_id: owner,
            routing_key: request.routing_key,
            classification: tier,
        })
        .await?;
        self.record(&request.job_id, Some(tier), JobStatus::Queued);
        Ok(RouteOutcome::Queued(tier))
    }

    /// Put a stale job back on its queue; returns whether it was re-driven
    pub async fn redrive(&self, job: &DocumentJob) -> PipelineResult<bool> {
        let event = match job.status {
            JobStatus::Failed => Some(JobEvent::Retry),
            JobStatus::Processing => Some(JobEvent::Recover),
            JobStatus::Pending => Some(JobEvent::Enqueue),
            // Lost between transition and push; the worker's claim discards duplicates
            JobStatus::Queued => None,
            _ => return Ok(false),
        };

        if job.owner_id.as_deref().map_or(true, |o| o.trim().is_empty()) {
            if job.status == JobStatus::Pending {
                let transition = JobTransition::new(&job.job_id, JobEvent::MarkReferenceOnly);
                self.jobs.transition_job(&transition).await?;
            }
            warn!(job_id = %job.job_id, status = %job.status, "Stale job has no owner; not re-driven");
            return Ok(false);
        }

        let tier = job.classification.unwrap_or(DocumentTier::Heavy);
        if let Some(event) = event {
            let transition = JobTransition::new(&job.job_id, event).with_classification(tier);
            let outcome = self.jobs.transition_job(&transition).await?;
            if !outcome.applied {
                debug!(job_id = %job.job_id, previous = ?outcome.previous, "Job moved on before re-drive");
                return Ok(false);
            }
        }

        let mut payload_job = job.clone();
        payload_job.classification = Some(tier);
        let Some(payload) = payload_job.payload() else {
            return Ok(false);
        };
        self.push_payload(&payload).await?;
        log_job_operation("redrive", &job.job_id, Some(tier.as_str()), JobStatus::Queued.as_str(), None);
        Ok(true)
    }

    fn record(&self, job_id: &str, tier: Option<DocumentTier>, status: JobStatus) {
        document_jobs_total().add(1, &[KeyValue::new("status", status.as_str())]);
        log_job_operation("route", job_id, tier.map(|t| t.as_str()), status.as_str(), None);
    }
}
