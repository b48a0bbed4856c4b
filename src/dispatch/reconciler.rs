//! # Reconciliation Sweep
//!
//! Safety net for anything the notification path missed. For every configured source
//! the sweep lists the ids present in the transient `complete`/`incomplete`
//! partitions of both namespaces and pushes each through the dispatcher's guarded
//! write path in bounded batches. The dispatcher skips ids that already carry
//! `inserted_at` (unless a mutable entity has a strictly newer version). The sweep then
//! re-drives document jobs stuck in a non-terminal status.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{info, warn};

use super::dispatcher::{DispatchOutcome, Dispatcher};
use crate::config::PipelineConfig;
use crate::documents::DocumentRouter;
use crate::error::PipelineResult;
use crate::graph::JobStatusStore;
use crate::keys::{id_from_item_key, item_pattern};
use crate::logging::log_error;
use crate::metrics::{reconciliation_duration, reconciliation_redriven_total, reconciliation_runs_total};
use crate::models::{ItemState, Namespace, SourceKind};
use crate::state_machine::JobStatus;
use crate::store::KvStore;

/// Statuses a job can get stuck in
const REDRIVABLE: [JobStatus; 4] = [
    JobStatus::Pending,
    JobStatus::Queued,
    JobStatus::Processing,
    JobStatus::Failed,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Distinct `(source, state, id)` entries examined
    pub scanned: usize,
    /// Entries that produced a destination write
    pub redriven: usize,
    pub deduplicated: usize,
    /// Entries whose dispatch returned an error
    pub errors: usize,
    pub jobs_redriven: usize,
}

pub struct Reconciler {
    store: Arc<dyn KvStore>,
    dispatcher: Arc<Dispatcher>,
    jobs: Option<(Arc<dyn JobStatusStore>, Arc<DocumentRouter>)>,
    config: Arc<PipelineConfig>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("sources", &self.config.sources.len())
            .field("jobs", &self.jobs.is_some())
            .finish()
    }
}

impl Reconciler {
    pub fn new(store: Arc<dyn KvStore>, dispatcher: Arc<Dispatcher>, config: Arc<PipelineConfig>) -> Self {
        Self {
            store,
            dispatcher,
            jobs: None,
            config,
        }
    }

    /// Also re-drive stale document jobs
    pub fn with_jobs(mut self, jobs: Arc<dyn JobStatusStore>, router: Arc<DocumentRouter>) -> Self {
        self.jobs = Some((jobs, router));
        self
    }

    async fn transient_ids(&self, source: SourceKind, state: ItemState) -> PipelineResult<BTreeSet<String>> {
        let mut ids = BTreeSet::new();
        for namespace in Namespace::LOOKUP_ORDER {
            let keys = self
                .store
                .scan_keys(&item_pattern(source, namespace, state))
                .await?;
            ids.extend(
                keys.iter()
                    .filter_map(|key| id_from_item_key(key, source, namespace, state))
                    .map(str::to_string),
            );
        }
        Ok(ids)
    }

    /// Run one full sweep across every configured source
    pub async fn run_sweep(&self) -> PipelineResult<ReconcileReport> {
        let start = Instant::now();
        let mut report = ReconcileReport::default();
        let batch_size = self.config.dispatch.reconcile_batch_size.max(1);

        for source_config in &self.config.sources {
            let source = source_config.kind;
            for state in [ItemState::Complete, ItemState::Incomplete] {
                let ids: Vec<String> = match self.transient_ids(source, state).await {
                    Ok(ids) => ids.into_iter().collect(),
                    Err(e) => {
                        report.errors += 1;
                        log_error("reconciler", "scan", &e.to_string(), Some(source.as_str()));
                        continue;
                    }
                };
                for chunk in ids.chunks(batch_size) {
                    for id in chunk {
                        report.scanned += 1;
                        match self.dispatcher.dispatch(source, state, id).await {
                            Ok(outcome) if outcome.wrote() => report.redriven += 1,
                            Ok(DispatchOutcome::Deduplicated) => report.deduplicated += 1,
                            Ok(_) => {}
                            Err(e) => {
                                report.errors += 1;
                                log_error("reconciler", "dispatch", &e.to_string(), Some(id));
                            }
                        }
                    }
                    tokio::task::yield_now().await;
                }
            }
        }

        match self.redrive_stale_jobs().await {
            Ok(redriven) => report.jobs_redriven = redriven,
            Err(e) => {
                report.errors += 1;
                log_error("reconciler", "redrive_stale_jobs", &e.to_string(), None);
            }
        }

        let elapsed = start.elapsed();
        reconciliation_runs_total().add(1, &[]);
        reconciliation_redriven_total().add(report.redriven as u64, &[KeyValue::new("kind", "item")]);
        reconciliation_redriven_total().add(report.jobs_redriven as u64, &[KeyValue::new("kind", "job")]);
        reconciliation_duration().record(elapsed.as_secs_f64() * 1000.0, &[]);
        info!(
            scanned = report.scanned,
            redriven = report.redriven,
            deduplicated = report.deduplicated,
            errors = report.errors,
            jobs_redriven = report.jobs_redriven,
            duration_ms = elapsed.as_millis() as u64,
            "Reconciliation sweep finished"
        );
        Ok(report)
    }

    async fn redrive_stale_jobs(&self) -> PipelineResult<usize> {
        let Some((jobs, router)) = &self.jobs else {
            return Ok(0);
        };
        let stale_after = chrono::Duration::from_std(self.config.dispatch.stale_job_after())
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1000));
        let cutoff = Utc::now() - stale_after;
        let stale = jobs
            .stale_jobs(&REDRIVABLE, cutoff, self.config.dispatch.max_job_redrives_per_sweep)
            .await?;

        let mut redriven = 0;
        for job in &stale {
            match router.redrive(job).await {
                Ok(true) => redriven += 1,
                Ok(false) => {}
                Err(e) => warn!(job_id = %job.job_id, error = %e, "Job re-drive failed"),
            }
        }
        Ok(redriven)
    }
}
