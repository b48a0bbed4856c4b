//! # Single-Writer Edge Batcher
//!
//! The only consumer of the shared edge queue. Each drain pops up to `batch_size`
//! requests in one pipelined call, groups them by
//! `(relationship_type, source_kind, target_kind)` and commits every group in a
//! single destination transaction, one batched upsert per group.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use super::queue::EdgeQueue;
use super::type_resolution::resolve_kinds;
use crate::config::EdgesConfig;
use crate::error::PipelineResult;
use crate::graph::GraphStore;
use crate::logging::log_error;
use crate::metrics::{
    edge_batch_duration, edge_batches_committed_total, edge_groups_committed_total,
    edge_requests_skipped_total,
};
use crate::models::{EdgeGroup, EdgeGroupKey, EdgeWriteRequest, GroupedEdge};
use crate::resilience::{ConsecutiveErrorTracker, ErrorAction};
use crate::shutdown::ShutdownSignal;
use crate::store::KvStore;

/// Summary of one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub drained: usize,
    pub groups: usize,
    pub edges: usize,
    /// Requests whose kinds could not be resolved or are not valid identifiers
    pub skipped: usize,
    pub malformed: usize,
}

/// Group requests by commit key, dropping those with unresolvable kinds or
/// names that cannot be used as labels.
/// Returns the groups in key order plus the number of skipped requests.
pub fn group_requests(requests: Vec<EdgeWriteRequest>) -> (Vec<EdgeGroup>, usize) {
    let mut grouped: BTreeMap<EdgeGroupKey, Vec<GroupedEdge>> = BTreeMap::new();
    let mut skipped = 0;

    for request in requests {
        let relationship_type = request.relationship_type.trim().to_string();
        let Some((source_kind, target_kind)) = resolve_kinds(
            &relationship_type,
            request.source_kind.as_deref(),
            request.target_kind.as_deref(),
        ) else {
            warn!(
                relationship_type = %relationship_type,
                source_id = %request.source_id,
                target_id = %request.target_id,
                source_kind = ?request.source_kind,
                target_kind = ?request.target_kind,
                "Cannot resolve valid node kinds; skipping edge"
            );
            skipped += 1;
            continue;
        };

        grouped
            .entry(EdgeGroupKey {
                relationship_type,
                source_kind,
                target_kind,
            })
            .or_default()
            .push(GroupedEdge {
                source_id: request.source_id,
                target_id: request.target_id,
                properties: request.properties,
            });
    }

    let groups = grouped
        .into_iter()
        .map(|(key, edges)| EdgeGroup { key, edges })
        .collect();
    (groups, skipped)
}

pub struct EdgeBatcher {
    store: Arc<dyn KvStore>,
    graph: Arc<dyn GraphStore>,
    queue: EdgeQueue,
    config: EdgesConfig,
}

impl std::fmt::Debug for EdgeBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeBatcher")
            .field("queue", &self.config.queue)
            .field("batch_size", &self.config.batch_size)
            .finish()
    }
}

impl EdgeBatcher {
    pub fn new(store: Arc<dyn KvStore>, graph: Arc<dyn GraphStore>, config: &EdgesConfig) -> Self {
        Self {
            queue: EdgeQueue::new(Arc::clone(&store), config.queue.clone()),
            store,
            graph,
            config: config.clone(),
        }
    }

    /// Drain and commit one batch
    pub async fn drain_once(&self) -> PipelineResult<BatchReport> {
        let raw = self
            .store
            .pop_batch(&self.config.queue, self.config.batch_size)
            .await?;
        if raw.is_empty() {
            return Ok(BatchReport::default());
        }

        let mut report = BatchReport {
            drained: raw.len(),
            ..BatchReport::default()
        };
        let mut requests = Vec::with_capacity(raw.len());
        let mut valid_raw = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<EdgeWriteRequest>(&entry) {
                Ok(request) => {
                    // Unresolvable requests are never requeued
                    if resolve_kinds(
                        &request.relationship_type,
                        request.source_kind.as_deref(),
                        request.target_kind.as_deref(),
                    )
                    .is_some()
                    {
                        valid_raw.push(entry);
                    }
                    requests.push(request);
                }
                Err(e) => {
                    warn!(error = %e, "Discarding malformed edge request");
                    report.malformed += 1;
                }
            }
        }

        let (groups, skipped) = group_requests(requests);
        report.skipped = skipped;
        if skipped + report.malformed > 0 {
            edge_requests_skipped_total().add((skipped + report.malformed) as u64, &[]);
        }
        if groups.is_empty() {
            return Ok(report);
        }

        let start = Instant::now();
        let commit = match self.graph.upsert_edge_groups(&groups).await {
            Ok(commit) => commit,
            Err(e) => {
                if self.config.requeue_on_failure {
                    self.queue.requeue_raw(&valid_raw).await?;
                    warn!(requeued = valid_raw.len(), error = %e, "Edge commit failed; requests requeued");
                }
                return Err(e.into());
            }
        };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        edge_batch_duration().record(elapsed_ms, &[]);
        edge_batches_committed_total().add(1, &[]);
        for group in &groups {
            edge_groups_committed_total().add(
                1,
                &[KeyValue::new("relationship_type", group.key.relationship_type.clone())],
            );
        }

        report.groups = commit.groups;
        report.edges = commit.edges;
        debug!(
            groups = report.groups,
            edges = report.edges,
            duration_ms = elapsed_ms,
            "Edge batch committed"
        );
        Ok(report)
    }

    pub async fn run(&self, shutdown: ShutdownSignal) {
        let mut errors = ConsecutiveErrorTracker::new("edge_batcher", 3, 10);
        info!(queue = %self.config.queue, "Edge batcher started");

        while !shutdown.is_triggered() {
            match self.drain_once().await {
                Ok(report) => {
                    errors.record_success();
                    if report.drained == 0 {
                        shutdown.sleep(self.config.idle_pause()).await;
                    }
                }
                Err(e) => {
                    log_error("edge_batcher", "drain_once", &e.to_string(), None);
                    if errors.record_failure(&e) == ErrorAction::Reconnect {
                        if let Err(e) = self.store.reconnect().await {
                            warn!(error = %e, "Store reconnect failed");
                        }
                    }
                    shutdown.sleep(self.config.idle_pause()).await;
                }
            }
        }
        info!("Edge batcher stopped");
    }
}
