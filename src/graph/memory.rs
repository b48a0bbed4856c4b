//! In-process graph store.
//!
//! Nodes and jobs live in `DashMap`s; the entry API gives the same atomic
//! create-or-update and compare-and-set semantics the Neo4j backend gets from
//! `MERGE` and conditional `MATCH ... WHERE`. Counters expose what tests need to
//! verify: fresh creates, edge transactions and the peak number of jobs that were
//! PROCESSING at once.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::errors::{GraphError, GraphResult};
use super::traits::{BatchCommit, GraphStore, JobStatusStore, UpsertOutcome};
use crate::models::{DocumentJob, EdgeGroup, GraphItem, SourceKind};
use crate::state_machine::{JobStatus, JobTransition, TransitionOutcome};

/// Stored node
#[derive(Debug, Clone, PartialEq)]
pub struct StoredNode {
    pub label: String,
    pub id: String,
    pub version: Option<DateTime<Utc>>,
    pub symbols: Vec<String>,
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Number of upserts applied after the initial create
    pub updates: u64,
}

/// Stored relationship, keyed by `(type, source label, source id, target label, target id)`
pub type EdgeKey = (String, String, String, String, String);

#[derive(Debug, Default)]
pub struct InMemoryGraph {
    nodes: DashMap<(String, String), StoredNode>,
    edges: Mutex<BTreeMap<EdgeKey, serde_json::Map<String, serde_json::Value>>>,
    jobs: DashMap<String, DocumentJob>,
    job_history: DashMap<String, Vec<JobStatus>>,
    creates: AtomicU64,
    item_writes: AtomicU64,
    edge_transactions: AtomicU64,
    edge_statements: AtomicU64,
    processing_now: AtomicUsize,
    processing_peak: AtomicUsize,
    fail_edge_commits: AtomicUsize,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, source: SourceKind, id: &str) -> Option<StoredNode> {
        self.nodes
            .get(&(source.node_label().to_string(), id.to_string()))
            .map(|n| n.clone())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Fresh node creations since construction
    pub fn create_count(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }

    /// Upserts of any kind since construction
    pub fn item_write_count(&self) -> u64 {
        self.item_writes.load(Ordering::SeqCst)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.lock().len()
    }

    pub fn has_edge(&self, relationship_type: &str, source_id: &str, target_id: &str) -> bool {
        self.edges
            .lock()
            .keys()
            .any(|(t, _, s, _, d)| t == relationship_type && s == source_id && d == target_id)
    }

    pub fn edges(&self) -> Vec<EdgeKey> {
        self.edges.lock().keys().cloned().collect()
    }

    /// Committed edge transactions
    pub fn edge_transaction_count(&self) -> u64 {
        self.edge_transactions.load(Ordering::SeqCst)
    }

    /// Batched upsert statements executed inside committed transactions
    pub fn edge_statement_count(&self) -> u64 {
        self.edge_statements.load(Ordering::SeqCst)
    }

    /// Fail the next `n` edge commits with a connection error
    pub fn fail_next_edge_commits(&self, n: usize) {
        self.fail_edge_commits.store(n, Ordering::SeqCst);
    }

    /// Highest number of jobs simultaneously in PROCESSING
    pub fn peak_processing(&self) -> usize {
        self.processing_peak.load(Ordering::SeqCst)
    }

    pub fn processing_count(&self) -> usize {
        self.processing_now.load(Ordering::SeqCst)
    }

    /// Every status a job has been written with, in order
    pub fn job_history(&self, job_id: &str) -> Vec<JobStatus> {
        self.job_history
            .get(job_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn jobs(&self) -> Vec<DocumentJob> {
        self.jobs.iter().map(|j| j.value().clone()).collect()
    }

    /// Force a job's `updated_at`, used to age jobs for stale-job sweeps
    pub fn set_job_updated_at(&self, job_id: &str, updated_at: DateTime<Utc>) {
        if let Some(mut job) = self.jobs.get_mut(job_id) {
            job.updated_at = updated_at;
        }
    }

    fn track_processing(&self, previous: Option<JobStatus>, next: JobStatus) {
        if previous == Some(JobStatus::Processing) {
            self.processing_now.fetch_sub(1, Ordering::SeqCst);
        }
        if next == JobStatus::Processing {
            let now = self.processing_now.fetch_add(1, Ordering::SeqCst) + 1;
            self.processing_peak.fetch_max(now, Ordering::SeqCst);
        }
    }

    fn apply(job: &mut DocumentJob, transition: &JobTransition) {
        let event = &transition.event;
        job.status = event.target();
        job.updated_at = Utc::now();
        if let Some(message) = event.error_message() {
            job.error_message = Some(message.to_string());
        } else if event.clears_error() {
            job.error_message = None;
        }
        if transition.owner_id.is_some() {
            job.owner_id.clone_from(&transition.owner_id);
        }
        if let Some(routing_key) = &transition.routing_key {
            job.routing_key.clone_from(routing_key);
        }
        if transition.classification.is_some() {
            job.classification = transition.classification;
        }
        if event.is_redrive() {
            job.redrive_count += 1;
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn upsert_item(&self, item: &GraphItem) -> GraphResult<UpsertOutcome> {
        self.item_writes.fetch_add(1, Ordering::SeqCst);
        let key = (item.label().to_string(), item.id.clone());
        let created = match self.nodes.entry(key) {
            Entry::Occupied(mut occupied) => {
                let node = occupied.get_mut();
                node.version = item.version.or(node.version);
                node.symbols.clone_from(&item.symbols);
                for (k, v) in &item.properties {
                    node.properties.insert(k.clone(), v.clone());
                }
                node.updates += 1;
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredNode {
                    label: item.label().to_string(),
                    id: item.id.clone(),
                    version: item.version,
                    symbols: item.symbols.clone(),
                    properties: item.properties.clone(),
                    updates: 0,
                });
                true
            }
        };
        if created {
            self.creates.fetch_add(1, Ordering::SeqCst);
        }
        Ok(UpsertOutcome { created })
    }

    async fn item_version(&self, source: SourceKind, id: &str) -> GraphResult<Option<DateTime<Utc>>> {
        Ok(self
            .nodes
            .get(&(source.node_label().to_string(), id.to_string()))
            .and_then(|n| n.version))
    }

    async fn upsert_edge_groups(&self, groups: &[EdgeGroup]) -> GraphResult<BatchCommit> {
        let remaining = self.fail_edge_commits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_edge_commits.store(remaining - 1, Ordering::SeqCst);
            return Err(GraphError::ConnectionError(
                "injected edge commit failure".to_string(),
            ));
        }

        // Stage everything first so the commit is all-or-nothing
        let mut staged = Vec::new();
        for group in groups {
            for edge in &group.edges {
                staged.push((
                    (
                        group.key.relationship_type.clone(),
                        group.key.source_kind.clone(),
                        edge.source_id.clone(),
                        group.key.target_kind.clone(),
                        edge.target_id.clone(),
                    ),
                    edge.properties.clone(),
                ));
            }
        }

        let edges = staged.len();
        let mut committed = self.edges.lock();
        for (key, properties) in staged {
            committed.entry(key).or_default().extend(properties);
        }
        drop(committed);

        self.edge_transactions.fetch_add(1, Ordering::SeqCst);
        self.edge_statements
            .fetch_add(groups.len() as u64, Ordering::SeqCst);
        Ok(BatchCommit {
            groups: groups.len(),
            edges,
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl JobStatusStore for InMemoryGraph {
    async fn transition_job(&self, transition: &JobTransition) -> GraphResult<TransitionOutcome> {
        let event = &transition.event;
        let outcome = match self.jobs.entry(transition.job_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.get().status;
                if !event.is_allowed_from(Some(previous)) {
                    return Ok(TransitionOutcome::rejected(Some(previous)));
                }
                Self::apply(occupied.get_mut(), transition);
                TransitionOutcome::applied(Some(previous))
            }
            Entry::Vacant(vacant) => {
                if !event.allows_absent() {
                    return Ok(TransitionOutcome::rejected(None));
                }
                let mut job = DocumentJob {
                    job_id: transition.job_id.clone(),
                    owner_id: None,
                    routing_key: String::new(),
                    status: JobStatus::Pending,
                    classification: None,
                    error_message: None,
                    redrive_count: 0,
                    updated_at: Utc::now(),
                };
                Self::apply(&mut job, transition);
                vacant.insert(job);
                TransitionOutcome::applied(None)
            }
        };

        let target = event.target();
        self.track_processing(outcome.previous, target);
        self.job_history
            .entry(transition.job_id.clone())
            .or_default()
            .push(target);
        Ok(outcome)
    }

    async fn job(&self, job_id: &str) -> GraphResult<Option<DocumentJob>> {
        Ok(self.jobs.get(job_id).map(|j| j.clone()))
    }

    async fn stale_jobs(
        &self,
        statuses: &[JobStatus],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> GraphResult<Vec<DocumentJob>> {
        let mut stale: Vec<DocumentJob> = self
            .jobs
            .iter()
            .filter(|j| statuses.contains(&j.status) && j.updated_at < older_than)
            .map(|j| j.value().clone())
            .collect();
        stale.sort_by_key(|j| j.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }
}

/// Edge keys grouped by relationship type, for assertions
pub fn edges_by_type(graph: &InMemoryGraph) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for (relationship_type, ..) in graph.edges() {
        *counts.entry(relationship_type).or_insert(0) += 1;
    }
    counts
}
