use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::GraphResult;
use crate::models::{DocumentJob, EdgeGroup, GraphItem, SourceKind};
use crate::state_machine::{JobStatus, JobTransition, TransitionOutcome};

/// Result of an idempotent node upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertOutcome {
    /// A fresh node was created (as opposed to an existing one updated)
    pub created: bool,
}

/// Result of one batched edge commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCommit {
    pub groups: usize,
    pub edges: usize,
}

/// Destination graph store contract
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Upsert a node by id, reporting whether a fresh create occurred
    async fn upsert_item(&self, item: &GraphItem) -> GraphResult<UpsertOutcome>;

    /// Version recorded for a node, if the node exists and carries one
    async fn item_version(&self, source: SourceKind, id: &str) -> GraphResult<Option<DateTime<Utc>>>;

    /// Commit every group in one transaction, one batched upsert statement per group
    async fn upsert_edge_groups(&self, groups: &[EdgeGroup]) -> GraphResult<BatchCommit>;

    fn backend_name(&self) -> &'static str;
}

/// Document job status persistence
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    /// Apply a transition as one conditional read+write
    async fn transition_job(&self, transition: &JobTransition) -> GraphResult<TransitionOutcome>;

    async fn job(&self, job_id: &str) -> GraphResult<Option<DocumentJob>>;

    /// Jobs in one of `statuses` not updated since `older_than`
    async fn stale_jobs(
        &self,
        statuses: &[JobStatus],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> GraphResult<Vec<DocumentJob>>;
}
