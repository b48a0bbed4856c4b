//! Neo4j destination store.
//!
//! Nodes are upserted with `MERGE` on `(label, id)` backed by uniqueness
//! constraints, so concurrent writers converge on one node. Edge batches run one
//! `UNWIND` statement per group inside a single explicit transaction. Job status
//! writes are conditional `MATCH`/`MERGE ... WHERE status IN $allowed` queries that
//! return the previous status only when the write applied.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, BoltNull, BoltType, ConfigBuilder, Graph, Query};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::errors::{GraphError, GraphResult};
use super::traits::{BatchCommit, GraphStore, JobStatusStore, UpsertOutcome};
use crate::config::GraphConfig;
use crate::edges::is_identifier;
use crate::models::lifecycle::format_timestamp;
use crate::models::{DocumentJob, DocumentTier, EdgeGroup, GraphItem, SourceKind};
use crate::state_machine::{JobStatus, JobTransition, TransitionOutcome};

const JOB_LABEL: &str = "DocumentJob";

pub struct Neo4jGraphStore {
    graph: Graph,
}

impl std::fmt::Debug for Neo4jGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jGraphStore").finish_non_exhaustive()
    }
}

impl Neo4jGraphStore {
    pub async fn connect(config: &GraphConfig) -> GraphResult<Self> {
        let mut builder = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .max_connections(config.max_connections);
        if let Some(database) = &config.database {
            builder = builder.db(database.as_str());
        }
        let neo_config = builder
            .build()
            .map_err(|e| GraphError::ConnectionError(e.to_string()))?;
        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::ConnectionError(e.to_string()))?;

        let store = Self { graph };
        store.ensure_schema().await?;
        info!(uri = %config.uri, "Connected to Neo4j destination store");
        Ok(store)
    }

    /// Uniqueness constraints that make concurrent `MERGE`s converge
    async fn ensure_schema(&self) -> GraphResult<()> {
        let labels = SourceKind::ALL
            .iter()
            .map(|s| s.node_label())
            .chain(std::iter::once(JOB_LABEL));
        for label in labels {
            let key = if label == JOB_LABEL { "job_id" } else { "id" };
            let statement = format!(
                "CREATE CONSTRAINT {}_{key}_unique IF NOT EXISTS FOR (n:{label}) REQUIRE n.{key} IS UNIQUE",
                label.to_lowercase()
            );
            self.graph.run(query(&statement)).await.map_err(query_error)?;
        }
        Ok(())
    }

    async fn current_status(&self, job_id: &str) -> GraphResult<Option<JobStatus>> {
        let q = query(&format!(
            "MATCH (j:{JOB_LABEL} {{job_id: $job_id}}) RETURN j.status AS status"
        ))
        .param("job_id", job_id);
        let mut stream = self.graph.execute(q).await.map_err(query_error)?;
        match stream.next().await.map_err(query_error)? {
            Some(row) => Ok(row
                .get::<Option<String>>("status")
                .ok()
                .flatten()
                .and_then(|s| s.parse().ok())),
            None => Ok(None),
        }
    }
}

fn query_error(e: neo4rs::Error) -> GraphError {
    match e {
        neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
            GraphError::ConnectionError(e.to_string())
        }
        other => GraphError::QueryError(other.to_string()),
    }
}

/// Labels and relationship types cannot be parameterized
fn identifier(raw: &str) -> GraphResult<&str> {
    if is_identifier(raw) {
        Ok(raw)
    } else {
        Err(GraphError::InvalidIdentifier(raw.to_string()))
    }
}

fn optional(value: Option<&str>) -> BoltType {
    match value {
        Some(v) => BoltType::from(v),
        None => BoltType::Null(BoltNull),
    }
}

fn to_bolt(value: &serde_json::Value) -> Option<BoltType> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(BoltType::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Some(BoltType::from(i)),
            None => n.as_f64().map(BoltType::from),
        },
        serde_json::Value::String(s) => Some(BoltType::from(s.as_str())),
        // Nested structures are stored as JSON text
        other => Some(BoltType::from(other.to_string())),
    }
}

fn property_map(properties: &serde_json::Map<String, serde_json::Value>) -> HashMap<String, BoltType> {
    properties
        .iter()
        .filter_map(|(k, v)| to_bolt(v).map(|b| (k.clone(), b)))
        .collect()
}

fn edge_group_query(group: &EdgeGroup) -> GraphResult<Query> {
    let relationship = identifier(&group.key.relationship_type)?;
    let source_label = identifier(&group.key.source_kind)?;
    let target_label = identifier(&group.key.target_kind)?;
    let rows: Vec<HashMap<String, BoltType>> = group
        .edges
        .iter()
        .map(|edge| {
            let mut row = HashMap::new();
            row.insert("source_id".to_string(), BoltType::from(edge.source_id.as_str()));
            row.insert("target_id".to_string(), BoltType::from(edge.target_id.as_str()));
            row.insert("props".to_string(), BoltType::from(property_map(&edge.properties)));
            row
        })
        .collect();
    let statement = format!(
        "UNWIND $rows AS row \
         MERGE (s:{source_label} {{id: row.source_id}}) \
         MERGE (t:{target_label} {{id: row.target_id}}) \
         MERGE (s)-[r:{relationship}]->(t) \
         SET r += row.props"
    );
    Ok(query(&statement).param("rows", rows))
}

fn job_from_row(row: &neo4rs::Row) -> GraphResult<DocumentJob> {
    let text = |key: &str| row.get::<Option<String>>(key).ok().flatten();
    let job_id = text("job_id").ok_or_else(|| GraphError::SerializationError("job row missing job_id".into()))?;
    let status = text("status")
        .and_then(|s| s.parse::<JobStatus>().ok())
        .ok_or_else(|| GraphError::SerializationError(format!("job '{job_id}' has no valid status")))?;
    let updated_at = text("updated_at")
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    Ok(DocumentJob {
        owner_id: text("owner_id"),
        routing_key: text("routing_key").unwrap_or_default(),
        status,
        classification: text("classification").and_then(|s| s.parse::<DocumentTier>().ok()),
        error_message: text("error_message"),
        redrive_count: row
            .get::<Option<i64>>("redrive_count")
            .ok()
            .flatten()
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0),
        updated_at,
        job_id,
    })
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn upsert_item(&self, item: &GraphItem) -> GraphResult<UpsertOutcome> {
        let label = identifier(item.label())?;
        let token = Uuid::new_v4().to_string();
        let statement = format!(
            "MERGE (n:{label} {{id: $id}}) \
             ON CREATE SET n.create_token = $token \
             SET n += $props, n.symbols = $symbols, \
                 n.version = coalesce($version, n.version) \
             RETURN n.create_token = $token AS created"
        );
        let q = query(&statement)
            .param("id", item.id.as_str())
            .param("token", token.as_str())
            .param("props", property_map(&item.properties))
            .param("symbols", item.symbols.clone())
            .param(
                "version",
                optional(item.version.map(format_timestamp).as_deref()),
            );

        let mut stream = self.graph.execute(q).await.map_err(query_error)?;
        let created = match stream.next().await.map_err(query_error)? {
            Some(row) => row.get::<bool>("created").unwrap_or(false),
            None => false,
        };
        while stream.next().await.map_err(query_error)?.is_some() {}
        debug!(label, id = %item.id, created, "Upserted node");
        Ok(UpsertOutcome { created })
    }

    async fn item_version(&self, source: SourceKind, id: &str) -> GraphResult<Option<DateTime<Utc>>> {
        let label = identifier(source.node_label())?;
        let q = query(&format!("MATCH (n:{label} {{id: $id}}) RETURN n.version AS version"))
            .param("id", id);
        let mut stream = self.graph.execute(q).await.map_err(query_error)?;
        let Some(row) = stream.next().await.map_err(query_error)? else {
            return Ok(None);
        };
        Ok(row
            .get::<Option<String>>("version")
            .ok()
            .flatten()
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)))
    }

    async fn upsert_edge_groups(&self, groups: &[EdgeGroup]) -> GraphResult<BatchCommit> {
        let queries = groups
            .iter()
            .map(edge_group_query)
            .collect::<GraphResult<Vec<_>>>()?;

        let mut txn = self.graph.start_txn().await.map_err(query_error)?;
        for q in queries {
            if let Err(e) = txn.run(q).await {
                if let Err(rollback) = txn.rollback().await {
                    warn!(error = %rollback, "Edge transaction rollback failed");
                }
                return Err(query_error(e));
            }
        }
        txn.commit().await.map_err(query_error)?;

        Ok(BatchCommit {
            groups: groups.len(),
            edges: groups.iter().map(|g| g.edges.len()).sum(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "neo4j"
    }
}

#[async_trait]
impl JobStatusStore for Neo4jGraphStore {
    async fn transition_job(&self, transition: &JobTransition) -> GraphResult<TransitionOutcome> {
        let event = &transition.event;
        let binding = if event.allows_absent() { "MERGE" } else { "MATCH" };
        let allowed: Vec<String> = event
            .allowed_from()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let statement = format!(
            "{binding} (j:{JOB_LABEL} {{job_id: $job_id}}) \
             WITH j, j.status AS previous \
             WHERE (previous IS NULL AND $allow_absent) OR previous IN $allowed \
             SET j.status = $target, \
                 j.updated_at = $now, \
                 j.error_message = CASE WHEN $error IS NOT NULL THEN $error \
                                        WHEN $clear_error THEN null \
                                        ELSE j.error_message END, \
                 j.owner_id = coalesce($owner_id, j.owner_id), \
                 j.routing_key = coalesce($routing_key, j.routing_key), \
                 j.classification = coalesce($classification, j.classification), \
                 j.redrive_count = coalesce(j.redrive_count, 0) + $redrive \
             RETURN previous"
        );
        let q = query(&statement)
            .param("job_id", transition.job_id.as_str())
            .param("allow_absent", event.allows_absent())
            .param("allowed", allowed)
            .param("target", event.target().as_str())
            .param("now", format_timestamp(Utc::now()))
            .param("error", optional(event.error_message()))
            .param("clear_error", event.clears_error())
            .param("owner_id", optional(transition.owner_id.as_deref()))
            .param("routing_key", optional(transition.routing_key.as_deref()))
            .param(
                "classification",
                optional(transition.classification.map(|c| c.as_str())),
            )
            .param("redrive", i64::from(event.is_redrive()));

        let mut stream = self.graph.execute(q).await.map_err(query_error)?;
        let applied_row = stream.next().await.map_err(query_error)?;
        while stream.next().await.map_err(query_error)?.is_some() {}

        match applied_row {
            Some(row) => {
                let previous = row
                    .get::<Option<String>>("previous")
                    .ok()
                    .flatten()
                    .and_then(|s| s.parse().ok());
                Ok(TransitionOutcome::applied(previous))
            }
            None => {
                let previous = self.current_status(&transition.job_id).await?;
                Ok(TransitionOutcome::rejected(previous))
            }
        }
    }

    async fn job(&self, job_id: &str) -> GraphResult<Option<DocumentJob>> {
        let q = query(&format!(
            "MATCH (j:{JOB_LABEL} {{job_id: $job_id}}) \
             RETURN j.job_id AS job_id, j.owner_id AS owner_id, j.routing_key AS routing_key, \
                    j.status AS status, j.classification AS classification, \
                    j.error_message AS error_message, j.redrive_count AS redrive_count, \
                    j.updated_at AS updated_at"
        ))
        .param("job_id", job_id);
        let mut stream = self.graph.execute(q).await.map_err(query_error)?;
        match stream.next().await.map_err(query_error)? {
            Some(row) => Ok(Some(job_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn stale_jobs(
        &self,
        statuses: &[JobStatus],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> GraphResult<Vec<DocumentJob>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        // updated_at is a fixed-width UTC string, so lexical order is time order
        let q = query(&format!(
            "MATCH (j:{JOB_LABEL}) \
             WHERE j.status IN $statuses AND j.updated_at < $cutoff \
             RETURN j.job_id AS job_id, j.owner_id AS owner_id, j.routing_key AS routing_key, \
                    j.status AS status, j.classification AS classification, \
                    j.error_message AS error_message, j.redrive_count AS redrive_count, \
                    j.updated_at AS updated_at \
             ORDER BY j.updated_at ASC LIMIT $limit"
        ))
        .param("statuses", statuses)
        .param("cutoff", format_timestamp(older_than))
        .param("limit", i64::try_from(limit).unwrap_or(i64::MAX));

        let mut stream = self.graph.execute(q).await.map_err(query_error)?;
        let mut jobs = Vec::new();
        while let Some(row) = stream.next().await.map_err(query_error)? {
            match job_from_row(&row) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(error = %e, "Skipping malformed job row"),
            }
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_rejects_injection() {
        assert!(identifier("HAS_SECTION").is_ok());
        assert!(identifier("Company").is_ok());
        assert!(identifier("X]->(y) DETACH DELETE y //").is_err());
        assert!(identifier("").is_err());
    }

    #[test]
    fn test_null_properties_are_dropped() {
        let mut props = serde_json::Map::new();
        props.insert("a".into(), serde_json::json!(null));
        props.insert("b".into(), serde_json::json!(1));
        props.insert("c".into(), serde_json::json!({"nested": true}));
        let map = property_map(&props);
        assert!(!map.contains_key("a"));
        assert!(map.contains_key("b"));
        assert!(map.contains_key("c"));
    }
}
