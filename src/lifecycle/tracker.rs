//! Set-once lifecycle fields and pending-set maintenance.
//!
//! Every write goes through a single `HashSetIfAbsent` store operation, so two
//! callers marking the same field concurrently produce exactly one write. The
//! pending-set side effect rides in the same operation. Terminal fields exclude
//! each other: once one is recorded, the others are never written.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::LifecycleConfig;
use crate::constants::lifecycle_fields as fields;
use crate::constants::UNSPECIFIED_REASON;
use crate::error::PipelineResult;
use crate::keys::{id_from_lifecycle_key, lifecycle_key, pending_set_key};
use crate::models::lifecycle::{format_timestamp, is_terminal_field, TERMINAL_FIELDS};
use crate::models::{LifecycleRecord, SourceKind};
use crate::store::{KvStore, PendingSetUpdate, StoreBatch, StoreOp};

/// A timestamp field to record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark<'a> {
    pub field: &'a str,
    pub at: DateTime<Utc>,
    pub reason: Option<&'a str>,
}

impl<'a> Mark<'a> {
    pub fn now(field: &'a str) -> Self {
        Self::at(field, Utc::now())
    }

    pub fn at(field: &'a str, at: DateTime<Utc>) -> Self {
        Self {
            field,
            at,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: &'a str) -> Self {
        self.reason = Some(reason);
        self
    }
}

/// Result of a lifecycle write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// Executed immediately; `true` when the field was newly written
    Applied(bool),
    /// Appended to a caller batch at this reply index
    Batched(usize),
}

impl MarkOutcome {
    pub fn was_written(&self) -> Option<bool> {
        match self {
            Self::Applied(written) => Some(*written),
            Self::Batched(_) => None,
        }
    }
}

/// Companion reason field for a terminal field, e.g. `failed_at` -> `failed_reason`
fn reason_field(field: &str) -> Option<&'static str> {
    match field {
        fields::FILTERED_AT => Some(fields::FILTERED_REASON),
        fields::FAILED_AT => Some(fields::FAILED_REASON),
        _ => None,
    }
}

#[derive(Clone)]
pub struct LifecycleTracker {
    store: Arc<dyn KvStore>,
    config: LifecycleConfig,
}

impl std::fmt::Debug for LifecycleTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleTracker")
            .field("backend", &self.store.backend_name())
            .field("config", &self.config)
            .finish()
    }
}

impl LifecycleTracker {
    pub fn new(store: Arc<dyn KvStore>, config: LifecycleConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    fn mark_op(&self, source: SourceKind, id: &str, mark: &Mark<'_>) -> StoreOp {
        let key = lifecycle_key(source, id);
        let terminal = is_terminal_field(mark.field);

        let pending = if mark.field == fields::INGESTED_AT {
            Some(PendingSetUpdate::Add {
                set_key: pending_set_key(source),
                member: key.clone(),
                unless_fields: TERMINAL_FIELDS.iter().map(|f| f.to_string()).collect(),
            })
        } else if terminal && self.config.remove_on_terminal {
            Some(PendingSetUpdate::Remove {
                set_key: pending_set_key(source),
                member: key.clone(),
            })
        } else {
            None
        };

        let companion = reason_field(mark.field).map(|reason_field| {
            (
                reason_field.to_string(),
                mark.reason.unwrap_or(UNSPECIFIED_REASON).to_string(),
            )
        });

        StoreOp::HashSetIfAbsent {
            key,
            field: mark.field.to_string(),
            value: format_timestamp(mark.at),
            companion,
            // In-flight records never expire
            ttl: if terminal { self.config.ttl() } else { None },
            pending,
            // Items dropped before ingestion tracking never get a record
            require_record: mark.field == fields::FILTERED_AT,
            exclusive_with: if terminal {
                TERMINAL_FIELDS
                    .iter()
                    .filter(|f| **f != mark.field)
                    .map(|f| f.to_string())
                    .collect()
            } else {
                Vec::new()
            },
        }
    }

    /// Record `mark.field` if absent, either immediately or inside `batch`
    pub async fn mark_timestamp(
        &self,
        source: SourceKind,
        id: &str,
        mark: Mark<'_>,
        batch: Option<&mut StoreBatch>,
    ) -> PipelineResult<MarkOutcome> {
        let op = self.mark_op(source, id, &mark);
        if let Some(batch) = batch {
            return Ok(MarkOutcome::Batched(batch.push(op)));
        }

        let mut own = StoreBatch::new();
        own.push(op);
        let replies = self.store.execute(own).await?;
        let written = replies.first().is_some_and(|r| r.flag());
        debug!(source = %source, item_id = id, field = mark.field, written, "Lifecycle mark");
        Ok(MarkOutcome::Applied(written))
    }

    /// Record an audit field if absent
    pub async fn set_data(
        &self,
        source: SourceKind,
        id: &str,
        field: &str,
        value: &str,
        batch: Option<&mut StoreBatch>,
    ) -> PipelineResult<MarkOutcome> {
        let op = StoreOp::HashSetIfAbsent {
            key: lifecycle_key(source, id),
            field: field.to_string(),
            value: value.to_string(),
            companion: None,
            ttl: None,
            pending: None,
            require_record: false,
            exclusive_with: Vec::new(),
        };
        if let Some(batch) = batch {
            return Ok(MarkOutcome::Batched(batch.push(op)));
        }
        let mut own = StoreBatch::new();
        own.push(op);
        let replies = self.store.execute(own).await?;
        Ok(MarkOutcome::Applied(replies.first().is_some_and(|r| r.flag())))
    }

    pub async fn has_field(&self, source: SourceKind, id: &str, field: &str) -> PipelineResult<bool> {
        Ok(self.store.hash_exists(&lifecycle_key(source, id), field).await?)
    }

    pub async fn is_inserted(&self, source: SourceKind, id: &str) -> PipelineResult<bool> {
        self.has_field(source, id, fields::INSERTED_AT).await
    }

    /// Full record, or `None` when nothing was ever tracked for the item
    pub async fn record(&self, source: SourceKind, id: &str) -> PipelineResult<Option<LifecycleRecord>> {
        let raw = self.store.hash_get_all(&lifecycle_key(source, id)).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(LifecycleRecord::from_fields(raw)))
    }

    /// Ids currently in flight for `source`
    pub async fn pending_ids(&self, source: SourceKind) -> PipelineResult<Vec<String>> {
        let members = self.store.set_members(&pending_set_key(source)).await?;
        Ok(members
            .iter()
            .filter_map(|key| id_from_lifecycle_key(key, source))
            .map(str::to_string)
            .collect())
    }
}
