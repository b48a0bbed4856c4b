//! Document jobs: heavy per-document work units and their queue payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state_machine::JobStatus;

/// Cost tier a document job is routed into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentTier {
    Heavy,
    Medium,
    Light,
}

impl DocumentTier {
    pub const ALL: [DocumentTier; 3] = [DocumentTier::Heavy, DocumentTier::Medium, DocumentTier::Light];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heavy => "heavy",
            Self::Medium => "medium",
            Self::Light => "light",
        }
    }
}

impl fmt::Display for DocumentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heavy" => Ok(Self::Heavy),
            "medium" => Ok(Self::Medium),
            "light" => Ok(Self::Light),
            _ => Err(format!("Invalid document tier: {s}")),
        }
    }
}

/// Request to enqueue heavy work for one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentJobRequest {
    pub job_id: String,
    /// Owning identity (e.g. the filer); jobs without one become reference-only
    pub owner_id: Option<String>,
    /// Locator of the document the job operates on
    pub routing_key: String,
    /// Cheap classification input (form type)
    pub document_type: Option<String>,
}

/// Payload pushed onto a tier queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentJobPayload {
    pub job_id: String,
    pub owner_id: String,
    pub routing_key: String,
    pub classification: DocumentTier,
}

/// Persisted job status record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentJob {
    pub job_id: String,
    pub owner_id: Option<String>,
    pub routing_key: String,
    pub status: JobStatus,
    pub classification: Option<DocumentTier>,
    pub error_message: Option<String>,
    /// Times reconciliation moved this job back to QUEUED
    pub redrive_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl DocumentJob {
    pub fn payload(&self) -> Option<DocumentJobPayload> {
        Some(DocumentJobPayload {
            job_id: self.job_id.clone(),
            owner_id: self.owner_id.clone()?,
            routing_key: self.routing_key.clone(),
            classification: self.classification?,
        })
    }
}
