use serde::{Deserialize, Serialize};
use std::fmt;

/// Document job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted but not queued (new, or demoted after semaphore exhaustion)
    Pending,
    /// Sitting on a tier queue
    Queued,
    /// Owned by a worker holding a concurrency slot
    Processing,
    /// Heavy work finished successfully
    Completed,
    /// Retries exhausted; reconciliation may re-queue
    Failed,
    /// Classification marked the document out of scope
    Skipped,
    /// Missing a mandatory routing attribute; never queued
    ReferenceOnly,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Skipped,
        JobStatus::ReferenceOnly,
    ];

    /// Check if this is an absorbing state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::ReferenceOnly)
    }

    /// Check if this is an error state that may allow recovery
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Check if a worker currently owns the job
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }

    /// States the reconciliation sweep re-drives when they go stale
    pub fn is_redrivable(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Processing | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::ReferenceOnly => "REFERENCE_ONLY",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "QUEUED" => Ok(Self::Queued),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "SKIPPED" => Ok(Self::Skipped),
            "REFERENCE_ONLY" => Ok(Self::ReferenceOnly),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

/// Default state for new jobs
impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}
