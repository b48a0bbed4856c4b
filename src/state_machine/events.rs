use serde::{Deserialize, Serialize};

use super::states::JobStatus;

/// Events that can trigger document job status transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum JobEvent {
    /// Router accepted the job onto a tier queue
    Enqueue,
    /// Worker acquired a concurrency slot and starts the heavy call
    Start,
    /// Heavy call succeeded
    Complete,
    /// Retries exhausted, with the captured error text
    Fail(String),
    /// No concurrency slot after bounded retries
    Demote,
    /// Reconciliation retries a failed job
    Retry,
    /// Reconciliation recovers a job stuck in PROCESSING
    Recover,
    /// Classification marked the document out of scope
    Skip,
    /// Mandatory routing attribute missing
    MarkReferenceOnly,
}

impl JobEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Demote => "demote",
            Self::Retry => "retry",
            Self::Recover => "recover",
            Self::Skip => "skip",
            Self::MarkReferenceOnly => "mark_reference_only",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Status the job holds after this event
    pub fn target(&self) -> JobStatus {
        match self {
            Self::Enqueue | Self::Retry | Self::Recover => JobStatus::Queued,
            Self::Start => JobStatus::Processing,
            Self::Complete => JobStatus::Completed,
            Self::Fail(_) => JobStatus::Failed,
            Self::Demote => JobStatus::Pending,
            Self::Skip => JobStatus::Skipped,
            Self::MarkReferenceOnly => JobStatus::ReferenceOnly,
        }
    }

    /// Statuses this event may be applied from
    pub fn allowed_from(&self) -> &'static [JobStatus] {
        match self {
            Self::Enqueue | Self::Skip | Self::MarkReferenceOnly => &[JobStatus::Pending],
            Self::Start | Self::Demote => &[JobStatus::Queued],
            Self::Complete | Self::Fail(_) | Self::Recover => &[JobStatus::Processing],
            Self::Retry => &[JobStatus::Failed],
        }
    }

    /// Whether the event may create the job when no record exists
    pub fn allows_absent(&self) -> bool {
        matches!(self, Self::Enqueue | Self::Skip | Self::MarkReferenceOnly)
    }

    /// Whether a previously captured error is cleared
    pub fn clears_error(&self) -> bool {
        matches!(self, Self::Enqueue | Self::Retry | Self::Recover | Self::Complete)
    }

    /// Whether reconciliation performed this transition
    pub fn is_redrive(&self) -> bool {
        matches!(self, Self::Retry | Self::Recover)
    }

    /// Check the event against the current status
    pub fn is_allowed_from(&self, current: Option<JobStatus>) -> bool {
        match current {
            None => self.allows_absent(),
            Some(status) => self.allowed_from().contains(&status),
        }
    }
}
