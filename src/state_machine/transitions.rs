//! Conditional job transitions applied by a [`JobStatusStore`](crate::graph::JobStatusStore).
//!
//! A transition is a single compare-and-set: the store reads the current status and
//! writes the target status only if the event is allowed from it. Callers never read
//! and then write in separate steps.

use serde::{Deserialize, Serialize};

use super::events::JobEvent;
use super::states::JobStatus;
use crate::models::DocumentTier;

/// One conditional status write plus the attributes it carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTransition {
    pub job_id: String,
    pub event: JobEvent,
    /// Attributes stored when the transition applies
    pub owner_id: Option<String>,
    pub routing_key: Option<String>,
    pub classification: Option<DocumentTier>,
}

impl JobTransition {
    pub fn new(job_id: impl Into<String>, event: JobEvent) -> Self {
        Self {
            job_id: job_id.into(),
            event,
            owner_id: None,
            routing_key: None,
            classification: None,
        }
    }

    pub fn with_owner(mut self, owner_id: Option<String>) -> Self {
        self.owner_id = owner_id;
        self
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    pub fn with_classification(mut self, classification: DocumentTier) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn target(&self) -> JobStatus {
        self.event.target()
    }
}

/// Result of a conditional transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    /// The status write happened
    pub applied: bool,
    /// Status observed by the conditional query
    pub previous: Option<JobStatus>,
}

impl TransitionOutcome {
    pub fn applied(previous: Option<JobStatus>) -> Self {
        Self {
            applied: true,
            previous,
        }
    }

    pub fn rejected(previous: Option<JobStatus>) -> Self {
        Self {
            applied: false,
            previous,
        }
    }
}

/// Every `(from, to)` pair reachable through some event
pub fn allowed_edges() -> Vec<(Option<JobStatus>, JobStatus)> {
    let events = [
        JobEvent::Enqueue,
        JobEvent::Start,
        JobEvent::Complete,
        JobEvent::Fail(String::new()),
        JobEvent::Demote,
        JobEvent::Retry,
        JobEvent::Recover,
        JobEvent::Skip,
        JobEvent::MarkReferenceOnly,
    ];
    let mut edges = Vec::new();
    for event in &events {
        if event.allows_absent() {
            edges.push((None, event.target()));
        }
        for from in event.allowed_from() {
            edges.push((Some(*from), event.target()));
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorbing_states_have_no_outgoing_edges() {
        for (from, _) in allowed_edges() {
            if let Some(status) = from {
                assert!(!status.is_terminal(), "{status} must be absorbing");
            }
        }
    }

    #[test]
    fn test_enqueue_only_from_absent_or_pending() {
        assert!(JobEvent::Enqueue.is_allowed_from(None));
        assert!(JobEvent::Enqueue.is_allowed_from(Some(JobStatus::Pending)));
        assert!(!JobEvent::Enqueue.is_allowed_from(Some(JobStatus::Queued)));
        assert!(!JobEvent::Enqueue.is_allowed_from(Some(JobStatus::Failed)));
        assert!(!JobEvent::Start.is_allowed_from(None));
    }

    #[test]
    fn test_failed_only_retried_back_to_queued() {
        let from_failed: Vec<_> = allowed_edges()
            .into_iter()
            .filter(|(from, _)| *from == Some(JobStatus::Failed))
            .map(|(_, to)| to)
            .collect();
        assert_eq!(from_failed, vec![JobStatus::Queued]);
    }

    #[test]
    fn test_reference_only_never_passes_through_queue() {
        assert_eq!(JobEvent::MarkReferenceOnly.target(), JobStatus::ReferenceOnly);
        assert!(JobEvent::MarkReferenceOnly.is_allowed_from(None));
        assert!(!JobEvent::MarkReferenceOnly.is_allowed_from(Some(JobStatus::Queued)));
    }

    #[test]
    fn test_fail_carries_message() {
        let event = JobEvent::Fail("timeout".into());
        assert_eq!(event.error_message(), Some("timeout"));
        assert!(!event.clears_error());
        assert_eq!(event.event_type(), "fail");
    }
}
