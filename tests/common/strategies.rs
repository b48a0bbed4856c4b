//! Proptest strategies for pipeline inputs.

use eventgraph_core::models::EdgeWriteRequest;
use eventgraph_core::state_machine::JobEvent;
use proptest::prelude::*;

pub fn job_event_strategy() -> impl Strategy<Value = JobEvent> {
    prop_oneof![
        Just(JobEvent::Enqueue),
        Just(JobEvent::Start),
        Just(JobEvent::Complete),
        "[a-z ]{0,20}".prop_map(JobEvent::Fail),
        Just(JobEvent::Demote),
        Just(JobEvent::Retry),
        Just(JobEvent::Recover),
        Just(JobEvent::Skip),
        Just(JobEvent::MarkReferenceOnly),
    ]
}

/// Requests drawn from a small set of relationship types and kind hints so batches
/// contain repeated grouping keys
pub fn edge_request_strategy() -> impl Strategy<Value = EdgeWriteRequest> {
    let relationship = prop_oneof![
        Just("INFLUENCES"),
        Just("PRIMARY_FILER"),
        Just("HAS_TRANSCRIPT"),
        Just("MENTIONS"),
    ];
    let kinds = prop_oneof![
        Just(None),
        Just(Some(("News", "Company"))),
        Just(Some(("Transcript", "Company"))),
    ];
    (relationship, kinds, "[a-z0-9]{1,6}", "[A-Z]{1,4}").prop_map(|(rel, kinds, src, dst)| {
        let request = EdgeWriteRequest::new(rel, src, dst);
        match kinds {
            Some((source_kind, target_kind)) => request.with_kinds(source_kind, target_kind),
            None => request,
        }
    })
}
