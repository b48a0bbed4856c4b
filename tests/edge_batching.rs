mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::*;
use eventgraph_core::config::EdgesConfig;
use eventgraph_core::edges::{group_requests, resolve_kinds, EdgeBatcher, EdgeQueue};
use eventgraph_core::graph::InMemoryGraph;
use eventgraph_core::models::EdgeWriteRequest;
use eventgraph_core::store::{InMemoryStore, KvStore};
use proptest::prelude::*;

fn batcher() -> (EdgeBatcher, EdgeQueue, Arc<InMemoryGraph>) {
    let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
    let graph = Arc::new(InMemoryGraph::new());
    let config = EdgesConfig::default();
    (
        EdgeBatcher::new(store.clone(), graph.clone(), &config),
        EdgeQueue::new(store, config.queue),
        graph,
    )
}

#[tokio::test]
async fn test_scenario_c_same_tuple_commits_as_one_group() {
    let (batcher, queue, graph) = batcher();
    let requests: Vec<EdgeWriteRequest> = (0..250)
        .map(|i| EdgeWriteRequest::new("INFLUENCES", format!("news-{i}"), "AAPL"))
        .collect();
    queue.enqueue_many(&requests).await.unwrap();

    let report = batcher.drain_once().await.unwrap();
    assert_eq!(report.drained, 250);
    assert_eq!(report.groups, 1);
    assert_eq!(report.edges, 250);
    assert_eq!(graph.edge_transaction_count(), 1);
    assert_eq!(graph.edge_statement_count(), 1);
    assert_eq!(graph.edge_count(), 250);
}

#[tokio::test]
async fn test_mixed_batch_groups_by_distinct_tuples() {
    let (batcher, queue, graph) = batcher();
    queue
        .enqueue_many(&[
            EdgeWriteRequest::new("INFLUENCES", "n1", "AAPL"),
            EdgeWriteRequest::new("INFLUENCES", "n2", "MSFT"),
            EdgeWriteRequest::new("INFLUENCES", "r1", "AAPL").with_kinds("Report", "Company"),
            EdgeWriteRequest::new("MENTIONS", "n3", "AAPL").with_kinds("News", "Company"),
            EdgeWriteRequest::new("PRIMARY_FILER", "r2", "AAPL"),
            EdgeWriteRequest::new("PRIMARY_FILER", "r3", "MSFT"),
        ])
        .await
        .unwrap();

    let report = batcher.drain_once().await.unwrap();
    assert_eq!(report.groups, 4);
    assert_eq!(report.edges, 6);
    assert_eq!(graph.edge_transaction_count(), 1);
    let counts = eventgraph_core::graph::memory::edges_by_type(&graph);
    assert_eq!(counts.get("INFLUENCES"), Some(&3));
    assert_eq!(counts.get("PRIMARY_FILER"), Some(&2));
}

#[tokio::test]
async fn test_dispatch_queues_symbol_edges_for_the_batcher() {
    let h = Harness::new();
    h.publisher
        .publish(
            eventgraph_core::SourceKind::Transcript,
            eventgraph_core::Namespace::Live,
            eventgraph_core::ItemState::Complete,
            "AAPL_20240201",
            &serde_json::json!({ "item": { "id": "AAPL_20240201", "symbols": ["AAPL"] } }).to_string(),
        )
        .await
        .unwrap();
    h.dispatcher
        .dispatch(
            eventgraph_core::SourceKind::Transcript,
            eventgraph_core::ItemState::Complete,
            "AAPL_20240201",
        )
        .await
        .unwrap();

    let batcher = EdgeBatcher::new(h.store.clone(), h.graph.clone(), &h.config.edges);
    let report = batcher.drain_once().await.unwrap();
    assert_eq!(report.edges, 1);
    assert!(h.graph.has_edge("HAS_TRANSCRIPT", "AAPL", "AAPL_20240201"));
}

proptest! {
    /// Property: one group per distinct resolvable tuple, every resolvable request kept
    #[test]
    fn groups_match_distinct_tuples(requests in prop::collection::vec(edge_request_strategy(), 0..120)) {
        let expected: BTreeSet<(String, String, String)> = requests
            .iter()
            .filter_map(|r| {
                resolve_kinds(&r.relationship_type, r.source_kind.as_deref(), r.target_kind.as_deref())
                    .map(|(s, t)| (r.relationship_type.clone(), s, t))
            })
            .collect();
        let resolvable = requests
            .iter()
            .filter(|r| resolve_kinds(&r.relationship_type, r.source_kind.as_deref(), r.target_kind.as_deref()).is_some())
            .count();
        let total = requests.len();

        let (groups, skipped) = group_requests(requests);
        prop_assert_eq!(groups.len(), expected.len());
        prop_assert_eq!(skipped, total - resolvable);
        prop_assert_eq!(groups.iter().map(|g| g.edges.len()).sum::<usize>(), resolvable);
    }
}
