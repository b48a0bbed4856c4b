//! # Destination Graph Store
//!
//! Durable home of items, relationships and document job statuses.
//!
//! - [`GraphStore`]: idempotent node upserts and grouped edge commits
//! - [`JobStatusStore`]: conditional job status transitions
//!
//! [`InMemoryGraph`] backs tests and embedded runs; `Neo4jGraphStore`
//! (feature `neo4j`) is the production backend.

pub mod errors;
pub mod memory;
#[cfg(feature = "neo4j")]
pub mod neo4j;
pub mod traits;

use std::sync::Arc;

pub use errors::{GraphError, GraphResult};
pub use memory::InMemoryGraph;
#[cfg(feature = "neo4j")]
pub use neo4j::Neo4jGraphStore;
pub use traits::{BatchCommit, GraphStore, JobStatusStore, UpsertOutcome};

use crate::config::{GraphBackend, GraphConfig};

/// One backend seen through both destination contracts
#[derive(Clone)]
pub struct GraphHandles {
    pub graph: Arc<dyn GraphStore>,
    pub jobs: Arc<dyn JobStatusStore>,
}

impl GraphHandles {
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: GraphStore + JobStatusStore + 'static,
    {
        Self {
            graph: backend.clone(),
            jobs: backend,
        }
    }
}

impl std::fmt::Debug for GraphHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphHandles")
            .field("backend", &self.graph.backend_name())
            .finish()
    }
}

/// Build the configured destination backend
pub async fn connect_graph(config: &GraphConfig) -> GraphResult<GraphHandles> {
    match config.backend {
        GraphBackend::Memory => Ok(GraphHandles::from_backend(Arc::new(InMemoryGraph::new()))),
        #[cfg(feature = "neo4j")]
        GraphBackend::Neo4j => Ok(GraphHandles::from_backend(Arc::new(
            Neo4jGraphStore::connect(config).await?,
        ))),
        #[cfg(not(feature = "neo4j"))]
        GraphBackend::Neo4j => Err(GraphError::ConnectionError(
            "neo4j backend requires the `neo4j` feature".to_string(),
        )),
    }
}
