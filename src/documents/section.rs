//! Batch-level section extraction under a wall-clock deadline.
//!
//! Each section runs through the extractor with its own per-call timeout. The batch
//! as a whole has a deadline; when it passes, in-flight extractions are dropped and
//! whatever completed so far is returned.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::DocumentsConfig;
use crate::error::{PipelineError, PipelineResult};

/// External per-section extraction call
#[async_trait]
pub trait SectionExtractor: Send + Sync {
    async fn extract(&self, section: &str) -> PipelineResult<serde_json::Value>;
}

/// Partial results of one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionBatchResult {
    pub completed: Vec<(String, serde_json::Value)>,
    pub failed: Vec<(String, String)>,
    /// Sections not finished when the deadline passed
    pub abandoned: Vec<String>,
    pub deadline_hit: bool,
}

impl SectionBatchResult {
    pub fn is_complete(&self) -> bool {
        !self.deadline_hit && self.failed.is_empty()
    }
}

pub struct SectionBatchProcessor {
    extractor: Arc<dyn SectionExtractor>,
    call_timeout: Duration,
    deadline: Duration,
    concurrency: usize,
}

impl std::fmt::Debug for SectionBatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionBatchProcessor")
            .field("call_timeout", &self.call_timeout)
            .field("deadline", &self.deadline)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl SectionBatchProcessor {
    pub fn new(
        extractor: Arc<dyn SectionExtractor>,
        call_timeout: Duration,
        deadline: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            extractor,
            call_timeout,
            deadline,
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(extractor: Arc<dyn SectionExtractor>, config: &DocumentsConfig) -> Self {
        Self::new(
            extractor,
            config.call_timeout(),
            config.batch_deadline(),
            config.concurrency_limit,
        )
    }

    pub async fn run(&self, sections: Vec<String>) -> SectionBatchResult {
        let deadline = Instant::now() + self.deadline;
        let call_timeout = self.call_timeout;
        let mut result = SectionBatchResult::default();
        let mut finished = HashSet::new();

        let mut in_flight = stream::iter(sections.iter().cloned())
            .map(|section| {
                let extractor = Arc::clone(&self.extractor);
                async move {
                    let outcome = match tokio::time::timeout(call_timeout, extractor.extract(&section)).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(PipelineError::Timeout(format!(
                            "section '{section}' exceeded {}ms",
                            call_timeout.as_millis()
                        ))),
                    };
                    (section, outcome)
                }
            })
            .buffer_unordered(self.concurrency);

        loop {
            match tokio::time::timeout_at(deadline, in_flight.next()).await {
                Ok(Some((section, Ok(value)))) => {
                    finished.insert(section.clone());
                    result.completed.push((section, value));
                }
                Ok(Some((section, Err(e)))) => {
                    debug!(section = %section, error = %e, "Section extraction failed");
                    finished.insert(section.clone());
                    result.failed.push((section, e.to_string()));
                }
                Ok(None) => break,
                Err(_) => {
                    result.deadline_hit = true;
                    break;
                }
            }
        }
        drop(in_flight);

        if result.deadline_hit {
            result.abandoned = sections
                .into_iter()
                .filter(|s| !finished.contains(s))
                .collect();
            warn!(
                completed = result.completed.len(),
                abandoned = result.abandoned.len(),
                "Section batch deadline passed; keeping partial results"
            );
        }
        result
    }
}
