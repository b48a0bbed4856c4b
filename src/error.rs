//! Error types for the event lifecycle pipeline.
//!
//! Backend layers own their own error enums ([`StoreError`], [`GraphError`],
//! [`ConfigurationError`]); [`PipelineError`] wraps them for the orchestration
//! components. Every error maps onto one [`ErrorClass`], which is what the long-running
//! loops branch on.

use crate::config::ConfigurationError;
use crate::graph::GraphError;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Graph store error: {0}")]
    Graph(#[from] GraphError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Enrichment error: {0}")]
    Enrichment(String),
    #[error("State transition error: {0}")]
    StateTransition(String),
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Document processing error: {0}")]
    Document(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        PipelineError::Serialization(error.to_string())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Failure taxonomy shared by every component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Store unreachable or timed out; retried under a consecutive-error counter
    TransientIo,
    /// Missing required field or unmapped type; terminal for the item
    Validation,
    /// Item already at or past the target stage; treated as success
    Duplicate,
    /// No concurrency slot available; job reverts to PENDING
    ResourceExhaustion,
    /// Downstream write failed after retries; job marked FAILED
    DownstreamFailure,
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classify this error against the pipeline failure taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Store(e) if e.is_io() => ErrorClass::TransientIo,
            Self::Graph(e) if e.is_io() => ErrorClass::TransientIo,
            Self::Timeout(_) => ErrorClass::TransientIo,
            Self::Validation(_) | Self::Serialization(_) | Self::Configuration(_) => {
                ErrorClass::Validation
            }
            Self::ResourceExhausted(_) => ErrorClass::ResourceExhaustion,
            _ => ErrorClass::DownstreamFailure,
        }
    }

    /// Whether this failure should count against the I/O error budget
    pub fn is_io(&self) -> bool {
        self.class() == ErrorClass::TransientIo
    }
}

/// Truncate an error message to at most `max_len` bytes on a char boundary.
pub fn truncate_error(message: &str, max_len: usize) -> String {
    if message.len() <= max_len {
        return message.to_string();
    }
    let mut end = max_len;
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let io = PipelineError::Store(StoreError::ConnectionError("refused".into()));
        assert_eq!(io.class(), ErrorClass::TransientIo);
        assert!(io.is_io());

        let command = PipelineError::Store(StoreError::CommandError("WRONGTYPE".into()));
        assert_eq!(command.class(), ErrorClass::DownstreamFailure);
        assert!(!command.is_io());

        assert_eq!(
            PipelineError::validation("missing id").class(),
            ErrorClass::Validation
        );
        assert_eq!(
            PipelineError::ResourceExhausted("no permit".into()).class(),
            ErrorClass::ResourceExhaustion
        );
        assert_eq!(
            PipelineError::Timeout("call".into()).class(),
            ErrorClass::TransientIo
        );
    }

    #[test]
    fn test_truncate_error_respects_char_boundaries() {
        assert_eq!(truncate_error("short", 10), "short");
        assert_eq!(truncate_error("abcdef", 3), "abc");
        // 'é' is two bytes; cutting at 2 would split it
        assert_eq!(truncate_error("aé", 2), "a");
    }
}
