//! Destination store error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph connection error: {0}")]
    ConnectionError(String),

    #[error("Graph query failed: {0}")]
    QueryError(String),

    #[error("Graph serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid graph identifier '{0}'")]
    InvalidIdentifier(String),
}

impl GraphError {
    /// Transient I/O failure
    pub fn is_io(&self) -> bool {
        matches!(self, Self::ConnectionError(_))
    }
}

pub type GraphResult<T> = Result<T, GraphError>;
