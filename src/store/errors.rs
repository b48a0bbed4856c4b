//! Store error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store connection error: {0}")]
    ConnectionError(String),

    #[error("Store command failed: {0}")]
    CommandError(String),

    #[error("Store serialization error: {0}")]
    SerializationError(String),

    #[error("Store operation timed out: {0}")]
    Timeout(String),
}

impl StoreError {
    /// Transient I/O failure that a reconnection may fix
    pub fn is_io(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::Timeout(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
