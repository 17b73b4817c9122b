//! # Store Errors
//!
//! Error types for the backing document store.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Backing store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No document stored under the key
    #[error("Document not found")]
    NotFound,

    /// A document or entity already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Durable version does not match the submission base
    #[error("Version conflict (expected {expected}, stored {actual})")]
    Conflict { expected: u64, actual: u64 },

    /// Store unreachable or overloaded; safe to retry
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Store refused the write
    #[error("Store rejected the operation: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Whether the operation may succeed if retried
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}
