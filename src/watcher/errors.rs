//! # Queue Errors

use thiserror::Error;

/// Result type for change queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Change queue errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Another consumer took over the topic
    #[error("Topic ownership lost")]
    OwnershipLost,

    /// An event could not be decoded; the stream itself is still usable
    #[error("Malformed change event: {0}")]
    Malformed(String),

    /// The queue backend could not be reached
    #[error("Change queue unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::OwnershipLost => "OWNERSHIP_LOST",
            QueueError::Malformed(_) => "MALFORMED_EVENT",
            QueueError::Unavailable(_) => "QUEUE_UNAVAILABLE",
        }
    }
}
