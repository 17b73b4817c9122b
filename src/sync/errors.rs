//! # Sync Errors
//!
//! Error types for the synchronization engine.
//!
//! Stale submissions and polls that find nothing new are not errors; they are
//! typed outcomes (`SubmitOutcome::Stale`, `EventsOutcome::NoNewData`).

use thiserror::Error;

use crate::store::StoreError;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Synchronization errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    // ==================
    // Resync Signals
    // ==================
    /// The requested baseline has been evicted from the log
    #[error("History unavailable: version {requested} predates oldest retained {oldest}")]
    HistoryUnavailable { requested: u64, oldest: u64 },

    /// The instance was retired after an out-of-band change
    #[error("Instance invalidated")]
    Invalidated,

    // ==================
    // Request Errors
    // ==================
    /// A client asked for a version the document has not reached
    #[error("Version {requested} is ahead of current version {current}")]
    VersionOutOfRange { requested: u64, current: u64 },

    /// Empty or inapplicable step batch
    #[error("Invalid steps: {0}")]
    InvalidSteps(String),

    /// Document does not exist in the backing store
    #[error("Document not found")]
    NotFound,

    /// Document already exists in the backing store
    #[error("Document already exists")]
    AlreadyExists,

    // ==================
    // Collaborator Errors
    // ==================
    /// Backing store failure (after retries, where applicable)
    #[error("Store error: {0}")]
    Store(StoreError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => SyncError::NotFound,
            StoreError::AlreadyExists(_) => SyncError::AlreadyExists,
            other => SyncError::Store(other),
        }
    }
}

impl SyncError {
    /// Machine-readable code returned to clients
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::HistoryUnavailable { .. } => "HISTORY_UNAVAILABLE",
            SyncError::Invalidated => "INVALIDATED",
            SyncError::VersionOutOfRange { .. } => "VERSION_OUT_OF_RANGE",
            SyncError::InvalidSteps(_) => "INVALID_STEPS",
            SyncError::NotFound => "NOT_FOUND",
            SyncError::AlreadyExists => "ALREADY_EXISTS",
            SyncError::Store(_) => "STORE_UNAVAILABLE",
            SyncError::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            SyncError::VersionOutOfRange { .. } => 400,
            SyncError::InvalidSteps(_) => 400,
            SyncError::NotFound => 404,
            SyncError::Invalidated => 409,
            SyncError::AlreadyExists => 409,
            SyncError::HistoryUnavailable { .. } => 410,
            SyncError::Internal(_) => 500,
            SyncError::Store(_) => 503,
        }
    }

    /// Whether the client should drop its state and fetch a fresh snapshot
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            SyncError::HistoryUnavailable { .. } | SyncError::Invalidated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(SyncError::Invalidated.status_code(), 409);
        assert_eq!(
            SyncError::HistoryUnavailable { requested: 1, oldest: 2 }.status_code(),
            410
        );
        assert_eq!(SyncError::InvalidSteps("empty".into()).status_code(), 400);
        assert_eq!(
            SyncError::Store(StoreError::Unavailable("down".into())).status_code(),
            503
        );
    }

    #[test]
    fn test_store_error_conversion() {
        assert_eq!(SyncError::from(StoreError::NotFound), SyncError::NotFound);
        assert!(matches!(
            SyncError::from(StoreError::Unavailable("x".into())),
            SyncError::Store(_)
        ));
    }

    #[test]
    fn test_resync_signals() {
        assert!(SyncError::Invalidated.requires_resync());
        assert!(!SyncError::NotFound.requires_resync());
    }
}
