//! # Session Errors

use thiserror::Error;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Credential resolution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Credential missing, unknown or revoked
    #[error("Authentication required")]
    Unauthenticated,

    /// The identity backend could not answer
    #[error("Identity resolver failed: {0}")]
    Resolver(String),
}

impl SessionError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            SessionError::Unauthenticated => 401,
            SessionError::Resolver(_) => 503,
        }
    }

    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Unauthenticated => "UNAUTHENTICATED",
            SessionError::Resolver(_) => "IDENTITY_UNAVAILABLE",
        }
    }
}
