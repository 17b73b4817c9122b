//! HTTP error mapping
//!
//! Every failure leaves as `{"error": message, "code": CODE}` with the status
//! the originating error type assigns.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::session::SessionError;
use crate::sync::SyncError;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Errors a handler can return
#[derive(Debug)]
pub enum ApiError {
    Sync(SyncError),
    Session(SessionError),
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        let code = match self {
            ApiError::Sync(err) => err.status_code(),
            ApiError::Session(err) => err.status_code(),
            ApiError::BadRequest(_) => 400,
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Sync(err) => err.code(),
            ApiError::Session(err) => err.code(),
            ApiError::BadRequest(_) => "BAD_REQUEST",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Sync(err) => err.to_string(),
            ApiError::Session(err) => err.to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError::Sync(err)
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::Session(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message(),
            code: self.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(SyncError::Invalidated).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::from(SyncError::Invalidated).code(), "INVALIDATED");
        assert_eq!(
            ApiError::from(SessionError::Unauthenticated).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(SyncError::HistoryUnavailable { requested: 1, oldest: 2 }).status(),
            StatusCode::GONE
        );
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
    }
}
