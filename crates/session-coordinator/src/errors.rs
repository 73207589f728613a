//! Session coordinator error types.
//!
//! Every error maps to a stable string code and an HTTP status via the
//! `IntoResponse` impl. Messages returned to clients are generic for
//! internal failures; the details are logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Session coordinator error type.
///
/// Maps to HTTP status codes:
/// - `InvalidToken`: 401 Unauthorized
/// - `AccessDenied`, `MeetingFull`: 403 Forbidden
/// - `MeetingNotFound`, `ParticipantNotFound`: 404 Not Found
/// - `PeerIdInUse`: 409 Conflict
/// - `RateLimited`: 429 Too Many Requests
/// - `BadRequest`: 400 Bad Request
/// - `Unavailable`: 503 Service Unavailable
/// - `Storage`, `Internal`: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum SessionError {
    /// Token missing, malformed, expired, or signed with the wrong key.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Private meeting and the requester is not its creator.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The room already holds the meeting's capacity.
    #[error("Meeting full: {0}")]
    MeetingFull(String),

    /// Meeting does not exist or is no longer active.
    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Another live connection in the room already uses this peer id.
    #[error("Peer id in use: {0}")]
    PeerIdInUse(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The client address exceeded its per-minute request quota.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Storage collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The hub is gone (shutting down).
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Returns the stable error code sent to clients.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            SessionError::InvalidToken(_) => "INVALID_TOKEN",
            SessionError::AccessDenied(_) => "ACCESS_DENIED",
            SessionError::MeetingFull(_) => "MEETING_FULL",
            SessionError::MeetingNotFound(_) | SessionError::ParticipantNotFound(_) => {
                "NOT_FOUND"
            }
            SessionError::PeerIdInUse(_) => "PEER_ID_IN_USE",
            SessionError::BadRequest(_) => "BAD_REQUEST",
            SessionError::RateLimited(_) => "RATE_LIMITED",
            SessionError::Storage(_) => "STORAGE_ERROR",
            SessionError::Unavailable(_) => "SERVICE_UNAVAILABLE",
            SessionError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            SessionError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            SessionError::AccessDenied(_) | SessionError::MeetingFull(_) => StatusCode::FORBIDDEN,
            SessionError::MeetingNotFound(_) | SessionError::ParticipantNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SessionError::PeerIdInUse(_) => StatusCode::CONFLICT,
            SessionError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SessionError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            SessionError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::Storage(_) | SessionError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SessionError::InvalidToken(_) => "The access token is invalid or expired".to_string(),
            SessionError::AccessDenied(_) => {
                "You do not have access to this meeting".to_string()
            }
            SessionError::MeetingFull(_) => "Meeting is full".to_string(),
            SessionError::MeetingNotFound(_) => "Meeting not found".to_string(),
            SessionError::ParticipantNotFound(_) => "Participant not found".to_string(),
            SessionError::PeerIdInUse(_) => {
                "Peer id is already in use in this meeting".to_string()
            }
            SessionError::BadRequest(reason) => reason.clone(),
            SessionError::RateLimited(_) => "Rate limit exceeded".to_string(),
            SessionError::Unavailable(_) => "Service temporarily unavailable".to_string(),
            SessionError::Storage(_) | SessionError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// Short label for join rejection metrics. Bounded cardinality.
    #[must_use]
    pub fn rejection_reason(&self) -> &'static str {
        match self {
            SessionError::InvalidToken(_) => "invalid_token",
            SessionError::AccessDenied(_) => "access_denied",
            SessionError::MeetingFull(_) => "meeting_full",
            SessionError::MeetingNotFound(_) => "meeting_not_found",
            SessionError::PeerIdInUse(_) => "peer_id_in_use",
            SessionError::BadRequest(_) => "bad_request",
            SessionError::RateLimited(_) => "rate_limited",
            SessionError::ParticipantNotFound(_)
            | SessionError::Storage(_)
            | SessionError::Unavailable(_)
            | SessionError::Internal(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        match &self {
            SessionError::Storage(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "sc.storage", error = %err, "Storage operation failed");
            }
            SessionError::Internal(err) => {
                tracing::error!(target: "sc.handlers", error = %err, "Internal error");
            }
            SessionError::Unavailable(reason) => {
                tracing::warn!(target: "sc.availability", reason = %reason, "Service unavailable");
            }
            _ => {}
        }

        let status = self.status_code();
        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"session-coordinator\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

impl From<common::error::CommonError> for SessionError {
    fn from(err: common::error::CommonError) -> Self {
        SessionError::BadRequest(err.to_string())
    }
}
