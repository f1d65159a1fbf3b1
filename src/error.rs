//! Error taxonomy for the session hub.
//!
//! Every variant here is a row of the error table: it names a distinct
//! wire event / HTTP status and carries just enough context to build that
//! event. Fatal internal errors are represented separately (see
//! [`HubError::Internal`]) and are expected to fail the process, never be
//! swallowed.

use thiserror::Error;

/// Top-level error union for the session hub.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid token")]
    InvalidToken,

    #[error("guest denied")]
    GuestDenied,

    #[error("invalid invite key")]
    InvalidInvite,

    #[error("session is full")]
    SessionFull,

    #[error("access denied")]
    AccessDenied,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("execution timed out")]
    ExecutionTimeout,

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("rate limited")]
    RateLimited,

    #[error("session was deleted")]
    SessionDeleted,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias used throughout the hub.
pub type HubResult<T> = Result<T, HubError>;

impl HubError {
    /// The wire event name a sender should receive for this error, matching
    /// the event catalogue's error-reply conventions.
    pub fn wire_event(&self) -> &'static str {
        match self {
            HubError::InvalidToken => "connection_error",
            HubError::GuestDenied | HubError::InvalidInvite | HubError::SessionFull => {
                "session_error"
            }
            HubError::AccessDenied | HubError::InvalidPayload(_) => "error",
            HubError::UnsupportedLanguage(_)
            | HubError::ExecutionTimeout
            | HubError::ExecutionFailed(_) => "execution_error",
            HubError::RateLimited => "connection_error",
            HubError::SessionDeleted => "session_deleted",
            HubError::NotFound(_) => "error",
            HubError::Serialization(_) | HubError::Io(_) | HubError::Internal(_) => "error",
        }
    }

    /// Machine-readable error code embedded in the wire event body.
    pub fn code(&self) -> &'static str {
        match self {
            HubError::InvalidToken => "invalid_token",
            HubError::GuestDenied => "guest_denied",
            HubError::InvalidInvite => "invalid_invite",
            HubError::SessionFull => "session_full",
            HubError::AccessDenied => "access_denied",
            HubError::InvalidPayload(_) => "invalid_payload",
            HubError::UnsupportedLanguage(_) => "unsupported_language",
            HubError::ExecutionTimeout => "timeout",
            HubError::ExecutionFailed(_) => "failed",
            HubError::RateLimited => "rate_limited",
            HubError::SessionDeleted => "session_deleted",
            HubError::NotFound(_) => "not_found",
            HubError::Serialization(_) | HubError::Io(_) | HubError::Internal(_) => "internal",
        }
    }

    /// HTTP status for REST-surface callers (C1 failures are 401, the rest 4xx/5xx).
    pub fn http_status(&self) -> u16 {
        match self {
            HubError::InvalidToken => 401,
            HubError::AccessDenied | HubError::GuestDenied => 403,
            HubError::InvalidInvite | HubError::NotFound(_) => 404,
            HubError::SessionFull | HubError::InvalidPayload(_) | HubError::UnsupportedLanguage(_) => {
                422
            }
            HubError::RateLimited => 429,
            HubError::ExecutionTimeout => 504,
            HubError::ExecutionFailed(_) => 502,
            HubError::SessionDeleted => 410,
            HubError::Serialization(_) | HubError::Io(_) | HubError::Internal(_) => 500,
        }
    }
}
