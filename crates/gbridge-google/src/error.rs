//! Error types for Google API access, authorization and contact sync.

use std::fmt;
use std::time::Duration;

use gbridge_core::{ContactSource, StoreError};
use thiserror::Error;

/// Classification of a failed Google API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoogleErrorCode {
    /// 401: the token was rejected.
    Authentication,
    /// 403: the token lacks a scope, or the admin disabled the API.
    Authorization,
    Network,
    /// 429
    RateLimited,
    /// 5xx
    Server,
    InvalidResponse,
    NotFound,
    BadRequest,
    /// 410: a sync cursor is no longer accepted.
    Gone,
    Configuration,
    Internal,
}

impl GoogleErrorCode {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimited | Self::Server)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication_failed",
            Self::Authorization => "authorization_failed",
            Self::Network => "network_error",
            Self::RateLimited => "rate_limited",
            Self::Server => "server_error",
            Self::InvalidResponse => "invalid_response",
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::Gone => "gone",
            Self::Configuration => "configuration_error",
            Self::Internal => "internal_error",
        }
    }

    /// Maps a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Authentication,
            403 => Self::Authorization,
            404 => Self::NotFound,
            410 => Self::Gone,
            429 => Self::RateLimited,
            500..=599 => Self::Server,
            _ => Self::InvalidResponse,
        }
    }
}

impl fmt::Display for GoogleErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed Google API call.
#[derive(Debug, Error)]
pub struct GoogleError {
    code: GoogleErrorCode,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl GoogleError {
    pub fn new(code: GoogleErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Builds the error for a non-success response, keeping Google's own
    /// error message when the body carries one.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| body.chars().take(200).collect());
        Self::new(
            GoogleErrorCode::from_status(status),
            format!("HTTP {status}: {message}"),
        )
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GoogleErrorCode::Network, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(GoogleErrorCode::InvalidResponse, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(GoogleErrorCode::Authentication, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(GoogleErrorCode::Configuration, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(GoogleErrorCode::Internal, message)
    }

    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> GoogleErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl fmt::Display for GoogleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<AuthError> for GoogleError {
    fn from(err: AuthError) -> Self {
        Self::authentication(err.to_string())
    }
}

pub type GoogleResult<T> = Result<T, GoogleError>;

/// Why an authorization attempt failed.
///
/// Cloneable so every caller coalesced onto one attempt receives it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authorization was cancelled")]
    Cancelled,

    /// Google answered with an `error` parameter, e.g. `access_denied` or
    /// `interaction_required` for a silent attempt.
    #[error("authorization denied: {0}")]
    Denied(String),

    #[error("malformed redirect: {0}")]
    InvalidRedirect(String),

    #[error("redirect state does not match the request")]
    StateMismatch,

    #[error("no redirect within {0:?}")]
    Timeout(Duration),

    #[error("could not launch the authorization flow: {0}")]
    Launcher(String),

    #[error("could not persist the token: {0}")]
    Store(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

/// A contact sync attempt that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("{source_type} pull failed: {code}: {message}")]
    Api {
        source_type: ContactSource,
        code: GoogleErrorCode,
        message: String,
    },

    /// The stored cursor was rejected. It has been dropped, so the next
    /// sync performs a full pull.
    #[error("{0} sync cursor expired")]
    CursorExpired(ContactSource),

    #[error("store error during {source_type} sync: {message}")]
    Store {
        source_type: ContactSource,
        message: String,
    },
}

impl SyncError {
    pub(crate) fn api(source_type: ContactSource, err: &GoogleError) -> Self {
        Self::Api {
            source_type,
            code: err.code(),
            message: err.message().to_string(),
        }
    }

    pub(crate) fn store(source_type: ContactSource, err: &StoreError) -> Self {
        Self::Store {
            source_type,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(GoogleErrorCode::from_status(401), GoogleErrorCode::Authentication);
        assert_eq!(GoogleErrorCode::from_status(410), GoogleErrorCode::Gone);
        assert_eq!(GoogleErrorCode::from_status(503), GoogleErrorCode::Server);
        assert_eq!(GoogleErrorCode::from_status(418), GoogleErrorCode::InvalidResponse);
    }

    #[test]
    fn retryable_codes() {
        assert!(GoogleErrorCode::RateLimited.is_retryable());
        assert!(GoogleErrorCode::Server.is_retryable());
        assert!(!GoogleErrorCode::Gone.is_retryable());
        assert!(!GoogleErrorCode::Authentication.is_retryable());
    }

    #[test]
    fn from_status_prefers_google_message() {
        let body = r#"{"error": {"code": 403, "message": "Not Authorized to access this resource/api"}}"#;
        let err = GoogleError::from_status(403, body);
        assert_eq!(err.code(), GoogleErrorCode::Authorization);
        assert_eq!(
            err.message(),
            "HTTP 403: Not Authorized to access this resource/api"
        );

        let err = GoogleError::from_status(502, "bad gateway");
        assert_eq!(err.to_string(), "server_error: HTTP 502: bad gateway");
    }

    #[test]
    fn sync_error_display() {
        let err = SyncError::CursorExpired(ContactSource::Personal);
        assert_eq!(err.to_string(), "personal sync cursor expired");
    }
}
