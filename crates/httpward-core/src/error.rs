//! Client-level error types.

use http::StatusCode;
use thiserror::Error;

use crate::request::Response;

/// Errors that can occur while executing a request through a composed client.
///
/// `Clone` so a single settled outcome can be handed to every caller that
/// joined a deduplicated request.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// The transport never produced a response (connection refused, reset, DNS, ...).
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP {status} for {method} {url}")]
    Status {
        status: StatusCode,
        method: http::Method,
        url: String,
        response: Box<Response>,
    },

    /// A single attempt exceeded the configured timeout.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Circuit breaker is open for this scope.
    #[error("Circuit breaker open for scope: {scope}")]
    CircuitOpen { scope: String },

    /// Response body exceeded the size guard.
    #[error("Response body exceeds limit of {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Caller-supplied validation rejected the decoded body.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// URL could not be built or parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Header name or value was rejected.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// A lifecycle hook or callback failed.
    #[error("Hook error: {0}")]
    Hook(String),

    /// No transport was configured before the client was built.
    #[error("No transport configured")]
    NoTransport,

    /// The transport could not be built from its configuration (bad proxy
    /// URL, unreadable TLS material). Fails every call the same way.
    #[error("Transport setup failed: {0}")]
    Setup(String),
}

impl HttpError {
    /// Returns `true` if the call never produced a response (transient).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns the HTTP status if this error carries a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the response attached to a status error.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Status { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Returns `true` if the error was produced locally by a policy or by
    /// transport setup rather than by the network or the server.
    pub fn is_policy_error(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. }
                | Self::BodyTooLarge { .. }
                | Self::Validation(_)
                | Self::Setup(_)
        )
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<url::ParseError> for HttpError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for HttpError {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(e.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for HttpError {
    fn from(e: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HttpError>;
