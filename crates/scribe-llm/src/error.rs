//! Gateway error types for scribe-llm.
//!
//! All gateway and backend operations return [`Result<T>`] which uses
//! [`GatewayError`] as the error type.

use thiserror::Error;

/// Errors that can occur when calling a completion backend through the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The request to the backend failed for a reason not covered below.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The backend answered with a 5xx status.
    #[error("server error (HTTP {status}): {message}")]
    ServerError {
        /// HTTP status code returned by the backend.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// The backend reported that it is temporarily overloaded.
    #[error("backend overloaded: {0}")]
    Overloaded(String),

    /// Authentication with the backend was rejected (HTTP 401/403).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The backend returned a rate-limit response (HTTP 429).
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait time before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// The requested model does not exist on the backend.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The request was rejected as malformed, either locally or by the backend.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The backend has not been configured (e.g. missing API key).
    #[error("backend not configured: {0}")]
    NotConfigured(String),

    /// The backend returned a response that could not be used.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A streaming session failed after it was opened.
    #[error("stream error: {0}")]
    Stream(String),

    /// The request timed out.
    #[error("timeout")]
    Timeout,

    /// No admission slot became free within the configured wait.
    #[error("capacity exceeded: {limit} requests in flight, waited {waited_ms}ms")]
    CapacityExceeded {
        /// The configured in-flight limit.
        limit: usize,
        /// How long the caller waited before giving up.
        waited_ms: u64,
    },

    /// The caller cancelled the operation.
    #[error("cancelled")]
    Cancelled,

    /// The gateway was shut down while the request was waiting.
    #[error("gateway shut down")]
    Shutdown,

    /// An HTTP-level error from reqwest.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Whether an error may go away if the same request is issued again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network, timeout, overload or rate-limit failures.
    Transient,
    /// Validation, authorization and local failures.
    Terminal,
}

impl GatewayError {
    /// Classify this error as transient or terminal.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::ServerError { .. }
            | GatewayError::Overloaded(_)
            | GatewayError::RateLimited { .. }
            | GatewayError::Stream(_)
            | GatewayError::Timeout
            | GatewayError::Http(_) => ErrorKind::Transient,
            GatewayError::RequestFailed(_)
            | GatewayError::AuthFailed(_)
            | GatewayError::ModelNotFound(_)
            | GatewayError::InvalidRequest(_)
            | GatewayError::NotConfigured(_)
            | GatewayError::InvalidResponse(_)
            | GatewayError::CapacityExceeded { .. }
            | GatewayError::Cancelled
            | GatewayError::Shutdown
            | GatewayError::Json(_) => ErrorKind::Terminal,
        }
    }
}

/// A convenience type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
