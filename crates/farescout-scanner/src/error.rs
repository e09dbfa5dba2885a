//! Error types for search execution and bulk runs.

use farescout_browser::ExtractionError;
use farescout_core::{FarescoutError, SearchType};
use std::time::Duration;
use thiserror::Error;

/// Errors that abort a whole operation (invalid requests, setup failures).
///
/// Failures of individual searches never surface here; they are recorded on
/// the owning task as a [`SearchError`].
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid bulk request: {0}")]
    InvalidRequest(String),

    #[error("no browser profile could be initialized: {0}")]
    ProfilesUnavailable(String),

    #[error("credential extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] FarescoutError),
}

pub type Result<T> = std::result::Result<T, ScanError>;

/// Terminal failure of one search call.
///
/// Shared between the retry layer, the executor and task outcomes, so it is
/// `Clone` and carries rendered messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    /// Session credentials could not be obtained
    #[error("credential extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// The endpoint's circuit breaker rejected the call
    #[error("circuit open, retry in {}s", .retry_in.as_secs())]
    CircuitOpen {
        retry_in: Duration,
        /// Another call holds the half-open trial
        trial_pending: bool,
    },

    /// HTTP 429 after all attempts
    #[error("rate limited by target (HTTP 429)")]
    Throttled { retry_after: Option<Duration> },

    /// HTTP 403/451 or a block page
    #[error("authorization failure: {0}")]
    AuthFailure(String),

    /// HTTP 401, the session is no longer accepted
    #[error("credentials expired: {0}")]
    CredentialExpired(String),

    /// Timeout, connection failure or 5xx after all attempts
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// Non-retryable request failure (other 4xx, malformed response)
    #[error("request failed: {0}")]
    Fatal(String),

    /// The run was cancelled before the search finished
    #[error("cancelled")]
    Cancelled,

    /// The task stopped abnormally (a panic or an aborted task)
    #[error("task crashed: {0}")]
    Crashed(String),
}

impl SearchError {
    /// Whether the error means the credentials in use should be replaced.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthFailure(_) | Self::CredentialExpired(_))
    }
}

/// A search failure tagged with the search type that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{search_type} search failed: {error}")]
pub struct TaskFailure {
    pub search_type: SearchType,
    pub error: SearchError,
}
