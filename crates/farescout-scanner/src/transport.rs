//! Search transport abstraction and failure classification.

use crate::error::SearchError;
use farescout_browser::CredentialBundle;
use farescout_core::{AirportCode, CabinClass, SearchType, TravelDate};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// One route/date query, independent of search type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub origin: AirportCode,
    pub destination: AirportCode,
    pub date: TravelDate,
    pub passengers: u32,
    pub cabin: CabinClass,
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} {}", self.origin, self.destination, self.date)
    }
}

/// A successful, structurally valid search response.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: serde_json::Value,
    /// Size of the response body on the wire
    pub bytes: usize,
    pub elapsed: Duration,
}

/// What went wrong with a transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    /// Non-success HTTP status
    Status(u16),
    /// HTML block or challenge page instead of JSON
    BlockPage,
    Timeout,
    /// Connection, TLS or protocol failure before a status was received
    Network,
    /// Body was not the expected JSON shape
    Malformed,
}

/// Failure reported by a [`SearchTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub kind: HttpErrorKind,
    /// Server-requested delay, from `Retry-After`
    pub retry_after: Option<Duration>,
    pub message: String,
}

impl HttpError {
    pub fn new(kind: HttpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retry_after: None,
            message: message.into(),
        }
    }

    pub fn status(code: u16) -> Self {
        Self::new(HttpErrorKind::Status(code), format!("HTTP {code}"))
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            HttpErrorKind::Timeout,
            format!("no response within {}s", after.as_secs_f64()),
        )
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Map the failure onto the retry taxonomy.
    pub fn classify(&self) -> ErrorClass {
        match self.kind {
            HttpErrorKind::Status(429) => ErrorClass::Throttled {
                retry_after: self.retry_after,
            },
            HttpErrorKind::Status(403 | 451) | HttpErrorKind::BlockPage => ErrorClass::AuthFailure,
            HttpErrorKind::Status(401) => ErrorClass::CredentialExpired,
            HttpErrorKind::Status(500..=599) | HttpErrorKind::Timeout | HttpErrorKind::Network => {
                ErrorClass::Transient
            }
            HttpErrorKind::Status(_) | HttpErrorKind::Malformed => ErrorClass::Fatal,
        }
    }

    /// Convert into the terminal error surfaced to callers.
    pub fn into_search_error(self) -> SearchError {
        match self.classify() {
            ErrorClass::Throttled { retry_after } => SearchError::Throttled { retry_after },
            ErrorClass::AuthFailure => SearchError::AuthFailure(self.message),
            ErrorClass::CredentialExpired => SearchError::CredentialExpired(self.message),
            ErrorClass::Transient => SearchError::Transient(self.message),
            ErrorClass::Fatal => SearchError::Fatal(self.message),
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Retry classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Throttled { retry_after: Option<Duration> },
    AuthFailure,
    CredentialExpired,
    Transient,
    Fatal,
}

impl ErrorClass {
    /// Whether the same call may be retried with the same credentials.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Transient)
    }
}

/// Sends search requests to the target API.
#[async_trait::async_trait]
pub trait SearchTransport: Send + Sync {
    /// Run one search with the given credentials.
    async fn search(
        &self,
        search_type: SearchType,
        query: &SearchQuery,
        credentials: &CredentialBundle,
    ) -> Result<RawResponse, HttpError>;
}
