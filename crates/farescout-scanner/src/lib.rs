//! Farescout Scanner - Resilient concurrent flight search orchestration.
//!
//! This crate runs many authenticated, rate-limited searches against the
//! fare search API and keeps succeeding through transient failures,
//! credential expiry and active blocking.
//!
//! # Features
//!
//! - Per-profile credential store with single-flight refresh
//! - Circuit breakers with a single half-open trial call
//! - AIMD token-bucket rate limiting that honors `Retry-After`
//! - Retry with exponential backoff and full jitter
//! - Bounded-concurrency bulk runs with per-task failure isolation
//!
//! # Example
//!
//! ```rust,ignore
//! use farescout_scanner::{BulkOrchestrator, BulkRequest, ProfilePool, RequestExecutor};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(ProfilePool::from_config(&config, 1, |_| extractor.clone())?);
//! let cancel = CancellationToken::new();
//! pool.warm_up(&cancel).await?;
//!
//! let executor = Arc::new(RequestExecutor::new(transport, &config.retry));
//! let orchestrator = BulkOrchestrator::new(pool, executor);
//! let result = orchestrator.run(&request, cancel).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[allow(missing_docs)]
pub mod breaker;
#[allow(missing_docs)]
pub mod credentials;
pub mod error;
#[allow(missing_docs)]
pub mod executor;
#[allow(missing_docs)]
pub mod http;
#[allow(missing_docs)]
pub mod limiter;
pub mod orchestrator;
#[allow(missing_docs)]
pub mod payload;
#[allow(missing_docs)]
pub mod profile;
#[allow(missing_docs)]
pub mod retry;
#[allow(missing_docs)]
pub mod sink;
#[allow(missing_docs)]
pub mod summary;
#[allow(missing_docs)]
pub mod task;
#[allow(missing_docs)]
pub mod transport;

// Re-export commonly used types
pub use breaker::{BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitOpen, CircuitState};
pub use credentials::{CredentialSettings, CredentialStore};
pub use error::{Result, ScanError, SearchError, TaskFailure};
pub use executor::{RequestExecutor, SearchOutcome};
pub use http::ReqwestTransport;
pub use limiter::{AdaptiveRateLimiter, LimiterSignal, LimiterSnapshot};
pub use orchestrator::{BulkOrchestrator, ProgressSnapshot, RunProgress};
pub use profile::{BrowserProfile, ExtractionRetry, ProfilePool};
pub use retry::{ResilienceGuard, RetryPolicy};
pub use sink::{JsonFileSink, ResultSink};
pub use summary::ResponseSummary;
pub use task::{BulkRequest, BulkResult, RouteDateTask, TaskOutcome, TaskStatus};
pub use transport::{ErrorClass, HttpError, HttpErrorKind, RawResponse, SearchQuery, SearchTransport};
