//! Executes the searches of one route/date on one profile.

use crate::error::{SearchError, TaskFailure};
use crate::profile::BrowserProfile;
use crate::summary::ResponseSummary;
use crate::transport::{SearchQuery, SearchTransport};
use farescout_core::{RetryConfig, SearchType};
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Successful result of one search type.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub search_type: SearchType,
    pub summary: ResponseSummary,
    /// Attempts used by the final resilient call
    pub attempts: u32,
    /// Raw response body, handed on to the result sink
    pub body: Value,
}

/// Runs searches through a profile's credentials and resilience guards.
pub struct RequestExecutor {
    transport: Arc<dyn SearchTransport>,
    max_auth_retries: u32,
    max_circuit_waits: u32,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn SearchTransport>, retry: &RetryConfig) -> Self {
        Self {
            transport,
            max_auth_retries: retry.max_auth_retries,
            max_circuit_waits: retry.max_circuit_waits,
        }
    }

    /// Run every requested search type for `query`, concurrently.
    ///
    /// Succeeds only when all search types succeed; otherwise the failure of
    /// the first failing type (in request order) is returned.
    pub async fn execute(
        &self,
        profile: &BrowserProfile,
        query: &SearchQuery,
        search_types: &[SearchType],
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchOutcome>, TaskFailure> {
        let results = join_all(
            search_types
                .iter()
                .map(|&search_type| self.search(profile, search_type, query, cancel)),
        )
        .await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (&search_type, result) in search_types.iter().zip(results) {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(error) => return Err(TaskFailure { search_type, error }),
            }
        }
        Ok(outcomes)
    }

    /// Run one search type, replacing rejected credentials and waiting out
    /// an open circuit within the configured budgets.
    pub async fn search(
        &self,
        profile: &BrowserProfile,
        search_type: SearchType,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, SearchError> {
        let guard = profile.guard(search_type);
        let mut auth_retries = 0;
        let mut circuit_waits = 0;

        loop {
            let credentials = profile.acquire_credentials(cancel).await?;

            let transport = &self.transport;
            let bundle = credentials.as_ref();
            let result = guard
                .call(cancel, move || {
                    profile.record_request();
                    transport.search(search_type, query, bundle)
                })
                .await;

            let err = match result {
                Ok((response, attempts)) => {
                    let summary = ResponseSummary::from_response(&response);
                    tracing::debug!(
                        profile = profile.id(),
                        route = %query,
                        attempts,
                        "{} search returned {} slices",
                        search_type,
                        summary.slices
                    );
                    return Ok(SearchOutcome {
                        search_type,
                        summary,
                        attempts,
                        body: response.body,
                    });
                }
                Err(err) => err,
            };

            if err.is_auth() {
                profile.credentials().mark_invalid(&credentials);
                if auth_retries >= self.max_auth_retries {
                    return Err(err);
                }
                auth_retries += 1;
                tracing::warn!(
                    profile = profile.id(),
                    route = %query,
                    "{} search rejected ({}), retrying with fresh credentials",
                    search_type,
                    err
                );
                continue;
            }

            match err {
                SearchError::CircuitOpen {
                    retry_in,
                    trial_pending,
                } if trial_pending || circuit_waits < self.max_circuit_waits => {
                    // Waiting on another caller's trial does not spend the budget;
                    // only a full cooldown does.
                    if trial_pending {
                        tracing::debug!(
                            profile = profile.id(),
                            route = %query,
                            "{} circuit trial in progress, checking again in {}s",
                            search_type,
                            retry_in.as_secs()
                        );
                    } else {
                        circuit_waits += 1;
                        tracing::warn!(
                            profile = profile.id(),
                            route = %query,
                            "{} circuit open, waiting {}s",
                            search_type,
                            retry_in.as_secs()
                        );
                    }
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(SearchError::Cancelled),
                        () = tokio::time::sleep(retry_in) => {}
                    }
                }
                err => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialSettings, CredentialStore};
    use crate::transport::{HttpError, RawResponse};
    use async_trait::async_trait;
    use farescout_browser::{CredentialBundle, CredentialExtractor, ExtractRequest, ExtractionError};
    use farescout_core::{AirportCode, AppConfig, CabinClass, TravelDate};
    use serde_json::json;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct SequenceExtractor {
        calls: AtomicU64,
    }

    #[async_trait]
    impl CredentialExtractor for SequenceExtractor {
        async fn extract(
            &self,
            _request: &ExtractRequest,
        ) -> Result<CredentialBundle, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CredentialBundle::new(
                BTreeMap::new(),
                BTreeMap::new(),
                "https://www.aa.com/",
                "UA/1.0",
            ))
        }
    }

    /// Replays scripted responses and records which bundle each call used.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<RawResponse, HttpError>>>,
        seen: Mutex<Vec<Uuid>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<RawResponse, HttpError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SearchTransport for ScriptedTransport {
        async fn search(
            &self,
            _search_type: SearchType,
            _query: &SearchQuery,
            credentials: &CredentialBundle,
        ) -> Result<RawResponse, HttpError> {
            self.seen.lock().unwrap().push(credentials.id);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ok_response()))
        }
    }

    fn ok_response() -> RawResponse {
        RawResponse {
            status: 200,
            body: json!({ "slices": [{ "stops": 0 }] }),
            bytes: 26,
            elapsed: Duration::from_millis(100),
        }
    }

    fn query() -> SearchQuery {
        SearchQuery {
            origin: AirportCode::new("LAX").unwrap(),
            destination: AirportCode::new("JFK").unwrap(),
            date: TravelDate::parse("2025-12-15").unwrap(),
            passengers: 1,
            cabin: CabinClass::Coach,
        }
    }

    fn profile(extractor: Arc<SequenceExtractor>) -> BrowserProfile {
        let mut config = AppConfig::default();
        config.limiter.capacity = 10;
        config.limiter.base_rate = 100.0;
        let settings = CredentialSettings {
            request: ExtractRequest {
                target_url: "https://www.aa.com/booking/search".to_string(),
                wait_budget: Duration::from_secs(1),
                headless: true,
            },
            ttl: config.credentials.ttl(),
            soft_refresh: config.credentials.soft_refresh_after(),
            cache_path: None,
        };
        BrowserProfile::new(0, CredentialStore::new(0, extractor, settings), &config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_search_types_succeed() {
        let extractor = Arc::new(SequenceExtractor::default());
        let profile = profile(Arc::clone(&extractor));
        let executor = RequestExecutor::new(
            Arc::new(ScriptedTransport::new(Vec::new())),
            &RetryConfig::default(),
        );

        let outcomes = executor
            .execute(&profile, &query(), &SearchType::ALL, &CancellationToken::new())
            .await
            .unwrap();

        let types: Vec<_> = outcomes.iter().map(|o| o.search_type).collect();
        assert_eq!(types, vec![SearchType::Award, SearchType::Revenue]);
        assert!(outcomes.iter().all(|o| o.summary.slices == 1));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(profile.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_refreshes_credentials() {
        let extractor = Arc::new(SequenceExtractor::default());
        let profile = profile(Arc::clone(&extractor));
        let transport = Arc::new(ScriptedTransport::new(vec![Err(HttpError::status(403))]));
        let executor = RequestExecutor::new(transport.clone(), &RetryConfig::default());

        let outcome = executor
            .search(&profile, SearchType::Award, &query(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_retry_budget_exhausted() {
        let extractor = Arc::new(SequenceExtractor::default());
        let profile = profile(Arc::clone(&extractor));
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(HttpError::status(403)),
            Err(HttpError::status(401)),
        ]));
        let executor = RequestExecutor::new(transport, &RetryConfig::default());

        let err = executor
            .search(&profile, SearchType::Revenue, &query(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SearchError::CredentialExpired(_)));
        assert!(profile.credentials().current().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_tagged_with_search_type() {
        let profile = profile(Arc::new(SequenceExtractor::default()));
        let executor = RequestExecutor::new(
            Arc::new(ScriptedTransport::new(vec![Err(HttpError::status(400))])),
            &RetryConfig::default(),
        );

        let failure = executor
            .execute(&profile, &query(), &[SearchType::Award], &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.search_type, SearchType::Award);
        assert_eq!(failure.error, SearchError::Fatal("HTTP 400".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_open_waited_out_once() {
        let profile = profile(Arc::new(SequenceExtractor::default()));
        let script = (0..3).map(|_| Err(HttpError::status(503))).collect();
        let transport = Arc::new(ScriptedTransport::new(script));
        let executor = RequestExecutor::new(transport.clone(), &RetryConfig::default());

        // Three 503s trip the breaker; after the cooldown the trial succeeds
        let started = tokio::time::Instant::now();
        let outcome = executor
            .search(&profile, SearchType::Award, &query(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert!(started.elapsed() >= Duration::from_secs(300));
        assert_eq!(transport.seen.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let profile = profile(Arc::new(SequenceExtractor::default()));
        let executor = RequestExecutor::new(
            Arc::new(ScriptedTransport::new(Vec::new())),
            &RetryConfig::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = executor
            .search(&profile, SearchType::Award, &query(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, SearchError::Cancelled);
    }
}
