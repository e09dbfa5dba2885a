//! Browser profiles and the pool tasks are distributed over.
//!
//! Each profile owns an independent credential store, rate limiter and set of
//! circuit breakers, so its traffic looks like a single browser's. Profiles
//! never share mutable state with each other.

use crate::breaker::CircuitBreaker;
use crate::credentials::{cache_file, CredentialSettings, CredentialStore};
use crate::error::{Result, ScanError, SearchError};
use crate::limiter::AdaptiveRateLimiter;
use crate::retry::{ResilienceGuard, RetryPolicy};
use farescout_browser::target::build_warmup_url;
use farescout_browser::{CredentialBundle, CredentialExtractor, ExtractRequest, ExtractionError};
use farescout_core::{
    AppConfig, BreakerGranularity, CredentialConfig, FarescoutError, SearchType, TravelDate,
};
use futures::future::join_all;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempt budget and delays for credential extraction.
///
/// Bot-defense rejections (challenge pages, blocks) back off exponentially
/// with ±25% jitter; any other failure waits a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionRetry {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_delay: Duration,
}

impl ExtractionRetry {
    pub fn from_config(config: &CredentialConfig) -> Self {
        Self {
            max_attempts: config.extraction_attempts.max(1),
            base_delay: config.extraction_backoff(),
            max_delay: config.extraction_max_backoff(),
            retry_delay: config.extraction_retry_delay(),
        }
    }

    /// Delay after failed attempt `attempt` (0-based) ended with `error`.
    pub fn delay_with<R: Rng + ?Sized>(
        &self,
        error: &ExtractionError,
        attempt: u32,
        rng: &mut R,
    ) -> Duration {
        match error {
            ExtractionError::Challenge(_) | ExtractionError::Blocked(_) => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt.min(16)))
                .min(self.max_delay)
                .mul_f64(rng.gen_range(0.75..=1.25))
                .min(self.max_delay),
            _ => self.retry_delay,
        }
    }
}

impl Default for ExtractionRetry {
    fn default() -> Self {
        Self::from_config(&CredentialConfig::default())
    }
}

/// One credential profile with its own resilience state.
pub struct BrowserProfile {
    id: usize,
    credentials: CredentialStore,
    limiter: Arc<AdaptiveRateLimiter>,
    award: ResilienceGuard,
    revenue: ResilienceGuard,
    extraction: ExtractionRetry,
    requests: AtomicU64,
}

impl BrowserProfile {
    /// Build a profile's breakers and limiter from configuration.
    pub fn new(id: usize, credentials: CredentialStore, config: &AppConfig) -> Self {
        let limiter = Arc::new(AdaptiveRateLimiter::new(
            format!("profile-{id}"),
            &config.limiter,
        ));
        let policy = RetryPolicy::from_config(&config.retry);
        let timeout = config.bulk.request_timeout();

        let breaker = |name: &str| {
            Arc::new(CircuitBreaker::new(
                format!("profile-{id}/{name}"),
                &config.breaker,
            ))
        };
        let (award_breaker, revenue_breaker) = match config.breaker.granularity {
            BreakerGranularity::Shared => {
                let shared = breaker("search");
                (Arc::clone(&shared), shared)
            }
            BreakerGranularity::PerSearchType => (breaker("award"), breaker("revenue")),
        };

        Self {
            id,
            credentials,
            award: ResilienceGuard::new(award_breaker, Arc::clone(&limiter), policy, timeout),
            revenue: ResilienceGuard::new(revenue_breaker, Arc::clone(&limiter), policy, timeout),
            limiter,
            extraction: ExtractionRetry::from_config(&config.credentials),
            requests: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn limiter(&self) -> &AdaptiveRateLimiter {
        &self.limiter
    }

    /// Get usable credentials, retrying failed extractions within the
    /// profile's extraction budget.
    ///
    /// Each attempt goes through the store's single-flight refresh, so
    /// concurrent callers still share one extraction per attempt.
    pub async fn acquire_credentials(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<Arc<CredentialBundle>, SearchError> {
        self.with_extraction_retry(cancel, || self.credentials.acquire())
            .await
    }

    /// Extract fresh credentials now, retrying within the extraction budget.
    pub async fn refresh_credentials(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<Arc<CredentialBundle>, SearchError> {
        self.with_extraction_retry(cancel, || self.credentials.force_refresh())
            .await
    }

    async fn with_extraction_retry<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut extract: F,
    ) -> std::result::Result<Arc<CredentialBundle>, SearchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<Arc<CredentialBundle>, ExtractionError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(SearchError::Cancelled),
                outcome = extract() => outcome,
            };
            let err = match outcome {
                Ok(bundle) => return Ok(bundle),
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= self.extraction.max_attempts {
                tracing::error!(
                    profile = self.id,
                    "Giving up on credentials after {} extraction attempt(s): {}",
                    attempt,
                    err
                );
                return Err(err.into());
            }

            let delay = self
                .extraction
                .delay_with(&err, attempt - 1, &mut rand::thread_rng());
            tracing::warn!(
                profile = self.id,
                attempt,
                "Extraction attempt {}/{} failed ({}), retrying in {:.1}s",
                attempt,
                self.extraction.max_attempts,
                err,
                delay.as_secs_f64()
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(SearchError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Resilience guard for one search endpoint.
    pub fn guard(&self, search_type: SearchType) -> &ResilienceGuard {
        match search_type {
            SearchType::Award => &self.award,
            SearchType::Revenue => &self.revenue,
        }
    }

    /// Count one outbound request.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Outbound requests sent through this profile.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Fixed set of profiles with round-robin assignment.
pub struct ProfilePool {
    profiles: Vec<Arc<BrowserProfile>>,
}

impl ProfilePool {
    pub fn new(profiles: Vec<Arc<BrowserProfile>>) -> Result<Self> {
        if profiles.is_empty() {
            return Err(ScanError::InvalidRequest(
                "at least one browser profile is required".to_string(),
            ));
        }
        Ok(Self { profiles })
    }

    /// Create `count` profiles, each with its own extractor from `make_extractor`.
    ///
    /// Credential stores warm up on the configured test route and cache their
    /// bundles under the configured cache directory, if any. The
    /// configuration is validated first.
    pub fn from_config<F>(config: &AppConfig, count: usize, mut make_extractor: F) -> Result<Self>
    where
        F: FnMut(usize) -> Arc<dyn CredentialExtractor>,
    {
        config.validate().map_err(FarescoutError::from)?;
        let creds = &config.credentials;
        let warmup_date = TravelDate::new(
            chrono::Local::now().date_naive()
                + chrono::Days::new(u64::from(creds.warmup_days_ahead)),
        );
        let target_url = build_warmup_url(
            &config.api.base_url,
            &creds.warmup_origin,
            &creds.warmup_destination,
            &warmup_date.to_string(),
        )
        .map_err(|e| ScanError::InvalidRequest(e.to_string()))?;

        let profiles = (0..count)
            .map(|id| {
                let settings = CredentialSettings {
                    request: ExtractRequest {
                        target_url: target_url.clone(),
                        wait_budget: creds.wait_budget(),
                        headless: creds.headless,
                    },
                    ttl: creds.ttl(),
                    soft_refresh: creds.soft_refresh_after(),
                    cache_path: creds.cache_dir.as_deref().map(|dir| cache_file(dir, id)),
                };
                let store = CredentialStore::new(id, make_extractor(id), settings);
                Arc::new(BrowserProfile::new(id, store, config))
            })
            .collect();

        Self::new(profiles)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn profiles(&self) -> &[Arc<BrowserProfile>] {
        &self.profiles
    }

    /// Profile for the task at `index` in expansion order.
    pub fn assign(&self, index: usize) -> Arc<BrowserProfile> {
        Arc::clone(&self.profiles[index % self.profiles.len()])
    }

    /// Extract fresh credentials on every profile concurrently, each within
    /// its extraction retry budget.
    ///
    /// Succeeds if at least one profile is ready and returns how many are.
    pub async fn warm_up(&self, cancel: &CancellationToken) -> Result<usize> {
        tracing::info!("Initializing {} browser profile(s)", self.profiles.len());

        let outcomes = join_all(
            self.profiles
                .iter()
                .map(|profile| profile.refresh_credentials(cancel)),
        )
        .await;

        let mut ready = 0;
        let mut first_error = None;
        for (profile, outcome) in self.profiles.iter().zip(outcomes) {
            match outcome {
                Ok(_) => {
                    tracing::info!(profile = profile.id(), "Profile ready");
                    ready += 1;
                }
                Err(e) => {
                    tracing::error!(profile = profile.id(), "Profile failed to initialize: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if ready == 0 => Err(ScanError::ProfilesUnavailable(e.to_string())),
            Some(_) => {
                tracing::warn!(
                    "Only {}/{} profiles initialized; continuing with reduced capacity",
                    ready,
                    self.profiles.len()
                );
                Ok(ready)
            }
            None => Ok(ready),
        }
    }

    /// `(profile id, requests sent)` for every profile.
    pub fn request_counts(&self) -> Vec<(usize, u64)> {
        self.profiles
            .iter()
            .map(|profile| (profile.id(), profile.request_count()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    struct StubExtractor {
        fail: bool,
    }

    #[async_trait]
    impl CredentialExtractor for StubExtractor {
        async fn extract(
            &self,
            _request: &ExtractRequest,
        ) -> std::result::Result<CredentialBundle, ExtractionError> {
            if self.fail {
                return Err(ExtractionError::Blocked("IP blocked".to_string()));
            }
            Ok(CredentialBundle::new(
                BTreeMap::new(),
                BTreeMap::new(),
                "https://www.aa.com/",
                "UA/1.0",
            ))
        }
    }

    /// Fails its first `failures` calls with a challenge page.
    struct FlakyExtractor {
        failures: u64,
        calls: AtomicU64,
    }

    #[async_trait]
    impl CredentialExtractor for FlakyExtractor {
        async fn extract(
            &self,
            _request: &ExtractRequest,
        ) -> std::result::Result<CredentialBundle, ExtractionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ExtractionError::Challenge("challenge_form".to_string()));
            }
            Ok(CredentialBundle::new(
                BTreeMap::new(),
                BTreeMap::new(),
                "https://www.aa.com/",
                "UA/1.0",
            ))
        }
    }

    fn pool(config: &AppConfig, failing: &[usize], count: usize) -> ProfilePool {
        ProfilePool::from_config(config, count, |id| {
            Arc::new(StubExtractor {
                fail: failing.contains(&id),
            })
        })
        .unwrap()
    }

    #[test]
    fn test_round_robin_assignment() {
        let pool = pool(&AppConfig::default(), &[], 3);
        let ids: Vec<_> = (0..7).map(|i| pool.assign(i).id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(matches!(
            ProfilePool::new(Vec::new()),
            Err(ScanError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_breaker_granularity() {
        let mut config = AppConfig::default();
        let shared = pool(&config, &[], 1).assign(0);
        assert_eq!(
            shared.guard(SearchType::Award).breaker().name(),
            shared.guard(SearchType::Revenue).breaker().name()
        );

        config.breaker.granularity = BreakerGranularity::PerSearchType;
        let split = pool(&config, &[], 1).assign(0);
        assert_eq!(split.guard(SearchType::Award).breaker().name(), "profile-0/award");
        assert_eq!(
            split.guard(SearchType::Revenue).breaker().name(),
            "profile-0/revenue"
        );
    }

    #[test]
    fn test_profiles_do_not_share_limiters() {
        let pool = pool(&AppConfig::default(), &[], 2);
        let (a, b) = (pool.assign(0), pool.assign(1));
        assert!(!std::ptr::eq(a.limiter(), b.limiter()));
        assert!(std::ptr::eq(
            a.limiter(),
            a.guard(SearchType::Revenue).limiter()
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_up_tolerates_partial_failure() {
        let pool = pool(&AppConfig::default(), &[1], 3);
        let ready = pool.warm_up(&CancellationToken::new()).await.unwrap();
        assert_eq!(ready, 2);
        assert!(pool.assign(0).credentials().current().is_some());
        assert!(pool.assign(1).credentials().current().is_none());
        assert_eq!(pool.assign(1).credentials().extraction_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_up_fails_when_no_profile_ready() {
        let pool = pool(&AppConfig::default(), &[0, 1], 2);
        let err = pool.warm_up(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ScanError::ProfilesUnavailable(_)));
    }

    #[test]
    fn test_from_config_validates() {
        let mut config = AppConfig::default();
        config.limiter.min_rate = 0.0;
        let result = ProfilePool::from_config(&config, 1, |_| {
            Arc::new(StubExtractor { fail: false }) as Arc<dyn CredentialExtractor>
        });
        assert!(matches!(result, Err(ScanError::Core(_))));
    }

    #[test]
    fn test_extraction_backoff_curve() {
        let retry = ExtractionRetry::default();
        let mut rng = StdRng::seed_from_u64(7);
        let blocked = ExtractionError::Blocked("IP blocked".to_string());

        for attempt in 0..3 {
            let nominal = 30.0 * f64::from(2u32.pow(attempt));
            let delay = retry.delay_with(&blocked, attempt, &mut rng).as_secs_f64();
            assert!(delay >= nominal * 0.75 - 1e-9, "attempt {attempt}: {delay}");
            assert!(delay <= (nominal * 1.25).min(300.0) + 1e-9, "attempt {attempt}: {delay}");
        }
        let capped = retry.delay_with(&blocked, 10, &mut rng);
        assert!(capped <= Duration::from_secs(300));

        let launch = ExtractionError::Launch("no chromium".to_string());
        assert_eq!(retry.delay_with(&launch, 2, &mut rng), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_retried_after_challenge() {
        let extractor = Arc::new(FlakyExtractor {
            failures: 1,
            calls: AtomicU64::new(0),
        });
        let pool = ProfilePool::from_config(&AppConfig::default(), 1, |_| {
            Arc::clone(&extractor) as Arc<dyn CredentialExtractor>
        })
        .unwrap();
        let profile = pool.assign(0);

        let started = tokio::time::Instant::now();
        let bundle = profile
            .acquire_credentials(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(profile.credentials().current().unwrap().id, bundle.id);
        assert!(started.elapsed() >= Duration::from_millis(22_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_budget_exhausted() {
        let extractor = Arc::new(FlakyExtractor {
            failures: u64::MAX,
            calls: AtomicU64::new(0),
        });
        let pool = ProfilePool::from_config(&AppConfig::default(), 1, |_| {
            Arc::clone(&extractor) as Arc<dyn CredentialExtractor>
        })
        .unwrap();

        let err = pool
            .assign(0)
            .acquire_credentials(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Extraction(ExtractionError::Challenge(_))));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_backoff_observes_cancellation() {
        let extractor = Arc::new(FlakyExtractor {
            failures: u64::MAX,
            calls: AtomicU64::new(0),
        });
        let pool = ProfilePool::from_config(&AppConfig::default(), 1, |_| {
            Arc::clone(&extractor) as Arc<dyn CredentialExtractor>
        })
        .unwrap();
        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                cancel.cancel();
            }
        });

        let err = pool.assign(0).acquire_credentials(&cancel).await.unwrap_err();
        assert_eq!(err, SearchError::Cancelled);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }
}
