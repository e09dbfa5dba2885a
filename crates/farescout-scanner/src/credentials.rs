//! Session credential store with single-flight refresh.
//!
//! One store per browser profile. Readers take the current bundle without
//! blocking each other; refreshes are started at most once at a time and
//! every caller that needs a fresh bundle awaits the same in-flight
//! extraction. A failed extraction is delivered to all of its waiters and is
//! not retried by the store.

use farescout_browser::{CredentialBundle, CredentialExtractor, ExtractRequest, ExtractionError};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

type RefreshOutcome = Result<Arc<CredentialBundle>, ExtractionError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Lifetime and extraction settings for one store.
#[derive(Debug, Clone)]
pub struct CredentialSettings {
    pub request: ExtractRequest,
    /// Hard expiry, measured from extraction
    pub ttl: Duration,
    /// Age at which a background refresh starts
    pub soft_refresh: Duration,
    /// JSON file the current bundle is cached in, if any
    pub cache_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct Slot {
    bundle: Arc<CredentialBundle>,
    obtained_at: Instant,
    invalidated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// No usable bundle; skip if one appeared meanwhile
    Missing,
    /// Bundle past its soft refresh age; skip if already replaced
    Stale,
    /// Always extract
    Forced,
}

struct StoreInner {
    profile: usize,
    extractor: Arc<dyn CredentialExtractor>,
    settings: CredentialSettings,
    current: RwLock<Option<Slot>>,
    inflight: Mutex<Option<SharedRefresh>>,
    extractions: AtomicU64,
}

/// Credential lifecycle for one profile. Cheap to clone.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<StoreInner>,
}

impl CredentialStore {
    /// Create a store, seeding it from the cache file when it holds a bundle
    /// that has not hard-expired.
    pub fn new(
        profile: usize,
        extractor: Arc<dyn CredentialExtractor>,
        settings: CredentialSettings,
    ) -> Self {
        let cached = settings
            .cache_path
            .as_deref()
            .and_then(|path| load_cached(profile, path, &settings));

        Self {
            inner: Arc::new(StoreInner {
                profile,
                extractor,
                settings,
                current: RwLock::new(cached),
                inflight: Mutex::new(None),
                extractions: AtomicU64::new(0),
            }),
        }
    }

    pub fn profile(&self) -> usize {
        self.inner.profile
    }

    /// Get a usable bundle, extracting a new one if needed.
    ///
    /// A bundle past its soft refresh age is still returned, with a
    /// background refresh started. Without a usable bundle the caller waits
    /// for the (shared) refresh.
    pub async fn acquire(&self) -> Result<Arc<CredentialBundle>, ExtractionError> {
        if let Some((bundle, stale)) = self.inner.usable(Instant::now()) {
            if stale {
                self.refresh_in_background(Trigger::Stale);
            }
            return Ok(bundle);
        }
        self.start(Trigger::Missing).await
    }

    /// Mark `bundle` as rejected by the server.
    ///
    /// Only takes effect while `bundle` is still the current one; reports
    /// about superseded bundles are ignored.
    pub fn mark_invalid(&self, bundle: &CredentialBundle) {
        let mut current = self.inner.write_current();
        match current.as_mut() {
            Some(slot) if slot.bundle.id == bundle.id => {
                if !slot.invalidated {
                    slot.invalidated = true;
                    tracing::info!(profile = self.inner.profile, "Credentials invalidated");
                }
            }
            _ => {
                tracing::debug!(
                    profile = self.inner.profile,
                    "Ignoring invalidation of superseded credentials"
                );
            }
        }
    }

    /// Start a background refresh if the current bundle is missing, invalid
    /// or past its soft refresh age. Must be called within a Tokio runtime.
    pub fn maybe_refresh(&self) {
        match self.inner.usable(Instant::now()) {
            Some((_, false)) => {}
            Some((_, true)) => self.refresh_in_background(Trigger::Stale),
            None => self.refresh_in_background(Trigger::Missing),
        }
    }

    /// Extract a new bundle now, joining a refresh already in flight.
    pub async fn force_refresh(&self) -> Result<Arc<CredentialBundle>, ExtractionError> {
        self.start(Trigger::Forced).await
    }

    /// The current bundle, whatever its state.
    pub fn current(&self) -> Option<Arc<CredentialBundle>> {
        self.inner
            .read_current()
            .as_ref()
            .map(|slot| Arc::clone(&slot.bundle))
    }

    /// Number of extractions started by this store.
    pub fn extraction_count(&self) -> u64 {
        self.inner.extractions.load(Ordering::SeqCst)
    }

    fn refresh_in_background(&self, trigger: Trigger) {
        // The extraction runs on its own task; nobody needs to poll this handle.
        drop(self.start(trigger));
    }

    /// Join the in-flight refresh or start one.
    fn start(&self, trigger: Trigger) -> SharedRefresh {
        let mut inflight = self
            .inner
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(refresh) = inflight.as_ref() {
            return refresh.clone();
        }

        // Re-check under the lock: a refresh may have completed since the
        // caller looked at the current bundle.
        if let Some((bundle, stale)) = self.inner.usable(Instant::now()) {
            let skip = match trigger {
                Trigger::Missing => true,
                Trigger::Stale => !stale,
                Trigger::Forced => false,
            };
            if skip {
                return futures::future::ready(Ok(bundle)).boxed().shared();
            }
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.extract().await });
        let refresh = async move {
            task.await
                .unwrap_or_else(|e| Err(ExtractionError::Aborted(e.to_string())))
        }
        .boxed()
        .shared();

        *inflight = Some(refresh.clone());
        refresh
    }
}

impl StoreInner {
    /// Current bundle and whether it is past its soft refresh age, if it is
    /// still usable.
    fn usable(&self, now: Instant) -> Option<(Arc<CredentialBundle>, bool)> {
        let current = self.read_current();
        let slot = current.as_ref()?;
        if slot.invalidated {
            return None;
        }
        let age = now.saturating_duration_since(slot.obtained_at);
        if age >= self.settings.ttl {
            return None;
        }
        Some((Arc::clone(&slot.bundle), age >= self.settings.soft_refresh))
    }

    /// Run one extraction. Executed on its own task so it completes even if
    /// every waiter goes away.
    async fn extract(self: Arc<Self>) -> RefreshOutcome {
        let attempt = self.extractions.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            profile = self.profile,
            extraction = attempt,
            "Extracting session credentials"
        );

        let outcome = self.extractor.extract(&self.settings.request).await;

        let result = match outcome {
            Ok(bundle) => {
                let bundle = Arc::new(
                    bundle.with_lifetime(self.settings.ttl, self.settings.soft_refresh),
                );
                *self.write_current() = Some(Slot {
                    bundle: Arc::clone(&bundle),
                    obtained_at: Instant::now(),
                    invalidated: false,
                });
                if let Some(path) = &self.settings.cache_path {
                    save_cached(self.profile, path, &bundle).await;
                }
                tracing::info!(
                    profile = self.profile,
                    cookies = bundle.cookies.len(),
                    "Session credentials refreshed"
                );
                Ok(bundle)
            }
            Err(e) => {
                tracing::error!(profile = self.profile, "Credential extraction failed: {}", e);
                Err(e)
            }
        };

        // Publish the bundle before clearing the in-flight marker so no
        // caller can observe neither.
        *self.inflight.lock().unwrap_or_else(PoisonError::into_inner) = None;
        result
    }

    fn read_current(&self) -> std::sync::RwLockReadGuard<'_, Option<Slot>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_current(&self) -> std::sync::RwLockWriteGuard<'_, Option<Slot>> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cache file path for a profile inside `dir`.
pub fn cache_file(dir: &Path, profile: usize) -> PathBuf {
    dir.join(format!("credentials_profile_{profile}.json"))
}

fn load_cached(profile: usize, path: &Path, settings: &CredentialSettings) -> Option<Slot> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(profile, "Failed to read credential cache {}: {}", path.display(), e);
            return None;
        }
    };

    let bundle: CredentialBundle = match serde_json::from_str(&contents) {
        Ok(bundle) => bundle,
        Err(e) => {
            tracing::warn!(profile, "Ignoring corrupt credential cache {}: {}", path.display(), e);
            return None;
        }
    };

    let age = bundle.age_at(chrono::Utc::now());
    if age >= settings.ttl {
        tracing::debug!(profile, "Cached credentials expired ({}s old)", age.as_secs());
        return None;
    }

    let now = Instant::now();
    tracing::info!(profile, "Loaded cached credentials ({}s old)", age.as_secs());
    Some(Slot {
        bundle: Arc::new(bundle.with_lifetime(settings.ttl, settings.soft_refresh)),
        obtained_at: now.checked_sub(age).unwrap_or(now),
        invalidated: false,
    })
}

async fn save_cached(profile: usize, path: &Path, bundle: &CredentialBundle) {
    let contents = match serde_json::to_string_pretty(bundle) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!(profile, "Failed to serialize credentials: {}", e);
            return;
        }
    };

    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            tracing::warn!(profile, "Failed to create cache directory: {}", e);
            return;
        }
    }

    match tokio::fs::write(path, contents).await {
        Ok(()) => tracing::debug!(profile, "Saved credentials to {}", path.display()),
        Err(e) => tracing::warn!(profile, "Failed to write credential cache: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    /// Extractor that counts calls, takes a fixed time and can be told to fail.
    struct CountingExtractor {
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingExtractor {
        fn new(delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                delay,
                fail,
            })
        }
    }

    #[async_trait::async_trait]
    impl CredentialExtractor for CountingExtractor {
        async fn extract(
            &self,
            _request: &ExtractRequest,
        ) -> Result<CredentialBundle, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(ExtractionError::Challenge("challenge_form".to_string()));
            }
            let mut cookies = BTreeMap::new();
            cookies.insert("XSRF-TOKEN".to_string(), "token".to_string());
            cookies.insert("spa_session_id".to_string(), "session".to_string());
            Ok(CredentialBundle::new(cookies, BTreeMap::new(), "https://example.com", "UA"))
        }
    }

    fn settings(cache_path: Option<PathBuf>) -> CredentialSettings {
        CredentialSettings {
            request: ExtractRequest {
                target_url: "https://example.com/booking/search".to_string(),
                wait_budget: Duration::from_secs(15),
                headless: true,
            },
            ttl: Duration::from_secs(30 * 60),
            soft_refresh: Duration::from_secs(20 * 60),
            cache_path,
        }
    }

    fn store(extractor: Arc<CountingExtractor>) -> CredentialStore {
        CredentialStore::new(0, extractor, settings(None))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquire_single_extraction() {
        let extractor = CountingExtractor::new(Duration::from_secs(10), false);
        let store = store(Arc::clone(&extractor));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.acquire().await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().expect("bundle").id);
        }

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.extraction_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_delivered_to_all_waiters_without_retry() {
        let extractor = CountingExtractor::new(Duration::from_secs(5), true);
        let store = store(Arc::clone(&extractor));

        let (a, b, c) = tokio::join!(store.acquire(), store.acquire(), store.acquire());
        let expected = ExtractionError::Challenge("challenge_form".to_string());
        assert_eq!(a.unwrap_err(), expected);
        assert_eq!(b.unwrap_err(), expected);
        assert_eq!(c.unwrap_err(), expected);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

        // The next caller starts a new extraction
        assert!(store.acquire().await.is_err());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_bundle_reused() {
        let extractor = CountingExtractor::new(Duration::from_secs(1), false);
        let store = store(Arc::clone(&extractor));

        let first = store.acquire().await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        let second = store.acquire().await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_refresh_runs_in_background() {
        let extractor = CountingExtractor::new(Duration::from_secs(10), false);
        let store = store(Arc::clone(&extractor));

        let first = store.acquire().await.unwrap();
        tokio::time::advance(Duration::from_secs(21 * 60)).await;

        // Stale but valid: returned immediately, refresh started behind it
        let stale = store.acquire().await.unwrap();
        assert_eq!(stale.id, first.id);
        let again = store.acquire().await.unwrap();
        assert_eq!(again.id, first.id);

        tokio::time::sleep(Duration::from_secs(11)).await;
        let fresh = store.acquire().await.unwrap();
        assert_ne!(fresh.id, first.id);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maybe_refresh_prefetches() {
        let extractor = CountingExtractor::new(Duration::from_secs(10), false);
        let store = store(Arc::clone(&extractor));

        store.maybe_refresh();
        store.maybe_refresh();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        let first = store.current().expect("prefetched bundle");

        // Fresh bundle: nothing to do
        store.maybe_refresh();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

        store.mark_invalid(&first);
        store.maybe_refresh();
        let refreshed = store.acquire().await.unwrap();
        assert_ne!(refreshed.id, first.id);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_bundle_blocks_for_refresh() {
        let extractor = CountingExtractor::new(Duration::from_secs(10), false);
        let store = store(Arc::clone(&extractor));

        let first = store.acquire().await.unwrap();
        tokio::time::advance(Duration::from_secs(31 * 60)).await;

        let start = Instant::now();
        let fresh = store.acquire().await.unwrap();
        assert_ne!(fresh.id, first.id);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_invalid_compares_identity() {
        let extractor = CountingExtractor::new(Duration::from_secs(1), false);
        let store = store(Arc::clone(&extractor));

        let first = store.acquire().await.unwrap();
        store.mark_invalid(&first);
        let second = store.acquire().await.unwrap();
        assert_ne!(first.id, second.id);

        // A late report about the old bundle must not discard the new one
        store.mark_invalid(&first);
        let third = store.acquire().await.unwrap();
        assert_eq!(second.id, third.id);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_joins_inflight() {
        let extractor = CountingExtractor::new(Duration::from_secs(10), false);
        let store = store(Arc::clone(&extractor));

        let (a, b) = tokio::join!(store.acquire(), store.force_refresh());
        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

        let forced = store.force_refresh().await.unwrap();
        assert_eq!(store.current().unwrap().id, forced.id);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(extractor.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_file(dir.path(), 0);
        let extractor = CountingExtractor::new(Duration::from_secs(1), false);

        let first = CredentialStore::new(0, extractor.clone(), settings(Some(path.clone())));
        let bundle = first.acquire().await.unwrap();
        assert!(path.exists());

        let second = CredentialStore::new(0, extractor.clone(), settings(Some(path)));
        assert_eq!(second.current().unwrap().id, bundle.id);
        assert_eq!(second.acquire().await.unwrap().id, bundle.id);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_cache_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_file(dir.path(), 3);
        std::fs::write(&path, "{not json").unwrap();

        let extractor = CountingExtractor::new(Duration::from_secs(1), false);
        let store = CredentialStore::new(3, extractor.clone(), settings(Some(path)));
        assert!(store.current().is_none());
        assert!(store.acquire().await.is_ok());
    }
}
