use crate::bundle::CredentialBundle;
use crate::error::{BrowserError, ExtractionError};
use crate::extractor::{CredentialExtractor, ExtractRequest};
use crate::fingerprint::FingerprintConfig;
use crate::target::{
    cookie_matches_host, detect_challenge, extract_domain, is_block_page,
    missing_critical_cookies, site_root, BOT_DEFENSE_COOKIES,
};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetTimezoneOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::Page;
use futures_util::stream::StreamExt;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Extra time on top of the wait budget for launch and page loads.
const NAVIGATION_ALLOWANCE: Duration = Duration::from_secs(45);

/// Pause after the landing page loads, before looking for the consent banner.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

const POLL_INTERVAL: Duration = Duration::from_secs(1);

const CONSENT_SELECTORS: [&str; 2] = [
    "#accept-recommended-btn-handler",
    "#onetrust-accept-btn-handler",
];

/// Credential extractor backed by a real Chromium instance.
///
/// A fresh browser is launched for every extraction and closed afterwards;
/// the fingerprint stays fixed for the lifetime of the extractor so one
/// profile keeps presenting as the same browser.
pub struct ChromiumExtractor {
    fingerprint: FingerprintConfig,
}

impl ChromiumExtractor {
    /// Create an extractor with a randomized fingerprint
    pub fn new() -> Self {
        Self::with_fingerprint(FingerprintConfig::randomized())
    }

    /// Create an extractor with a specific fingerprint
    pub fn with_fingerprint(fingerprint: FingerprintConfig) -> Self {
        Self { fingerprint }
    }

    pub fn fingerprint(&self) -> &FingerprintConfig {
        &self.fingerprint
    }

    async fn launch(&self, headless: bool) -> Result<(Browser, JoinHandle<()>), BrowserError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(
                self.fingerprint.viewport_width,
                self.fingerprint.viewport_height,
            )
            .arg(format!("--lang={}", self.fingerprint.locale));
        if !headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::ChromiumError)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        // Spawn browser handler
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok((browser, handle))
    }

    async fn apply_fingerprint(&self, page: &Page) -> Result<(), BrowserError> {
        page.execute(SetUserAgentOverrideParams::new(
            self.fingerprint.user_agent.clone(),
        ))
        .await
        .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        page.execute(SetTimezoneOverrideParams::new(
            self.fingerprint.timezone.clone(),
        ))
        .await
        .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        Ok(())
    }

    async fn run(
        &self,
        browser: &Browser,
        request: &ExtractRequest,
    ) -> Result<CredentialBundle, ExtractionError> {
        let root = site_root(&request.target_url)?;
        let host = extract_domain(&request.target_url)?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ExtractionError::Launch(e.to_string()))?;
        self.apply_fingerprint(&page).await?;

        tracing::info!("Loading landing page {}", root);
        page.goto(root.as_str()).await.map_err(navigation)?;
        tokio::time::sleep(SETTLE_DELAY).await;

        if accept_cookie_consent(&page).await {
            tracing::debug!("Accepted cookie consent banner");
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        tracing::info!("Loading warm-up search page");
        page.goto(request.target_url.as_str())
            .await
            .map_err(navigation)?;

        let cookies = wait_for_session(&page, &host, request.wait_budget).await?;

        let referer = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| request.target_url.clone());

        let mut headers = BTreeMap::new();
        headers.insert(
            "accept".to_string(),
            "application/json, text/plain, */*".to_string(),
        );
        headers.insert(
            "accept-language".to_string(),
            self.fingerprint.accept_language(),
        );
        headers.insert("origin".to_string(), root);

        Ok(CredentialBundle::new(
            cookies,
            headers,
            referer,
            self.fingerprint.user_agent.clone(),
        ))
    }
}

impl Default for ChromiumExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CredentialExtractor for ChromiumExtractor {
    async fn extract(
        &self,
        request: &ExtractRequest,
    ) -> Result<CredentialBundle, ExtractionError> {
        let started = Instant::now();
        let (mut browser, handler) = self.launch(request.headless).await?;

        let deadline = request.wait_budget + NAVIGATION_ALLOWANCE;
        let outcome = match tokio::time::timeout(deadline, self.run(&browser, request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ExtractionError::Timeout(deadline)),
        };

        if let Err(e) = browser.close().await {
            tracing::debug!("Browser close failed: {}", e);
        }
        if let Err(e) = browser.wait().await {
            tracing::debug!("Browser process wait failed: {}", e);
        }
        handler.abort();

        match &outcome {
            Ok(bundle) => tracing::info!(
                cookies = bundle.cookies.len(),
                "Extracted session credentials in {:.1}s",
                started.elapsed().as_secs_f64()
            ),
            Err(e) => tracing::warn!("Credential extraction failed: {}", e),
        }
        outcome
    }
}

fn navigation(err: chromiumoxide::error::CdpError) -> ExtractionError {
    ExtractionError::Navigation(err.to_string())
}

async fn accept_cookie_consent(page: &Page) -> bool {
    for selector in CONSENT_SELECTORS {
        if let Ok(button) = page.find_element(selector).await {
            if button.click().await.is_ok() {
                return true;
            }
        }
    }
    false
}

/// Poll the page until the critical cookies appear or the budget runs out.
async fn wait_for_session(
    page: &Page,
    host: &str,
    budget: Duration,
) -> Result<BTreeMap<String, String>, ExtractionError> {
    let started = Instant::now();
    loop {
        let url = page.url().await.map_err(navigation)?.unwrap_or_default();
        let content = page.content().await.map_err(navigation)?;

        if is_block_page(&content) {
            return Err(ExtractionError::Blocked(url));
        }

        let exhausted = started.elapsed() >= budget;
        match detect_challenge(&url, &content) {
            Some(challenge) if exhausted => {
                return Err(ExtractionError::Challenge(challenge.to_string()));
            }
            Some(challenge) => {
                tracing::debug!("Bot challenge in progress ({})", challenge);
            }
            None => {
                let cookies = collect_cookies(page, host).await?;
                let missing = missing_critical_cookies(&cookies);
                if missing.is_empty() {
                    log_bot_defense_cookies(&cookies);
                    return Ok(cookies);
                }
                if exhausted {
                    return Err(ExtractionError::MissingCookies(missing));
                }
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn collect_cookies(
    page: &Page,
    host: &str,
) -> Result<BTreeMap<String, String>, ExtractionError> {
    let cookies = page.get_cookies().await.map_err(navigation)?;
    Ok(cookies
        .into_iter()
        .filter(|cookie| cookie_matches_host(&cookie.domain, host))
        .map(|cookie| (cookie.name, cookie.value))
        .collect())
}

fn log_bot_defense_cookies(cookies: &BTreeMap<String, String>) {
    let found: Vec<&str> = BOT_DEFENSE_COOKIES
        .iter()
        .copied()
        .filter(|name| cookies.contains_key(*name))
        .collect();
    if found.is_empty() {
        tracing::warn!("No bot-defense cookies captured, session may be short-lived");
    } else {
        tracing::debug!("Bot-defense cookies: {}", found.join(", "));
    }
}
