//! HTTP search transport backed by `reqwest`.

use crate::error::{Result, ScanError};
use crate::payload::{build_headers, build_search_payload};
use crate::transport::{HttpError, HttpErrorKind, RawResponse, SearchQuery, SearchTransport};
use farescout_browser::target::is_block_page;
use farescout_browser::CredentialBundle;
use farescout_core::{ApiConfig, SearchType};
use reqwest::header::{CONTENT_TYPE, COOKIE, RETRY_AFTER};
use reqwest::Client;
use std::time::Duration;
use tokio::time::Instant;

/// Pause assumed when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Posts itinerary searches to the API endpoint.
pub struct ReqwestTransport {
    client: Client,
    endpoint: String,
    origin: String,
}

impl ReqwestTransport {
    /// Create a transport for the configured endpoint.
    pub fn new(api: &ApiConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| ScanError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: api.search_endpoint.clone(),
            origin: api.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl SearchTransport for ReqwestTransport {
    async fn search(
        &self,
        search_type: SearchType,
        query: &SearchQuery,
        credentials: &CredentialBundle,
    ) -> std::result::Result<RawResponse, HttpError> {
        let payload = build_search_payload(search_type, query);
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(COOKIE, credentials.cookie_header())
            .json(&payload);
        for (name, value) in build_headers(credentials, &self.origin) {
            request = request.header(name, value);
        }

        tracing::debug!(route = %query, "Sending {} search", search_type);
        let started = Instant::now();
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.bytes().await.map_err(transport_error)?;
        let elapsed = started.elapsed();
        tracing::debug!(
            route = %query,
            status,
            bytes = body.len(),
            "{} response in {:.2}s",
            search_type,
            elapsed.as_secs_f64()
        );

        interpret_response(status, &content_type, retry_after, &body, elapsed)
    }
}

fn transport_error(err: reqwest::Error) -> HttpError {
    if err.is_timeout() {
        HttpError::new(HttpErrorKind::Timeout, err.to_string())
    } else {
        HttpError::new(HttpErrorKind::Network, err.to_string())
    }
}

/// Turn a received response into a result, detecting blocks and
/// malformed bodies.
pub fn interpret_response(
    status: u16,
    content_type: &str,
    retry_after: Option<Duration>,
    body: &[u8],
    elapsed: Duration,
) -> std::result::Result<RawResponse, HttpError> {
    let html = content_type.contains("text/html");

    if matches!(status, 403 | 451) {
        let text = String::from_utf8_lossy(body);
        let message = if is_block_page(&text) {
            format!("HTTP {status}: access denied by bot defense")
        } else {
            format!("HTTP {status}")
        };
        return Err(HttpError::new(HttpErrorKind::Status(status), message));
    }

    if status == 429 {
        let pause = retry_after.unwrap_or(DEFAULT_RETRY_AFTER);
        return Err(HttpError::status(429).with_retry_after(pause));
    }

    if !(200..300).contains(&status) {
        return Err(HttpError::status(status));
    }

    if html {
        return Err(HttpError::new(
            HttpErrorKind::BlockPage,
            format!("unexpected HTML response (HTTP {status})"),
        ));
    }

    let body_json: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
        HttpError::new(HttpErrorKind::Malformed, format!("invalid JSON response: {e}"))
    })?;

    if body_json.get("slices").is_none() {
        return Err(HttpError::new(
            HttpErrorKind::Malformed,
            "response missing 'slices'",
        ));
    }

    Ok(RawResponse {
        status,
        body: body_json,
        bytes: body.len(),
        elapsed,
    })
}
