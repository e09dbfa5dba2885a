//! Target site helpers: URLs, challenge detection and cookie checks.

use crate::error::{BrowserError, Result};
use std::collections::BTreeMap;
use url::Url;

/// Cookies without which API calls are rejected.
pub const CRITICAL_COOKIES: [&str; 2] = ["XSRF-TOKEN", "spa_session_id"];

/// Cookies set by the bot-defense layer once a session is trusted.
pub const BOT_DEFENSE_COOKIES: [&str; 4] = ["_abck", "bm_sz", "ak_bmsc", "bm_sv"];

const CHALLENGE_URL_PATTERNS: [(&str, &str); 3] = [
    ("challenge_path", "/zetfnomfuz0qb36s_"),
    ("challenge_api", "/booking/api/akamai"),
    ("challenge_resubmit", "akamai-challenge-resubmit"),
];

const CHALLENGE_CONTENT_MARKERS: [(&str, &str); 5] = [
    ("challenge_iframe", "title=\"Challenge Content\""),
    ("challenge_form", "sec_chlge_form"),
    ("challenge_script", "cp_clge_done"),
    ("crypto_provider", "provider=\"crypto\""),
    ("sec_container", "class=\"sec-container\""),
];

const BLOCK_MARKERS: [&str; 2] = [
    "Access Denied",
    "You don't have permission to access",
];

/// Helper to extract domain from URL
pub fn extract_domain(url: &str) -> Result<String> {
    let url = Url::parse(url).map_err(|e| BrowserError::InvalidUrl(format!("{url}: {e}")))?;

    url.host_str()
        .ok_or_else(|| BrowserError::InvalidUrl("No host in URL".to_string()))
        .map(|s| s.to_string())
}

/// Scheme and host of a URL, e.g. `https://www.aa.com`.
pub fn site_root(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| BrowserError::InvalidUrl(format!("{url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| BrowserError::InvalidUrl("No host in URL".to_string()))?;

    Ok(match parsed.port() {
        Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
        None => format!("{}://{host}", parsed.scheme()),
    })
}

/// Build the one-way revenue search page URL used to warm up a session.
pub fn build_warmup_url(
    base_url: &str,
    origin: &str,
    destination: &str,
    date: &str,
) -> Result<String> {
    let mut url = Url::parse(base_url)
        .and_then(|base| base.join("/booking/search"))
        .map_err(|e| BrowserError::InvalidUrl(format!("{base_url}: {e}")))?;

    let slices = serde_json::json!([{
        "orig": origin,
        "origNearby": false,
        "dest": destination,
        "destNearby": false,
        "date": date,
    }]);

    url.query_pairs_mut()
        .append_pair("locale", "en_US")
        .append_pair("fareType", "Lowest")
        .append_pair("pax", "1")
        .append_pair("adult", "1")
        .append_pair("type", "OneWay")
        .append_pair("searchType", "Revenue")
        .append_pair("cabin", "")
        .append_pair("carriers", "ALL")
        .append_pair("travelType", "personal")
        .append_pair("slices", &slices.to_string());

    Ok(url.into())
}

/// Name of the bot-challenge marker found in a page, if any.
pub fn detect_challenge(url: &str, content: &str) -> Option<&'static str> {
    let url = url.to_ascii_lowercase();
    CHALLENGE_URL_PATTERNS
        .iter()
        .find(|(_, pattern)| url.contains(pattern))
        .or_else(|| {
            CHALLENGE_CONTENT_MARKERS
                .iter()
                .find(|(_, marker)| content.contains(marker))
        })
        .map(|(name, _)| *name)
}

/// Whether a page is an outright block rather than a solvable challenge.
pub fn is_block_page(content: &str) -> bool {
    BLOCK_MARKERS.iter().any(|marker| content.contains(marker))
}

/// Whether a cookie set for `cookie_domain` is sent to `host`.
pub fn cookie_matches_host(cookie_domain: &str, host: &str) -> bool {
    let domain = cookie_domain.trim_start_matches('.');
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Critical cookies absent from a cookie jar.
pub fn missing_critical_cookies(cookies: &BTreeMap<String, String>) -> Vec<String> {
    CRITICAL_COOKIES
        .iter()
        .filter(|name| cookies.get(**name).map_or(true, String::is_empty))
        .map(|name| (*name).to_string())
        .collect()
}
