//! Session credential bundle.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Default hard lifetime of a bundle.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Default age after which a background refresh should start.
pub const DEFAULT_SOFT_REFRESH: Duration = Duration::from_secs(20 * 60);

/// Cookies, headers and browser identity captured from one extraction.
///
/// Bundles are immutable once built; a refresh produces a new bundle with a
/// new [`id`](Self::id), which is how stale invalidations are recognized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub id: Uuid,
    pub cookies: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub referer: String,
    pub user_agent: String,
    pub extracted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub soft_refresh_at: DateTime<Utc>,
}

impl CredentialBundle {
    /// Build a bundle extracted now, with the default lifetimes.
    pub fn new(
        cookies: BTreeMap<String, String>,
        headers: BTreeMap<String, String>,
        referer: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        let extracted_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            cookies,
            headers,
            referer: referer.into(),
            user_agent: user_agent.into(),
            extracted_at,
            expires_at: extracted_at + to_chrono(DEFAULT_TTL),
            soft_refresh_at: extracted_at + to_chrono(DEFAULT_SOFT_REFRESH),
        }
    }

    /// Re-derive the expiry timestamps from `extracted_at`.
    #[must_use]
    pub fn with_lifetime(mut self, ttl: Duration, soft_refresh: Duration) -> Self {
        self.expires_at = self.extracted_at + to_chrono(ttl);
        self.soft_refresh_at = self.extracted_at + to_chrono(soft_refresh);
        self
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Render the cookies as a `Cookie` request header value.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Age of the bundle at `now`, zero if `now` precedes extraction.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.extracted_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.soft_refresh_at
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}
