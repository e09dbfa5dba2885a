use crate::bundle::CredentialBundle;
use crate::error::ExtractionError;
use std::time::Duration;

/// Parameters for one extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractRequest {
    /// Page whose traffic makes the site issue session cookies
    pub target_url: String,
    /// How long to wait for the session to settle once the page is loaded
    pub wait_budget: Duration,
    pub headless: bool,
}

/// Produces session credentials for one browser profile.
///
/// Implementations may take tens of seconds. Callers must not run two
/// extractions for the same profile at once.
#[async_trait::async_trait]
pub trait CredentialExtractor: Send + Sync {
    /// Run one extraction.
    async fn extract(&self, request: &ExtractRequest)
        -> Result<CredentialBundle, ExtractionError>;
}
