use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium error: {0}")]
    ChromiumError(String),

    #[error("navigation failed: {0}")]
    NavigationError(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Failure of one credential extraction.
///
/// Cloned to every caller waiting on the same refresh, so variants carry
/// rendered messages instead of source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("bot challenge not cleared ({0})")]
    Challenge(String),

    #[error("blocked by target site: {0}")]
    Blocked(String),

    #[error("missing critical cookies: {}", .0.join(", "))]
    MissingCookies(Vec<String>),

    #[error("extraction timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("extraction aborted: {0}")]
    Aborted(String),
}

impl From<BrowserError> for ExtractionError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::ChromiumError(msg) => Self::Launch(msg),
            BrowserError::NavigationError(msg) | BrowserError::InvalidUrl(msg) => {
                Self::Navigation(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrowserError::NavigationError("page not found".to_string());
        assert_eq!(err.to_string(), "navigation failed: page not found");
    }

    #[test]
    fn test_missing_cookies_display() {
        let err = ExtractionError::MissingCookies(vec![
            "XSRF-TOKEN".to_string(),
            "spa_session_id".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "missing critical cookies: XSRF-TOKEN, spa_session_id"
        );
    }

    #[test]
    fn test_browser_error_maps_to_extraction_error() {
        let err: ExtractionError = BrowserError::ChromiumError("no binary".to_string()).into();
        assert_eq!(err, ExtractionError::Launch("no binary".to_string()));

        let err: ExtractionError = BrowserError::InvalidUrl("nope".to_string()).into();
        assert!(matches!(err, ExtractionError::Navigation(_)));
    }
}
