//! Browser session credential extraction.
//!
//! Drives a headless Chromium through the target site's search flow so the
//! bot-defense layer issues session cookies, then packages those cookies
//! (plus user agent and referer) into a [`CredentialBundle`] that API calls
//! can replay.

pub mod bundle;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod fingerprint;
pub mod target;

pub use bundle::CredentialBundle;
pub use engine::ChromiumExtractor;
pub use error::{BrowserError, ExtractionError, Result};
pub use extractor::{CredentialExtractor, ExtractRequest};
pub use fingerprint::FingerprintConfig;
