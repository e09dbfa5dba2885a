//! Configuration management for farescout.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides. All resilience thresholds (breaker,
//! limiter, retry, credential lifetimes) are read from here.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration.
///
/// This is loaded from `~/.config/farescout/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Target API endpoints
    pub api: ApiConfig,
    /// Session credential lifecycle settings
    pub credentials: CredentialConfig,
    /// Circuit breaker settings
    pub breaker: BreakerConfig,
    /// Adaptive rate limiter settings
    pub limiter: LimiterConfig,
    /// Retry and backoff settings
    pub retry: RetryConfig,
    /// Bulk run settings
    pub bulk: BulkConfig,
    /// Logging output settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from the default path, falling back to defaults if not found.
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, falling back to defaults if not found.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            let contents = fs::read_to_string(path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `FARESCOUT_HEADLESS`: Override browser headless mode (true/false)
    /// - `FARESCOUT_MAX_CONCURRENT`: Override bulk concurrency
    /// - `FARESCOUT_BROWSERS`: Override number of browser profiles
    /// - `FARESCOUT_RATE_LIMIT`: Override base request rate (req/s)
    pub fn load_with_env(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from an environment lookup function.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(headless) = lookup("FARESCOUT_HEADLESS").and_then(|v| v.parse().ok()) {
            self.credentials.headless = headless;
            tracing::debug!("Override credentials.headless from env: {}", headless);
        }

        if let Some(max) = lookup("FARESCOUT_MAX_CONCURRENT").and_then(|v| v.parse().ok()) {
            self.bulk.max_concurrent = max;
            tracing::debug!("Override bulk.max_concurrent from env: {}", max);
        }

        if let Some(browsers) = lookup("FARESCOUT_BROWSERS").and_then(|v| v.parse().ok()) {
            self.bulk.browser_count = browsers;
            tracing::debug!("Override bulk.browser_count from env: {}", browsers);
        }

        if let Some(rate) = lookup("FARESCOUT_RATE_LIMIT").and_then(|v| v.parse().ok()) {
            self.limiter.base_rate = rate;
            tracing::debug!("Override limiter.base_rate from env: {}", rate);
        }
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/farescout/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "farescout", "farescout").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the cache directory path, used for credential caches.
    ///
    /// Uses XDG base directories: `~/.cache/farescout`
    pub fn cache_dir() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "farescout", "farescout").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.cache_dir().to_path_buf())
    }

    /// Check that the loaded values are internally consistent.
    pub fn validate(&self) -> ConfigResult<()> {
        self.credentials.validate()?;
        self.breaker.validate()?;
        self.limiter.validate()?;
        self.retry.validate()?;
        self.bulk.validate()?;
        Ok(())
    }
}

/// Target API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Site base URL (also used as the `Origin` header)
    pub base_url: String,
    /// Itinerary search endpoint
    pub search_endpoint: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.aa.com".to_string(),
            search_endpoint: "https://www.aa.com/booking/api/search/itinerary".to_string(),
        }
    }
}

/// Session credential lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Hard expiry of a credential bundle, in minutes
    pub ttl_minutes: u64,
    /// Age after which a background refresh is started, in minutes
    pub soft_refresh_minutes: u64,
    /// Time budget for one browser extraction, in seconds
    pub wait_secs: u64,
    /// Run the extraction browser headless
    pub headless: bool,
    /// Directory for per-profile credential caches (disabled when unset)
    pub cache_dir: Option<PathBuf>,
    /// Origin of the warm-up search used during extraction
    pub warmup_origin: String,
    /// Destination of the warm-up search used during extraction
    pub warmup_destination: String,
    /// Days ahead of today for the warm-up search date
    pub warmup_days_ahead: u32,
    /// Extraction attempts before a profile gives up
    pub extraction_attempts: u32,
    /// Initial backoff after a bot-defense rejection, in seconds
    pub extraction_backoff_secs: u64,
    /// Longest backoff between extraction attempts, in seconds
    pub extraction_max_backoff_secs: u64,
    /// Fixed delay after any other extraction failure, in seconds
    pub extraction_retry_secs: u64,
}

impl CredentialConfig {
    /// Hard expiry as a duration.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes * 60)
    }

    /// Soft refresh age as a duration.
    #[must_use]
    pub fn soft_refresh_after(&self) -> Duration {
        Duration::from_secs(self.soft_refresh_minutes * 60)
    }

    /// Extraction wait budget as a duration.
    #[must_use]
    pub fn wait_budget(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    /// Initial extraction backoff as a duration.
    #[must_use]
    pub fn extraction_backoff(&self) -> Duration {
        Duration::from_secs(self.extraction_backoff_secs)
    }

    /// Extraction backoff cap as a duration.
    #[must_use]
    pub fn extraction_max_backoff(&self) -> Duration {
        Duration::from_secs(self.extraction_max_backoff_secs)
    }

    /// Delay after a failure that is not a bot-defense rejection.
    #[must_use]
    pub fn extraction_retry_delay(&self) -> Duration {
        Duration::from_secs(self.extraction_retry_secs)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.extraction_attempts == 0 {
            return Err(ConfigError::invalid(
                "credentials.extraction_attempts",
                "must be at least 1",
            ));
        }
        if self.ttl_minutes == 0 {
            return Err(ConfigError::invalid("credentials.ttl_minutes", "must be positive"));
        }
        if self.soft_refresh_minutes >= self.ttl_minutes {
            return Err(ConfigError::invalid(
                "credentials.soft_refresh_minutes",
                "must be less than ttl_minutes",
            ));
        }
        Ok(())
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 30,
            soft_refresh_minutes: 20,
            wait_secs: 15,
            headless: true,
            cache_dir: None,
            warmup_origin: "SRQ".to_string(),
            warmup_destination: "BFL".to_string(),
            warmup_days_ahead: 7,
            extraction_attempts: 3,
            extraction_backoff_secs: 30,
            extraction_max_backoff_secs: 300,
            extraction_retry_secs: 10,
        }
    }
}

/// Granularity of circuit breakers within a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerGranularity {
    /// Award and Revenue searches share one breaker
    Shared,
    /// Each search type has its own breaker
    PerSearchType,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Initial open period, in seconds
    pub cooldown_secs: u64,
    /// Growth applied to the cooldown after a failed half-open trial
    pub cooldown_multiplier: f64,
    /// Upper bound for the grown cooldown, in seconds
    pub max_cooldown_secs: u64,
    /// One breaker per profile, or one per search type
    pub granularity: BreakerGranularity,
}

impl BreakerConfig {
    /// Initial cooldown as a duration.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Maximum cooldown as a duration.
    #[must_use]
    pub fn max_cooldown(&self) -> Duration {
        Duration::from_secs(self.max_cooldown_secs)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("breaker.failure_threshold", "must be at least 1"));
        }
        if self.cooldown_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "breaker.cooldown_multiplier",
                "must be at least 1.0",
            ));
        }
        if self.max_cooldown_secs < self.cooldown_secs {
            return Err(ConfigError::invalid(
                "breaker.max_cooldown_secs",
                "must not be below cooldown_secs",
            ));
        }
        Ok(())
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 300,
            cooldown_multiplier: 2.0,
            max_cooldown_secs: 1800,
            granularity: BreakerGranularity::Shared,
        }
    }
}

/// Adaptive rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Burst capacity in tokens
    pub capacity: u32,
    /// Ceiling rate in requests per second
    pub base_rate: f64,
    /// Floor rate in requests per second
    pub min_rate: f64,
    /// Multiplier applied on throttle or block signals
    pub decrease_factor: f64,
    /// Rate added after a recovery streak, in requests per second
    pub increase_step: f64,
    /// Consecutive successes required before an increase
    pub recovery_successes: u32,
    /// Largest `Retry-After` pause honored, in seconds
    pub max_retry_after_secs: u64,
}

impl LimiterConfig {
    /// Largest honored pause as a duration.
    #[must_use]
    pub fn max_retry_after(&self) -> Duration {
        Duration::from_secs(self.max_retry_after_secs)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid("limiter.capacity", "must be at least 1"));
        }
        if self.min_rate <= 0.0 {
            return Err(ConfigError::invalid("limiter.min_rate", "must be positive"));
        }
        if self.min_rate > self.base_rate {
            return Err(ConfigError::invalid(
                "limiter.min_rate",
                "must not exceed base_rate",
            ));
        }
        if self.decrease_factor <= 0.0 || self.decrease_factor >= 1.0 {
            return Err(ConfigError::invalid(
                "limiter.decrease_factor",
                "must be between 0 and 1 (exclusive)",
            ));
        }
        if self.increase_step <= 0.0 {
            return Err(ConfigError::invalid("limiter.increase_step", "must be positive"));
        }
        if self.recovery_successes == 0 {
            return Err(ConfigError::invalid(
                "limiter.recovery_successes",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            base_rate: 1.0,
            min_rate: 0.1,
            decrease_factor: 0.5,
            increase_step: 0.1,
            recovery_successes: 10,
            max_retry_after_secs: 120,
        }
    }
}

/// Retry and backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per resilient call, including the first
    pub max_attempts: u32,
    /// Backoff base delay, in milliseconds
    pub base_delay_ms: u64,
    /// Backoff ceiling, in milliseconds
    pub max_delay_ms: u64,
    /// Authorization failures retried after a credential refresh
    pub max_auth_retries: u32,
    /// Times a search waits out an open circuit before failing
    pub max_circuit_waits: u32,
}

impl RetryConfig {
    /// Base delay as a duration.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Maximum delay as a duration.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                "must not be below base_delay_ms",
            ));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            max_auth_retries: 1,
            max_circuit_waits: 1,
        }
    }
}

/// Bulk run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Tasks allowed in the running state at once
    pub max_concurrent: usize,
    /// Independent credential profiles ("browsers")
    pub browser_count: usize,
    /// Per-call transport timeout, in seconds
    pub request_timeout_secs: u64,
}

impl BulkConfig {
    /// Per-call timeout as a duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("bulk.max_concurrent", "must be at least 1"));
        }
        if self.browser_count == 0 {
            return Err(ConfigError::invalid("bulk.browser_count", "must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "bulk.request_timeout_secs",
                "must be positive",
            ));
        }
        Ok(())
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            browser_count: 1,
            request_timeout_secs: 10,
        }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable debug-level output for farescout crates
    pub verbose: bool,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.credentials.ttl_minutes, 30);
        assert_eq!(config.credentials.soft_refresh_minutes, 20);
        assert_eq!(config.credentials.extraction_attempts, 3);
        assert_eq!(config.credentials.extraction_max_backoff(), Duration::from_secs(300));
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.cooldown(), Duration::from_secs(300));
        assert_eq!(config.limiter.capacity, 2);
        assert!((config.limiter.decrease_factor - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.bulk.browser_count, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[credentials]"));
        assert!(toml_str.contains("[breaker]"));
        assert!(toml_str.contains("[limiter]"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.breaker.granularity, BreakerGranularity::Shared);
    }

    #[test]
    fn test_load_from_file() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.bulk.max_concurrent = 4;
        config.breaker.granularity = BreakerGranularity::PerSearchType;
        fs::write(
            &config_path,
            toml::to_string_pretty(&config).expect("serialize config"),
        )
        .expect("write config file");

        let loaded = AppConfig::load_from(&config_path).expect("load config");
        assert_eq!(loaded.bulk.max_concurrent, 4);
        assert_eq!(loaded.breaker.granularity, BreakerGranularity::PerSearchType);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = TempDir::new().expect("create temp dir");
        let loaded = AppConfig::load_from(&tmp.path().join("absent.toml")).expect("load");
        assert_eq!(loaded.bulk.max_concurrent, 10);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[limiter]
base_rate = 2.5

[breaker]
granularity = "per_search_type"
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert!((config.limiter.base_rate - 2.5).abs() < f64::EPSILON);
        assert_eq!(config.breaker.granularity, BreakerGranularity::PerSearchType);
        // These should be defaults
        assert_eq!(config.limiter.capacity, 2);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FARESCOUT_HEADLESS", "false"),
            ("FARESCOUT_MAX_CONCURRENT", "3"),
            ("FARESCOUT_BROWSERS", "2"),
            ("FARESCOUT_RATE_LIMIT", "0.5"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(ToString::to_string));

        assert!(!config.credentials.headless);
        assert_eq!(config.bulk.max_concurrent, 3);
        assert_eq!(config.bulk.browser_count, 2);
        assert!((config.limiter.base_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_env_override_ignores_garbage() {
        let mut config = AppConfig::default();
        config.apply_env(|key| (key == "FARESCOUT_MAX_CONCURRENT").then(|| "many".to_string()));
        assert_eq!(config.bulk.max_concurrent, 10);
    }

    #[test]
    fn test_validate_rejects_inverted_limiter_rates() {
        let mut config = AppConfig::default();
        config.limiter.min_rate = 5.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("limiter.min_rate"));
    }

    #[test]
    fn test_validate_rejects_soft_refresh_past_ttl() {
        let mut config = AppConfig::default();
        config.credentials.soft_refresh_minutes = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.bulk.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.limiter.decrease_factor = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_extraction_attempts() {
        let mut config = AppConfig::default();
        config.credentials.extraction_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("credentials.extraction_attempts"));
    }
}
