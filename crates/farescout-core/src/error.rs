//! Error types shared by the farescout crates.
//!
//! Input validation and configuration loading report through
//! [`FarescoutError`]; the scanner and browser crates wrap it in their own
//! error enums.

use thiserror::Error;

/// Failure while validating search input or loading settings.
#[derive(Error, Debug)]
pub enum FarescoutError {
    /// Settings could not be loaded or are inconsistent
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Rejected search input (airport code, date, cabin, search type)
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while reading or checking `config.toml`.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No home directory to derive the config and cache paths from
    #[error("could not locate a config directory for farescout")]
    NoConfigDir,

    /// The file is not valid TOML for [`AppConfig`](crate::AppConfig)
    #[error("malformed config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The file exists but could not be read
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// A value is out of range
    #[error("{field}: {reason}")]
    InvalidValue {
        /// Dotted key, e.g. `limiter.min_rate`
        field: String,
        /// What is wrong with it
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias for validation and loading.
pub type Result<T> = std::result::Result<T, FarescoutError>;

/// Result alias for configuration checks.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FarescoutError::Validation("bad airport".to_string());
        assert_eq!(err.to_string(), "validation error: bad airport");

        let err = ConfigError::invalid("limiter.capacity", "must be at least 1");
        assert_eq!(err.to_string(), "limiter.capacity: must be at least 1");

        let err: FarescoutError = err.into();
        assert_eq!(
            err.to_string(),
            "configuration error: limiter.capacity: must be at least 1"
        );
    }

    #[test]
    fn test_toml_error_converts() {
        let parse_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: ConfigError = parse_err.into();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().starts_with("malformed config file"));
    }
}
