//! Farescout Core - Foundation crate for the farescout flight search tool.
//!
//! This crate provides shared types, error handling, and configuration
//! management that all other farescout crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared newtypes and enums (`AirportCode`, `TravelDate`, `SearchType`, `CabinClass`)
//! - [`dates`] - Date and date-range specification parsing
//!
//! # Example
//!
//! ```rust
//! use farescout_core::{AirportCode, AppConfig, SearchType};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! config.validate()?;
//!
//! let origin = AirportCode::new("lax")?;
//! assert_eq!(origin.as_str(), "LAX");
//! assert_eq!(SearchType::Award.as_str(), "Award");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod dates;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    ApiConfig, AppConfig, BreakerConfig, BreakerGranularity, BulkConfig, CredentialConfig,
    LimiterConfig, LoggingConfig, RetryConfig,
};
pub use dates::{date_range_info, parse_date_list, parse_date_spec, DateRangeInfo};
pub use error::{ConfigError, ConfigResult, FarescoutError, Result};
pub use types::{AirportCode, CabinClass, SearchType, TravelDate};
