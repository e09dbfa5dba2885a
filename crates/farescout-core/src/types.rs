//! Shared types used across farescout.
//!
//! This module defines common newtypes and enums that provide type safety
//! and clear domain modeling.

use crate::error::FarescoutError;
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Newtype for IATA airport codes with validation.
///
/// Codes are three ASCII letters and are normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AirportCode(String);

impl AirportCode {
    /// Create a new `AirportCode`, normalizing to uppercase.
    ///
    /// # Errors
    /// Returns error if the code is not exactly three ASCII letters.
    pub fn new(code: impl AsRef<str>) -> Result<Self, FarescoutError> {
        let code = code.as_ref().trim().to_ascii_uppercase();
        Self::validate(&code)?;
        Ok(Self(code))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(code: &str) -> Result<(), FarescoutError> {
        static IATA_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = IATA_REGEX.get_or_init(|| Regex::new(r"^[A-Z]{3}$").expect("valid regex"));

        if regex.is_match(code) {
            Ok(())
        } else {
            Err(FarescoutError::Validation(format!(
                "invalid airport code: must be three letters, got '{code}'"
            )))
        }
    }
}

impl fmt::Display for AirportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AirportCode {
    type Err = FarescoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AirportCode {
    type Error = FarescoutError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AirportCode> for String {
    fn from(code: AirportCode) -> Self {
        code.0
    }
}

/// A departure date, rendered as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TravelDate(NaiveDate);

impl TravelDate {
    /// Wire format used by the search API.
    pub const FORMAT: &'static str = "%Y-%m-%d";

    /// Wrap a calendar date.
    #[must_use]
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Parse a `YYYY-MM-DD` string.
    ///
    /// # Errors
    /// Returns error if the string is not a valid calendar date.
    pub fn parse(s: &str) -> Result<Self, FarescoutError> {
        NaiveDate::parse_from_str(s.trim(), Self::FORMAT)
            .map(Self)
            .map_err(|e| FarescoutError::Validation(format!("invalid date '{s}': {e}")))
    }

    /// Get the underlying calendar date.
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for TravelDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

impl FromStr for TravelDate {
    type Err = FarescoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Kind of fare search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SearchType {
    /// Award (miles) fares
    Award,
    /// Revenue (cash) fares
    Revenue,
}

impl SearchType {
    /// All search types, in canonical order.
    pub const ALL: [Self; 2] = [Self::Award, Self::Revenue];

    /// Name used by the search API.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Award => "Award",
            Self::Revenue => "Revenue",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = FarescoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "award" => Ok(Self::Award),
            "revenue" => Ok(Self::Revenue),
            other => Err(FarescoutError::Validation(format!(
                "unknown search type '{other}'"
            ))),
        }
    }
}

/// Cabin class filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CabinClass {
    /// Main cabin
    #[default]
    Coach,
    /// Premium economy
    PremiumEconomy,
    /// Business
    Business,
    /// First
    First,
}

impl CabinClass {
    /// Product type name used by the search API.
    #[must_use]
    pub fn product_type(&self) -> &'static str {
        match self {
            Self::Coach => "COACH",
            Self::PremiumEconomy => "PREMIUM_ECONOMY",
            Self::Business => "BUSINESS",
            Self::First => "FIRST",
        }
    }

    /// Human-readable name used in reports and result files.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Coach => "economy",
            Self::PremiumEconomy => "premium_economy",
            Self::Business => "business",
            Self::First => "first",
        }
    }
}

impl fmt::Display for CabinClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.product_type())
    }
}

impl FromStr for CabinClass {
    type Err = FarescoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "COACH" | "ECONOMY" => Ok(Self::Coach),
            "PREMIUM_ECONOMY" => Ok(Self::PremiumEconomy),
            "BUSINESS" => Ok(Self::Business),
            "FIRST" => Ok(Self::First),
            other => Err(FarescoutError::Validation(format!(
                "unknown cabin class '{other}'"
            ))),
        }
    }
}
