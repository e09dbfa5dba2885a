//! Date specification parsing.
//!
//! A date spec is either a single `YYYY-MM-DD` date or an inclusive range
//! `YYYY-MM-DD:YYYY-MM-DD`.

use crate::error::{FarescoutError, Result};
use crate::types::TravelDate;
use std::collections::BTreeSet;

/// Summary of an expanded date list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRangeInfo {
    /// Number of distinct dates
    pub total: usize,
    /// Length of the run when the dates are consecutive days, otherwise 0
    pub consecutive_days: usize,
}

/// Expand a single date spec into its dates.
pub fn parse_date_spec(spec: &str) -> Result<Vec<TravelDate>> {
    let Some((start, end)) = spec.split_once(':') else {
        return Ok(vec![TravelDate::parse(spec)?]);
    };

    let start = TravelDate::parse(start)?;
    let end = TravelDate::parse(end)?;
    if end < start {
        return Err(FarescoutError::Validation(format!(
            "invalid date range '{spec}': end date {end} is before start date {start}"
        )));
    }

    Ok(start
        .date()
        .iter_days()
        .take_while(|d| *d <= end.date())
        .map(TravelDate::new)
        .collect())
}

/// Expand a list of date specs into sorted, de-duplicated dates.
pub fn parse_date_list<S: AsRef<str>>(specs: &[S]) -> Result<Vec<TravelDate>> {
    let mut seen = 0usize;
    let mut dates = BTreeSet::new();
    for spec in specs {
        for date in parse_date_spec(spec.as_ref())? {
            seen += 1;
            dates.insert(date);
        }
    }

    if dates.len() != seen {
        tracing::warn!("Removed {} duplicate dates from input", seen - dates.len());
    }

    Ok(dates.into_iter().collect())
}

/// Describe a sorted, de-duplicated date list.
#[must_use]
pub fn date_range_info(dates: &[TravelDate]) -> DateRangeInfo {
    let total = dates.len();
    if total < 2 {
        return DateRangeInfo {
            total,
            consecutive_days: 0,
        };
    }

    let first = dates[0].date();
    let last = dates[total - 1].date();
    let span = usize::try_from((last - first).num_days() + 1).unwrap_or(0);

    DateRangeInfo {
        total,
        consecutive_days: if span == total { span } else { 0 },
    }
}
