//! Command-line arguments.

use anyhow::{bail, Context};
use clap::Parser;
use farescout_core::{parse_date_list, AirportCode, AppConfig, CabinClass, SearchType};
use farescout_scanner::BulkRequest;
use std::path::PathBuf;

/// Bulk flight fare search with resilient session handling.
#[derive(Debug, Parser)]
#[command(name = "farescout", version, about)]
pub struct Args {
    /// Origin airport code
    #[arg(long, value_name = "CODE", conflicts_with = "origins")]
    pub origin: Option<String>,

    /// Multiple origin airport codes for bulk search
    #[arg(long, value_name = "CODE", num_args = 1..)]
    pub origins: Vec<String>,

    /// Destination airport code
    #[arg(long, value_name = "CODE", conflicts_with = "destinations")]
    pub destination: Option<String>,

    /// Multiple destination airport codes for bulk search
    #[arg(long, value_name = "CODE", num_args = 1..)]
    pub destinations: Vec<String>,

    /// Departure dates: YYYY-MM-DD or ranges YYYY-MM-DD:YYYY-MM-DD
    #[arg(long = "dates", visible_alias = "date", value_name = "SPEC", num_args = 1..)]
    pub dates: Vec<String>,

    /// Number of passengers
    #[arg(long, default_value_t = 1)]
    pub passengers: u32,

    /// Cabin class (COACH, PREMIUM_ECONOMY, BUSINESS, FIRST)
    #[arg(long, default_value = "COACH")]
    pub cabin: String,

    /// Search types (Award, Revenue); both by default
    #[arg(long = "search-type", value_name = "TYPE", num_args = 1..)]
    pub search_types: Vec<String>,

    /// Maximum concurrently running route/date tasks
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Number of browser profiles with independent credentials
    #[arg(long)]
    pub browsers: Option<usize>,

    /// Extract fresh credentials before searching
    #[arg(long)]
    pub extract_cookies: bool,

    /// Extract credentials and exit without searching
    #[arg(long)]
    pub cookies_only: bool,

    /// Show the browser window during extraction
    #[arg(long)]
    pub no_headless: bool,

    /// Seconds to wait for session cookies during extraction
    #[arg(long, value_name = "SECS")]
    pub cookie_wait_time: Option<u64>,

    /// Base request rate per profile (requests per second)
    #[arg(long, value_name = "RPS")]
    pub rate_limit: Option<f64>,

    /// Output directory for result files
    #[arg(long, default_value = "./output")]
    pub output: PathBuf,

    /// Configuration file (defaults to the XDG config path)
    #[arg(long, env = "FARESCOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short)]
    pub verbose: bool,
}

impl Args {
    /// Apply flag overrides on top of file and environment configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if self.no_headless {
            config.credentials.headless = false;
        }
        if let Some(secs) = self.cookie_wait_time {
            config.credentials.wait_secs = secs;
        }
        if let Some(rate) = self.rate_limit {
            config.limiter.base_rate = rate;
        }
        if let Some(max) = self.max_concurrent {
            config.bulk.max_concurrent = max;
        }
        if let Some(browsers) = self.browsers {
            config.bulk.browser_count = browsers;
        }
        if self.verbose {
            config.logging.verbose = true;
        }
    }

    /// Build the bulk request described by the flags.
    pub fn bulk_request(&self, config: &AppConfig) -> anyhow::Result<BulkRequest> {
        let origins = airports(self.origin.as_ref(), &self.origins, "--origin or --origins")?;
        let destinations = airports(
            self.destination.as_ref(),
            &self.destinations,
            "--destination or --destinations",
        )?;

        if self.dates.is_empty() {
            bail!("--date is required for searches");
        }
        let dates = parse_date_list(&self.dates).context("invalid --date")?;

        let cabin: CabinClass = self.cabin.parse().context("invalid --cabin")?;

        let search_types = if self.search_types.is_empty() {
            SearchType::ALL.to_vec()
        } else {
            self.search_types
                .iter()
                .map(|s| s.parse::<SearchType>())
                .collect::<Result<Vec<_>, _>>()
                .context("invalid --search-type")?
        };

        Ok(BulkRequest {
            origins,
            destinations,
            dates,
            passengers: self.passengers,
            cabin,
            search_types,
            max_concurrent: config.bulk.max_concurrent,
            browser_count: config.bulk.browser_count,
        })
    }
}

fn airports(single: Option<&String>, many: &[String], flag: &str) -> anyhow::Result<Vec<AirportCode>> {
    let codes: Vec<&String> = single.into_iter().chain(many).collect();
    if codes.is_empty() {
        bail!("{flag} is required for searches");
    }
    codes
        .into_iter()
        .map(|code| AirportCode::new(code).with_context(|| format!("invalid airport code '{code}'")))
        .collect()
}
