//! Farescout command-line entry point.

mod args;

use anyhow::Context;
use args::Args;
use clap::Parser;
use farescout_browser::{ChromiumExtractor, CredentialExtractor};
use farescout_core::{date_range_info, AppConfig, LoggingConfig};
use farescout_scanner::{
    BulkOrchestrator, JsonFileSink, ProfilePool, RequestExecutor, ReqwestTransport, TaskStatus,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn init_tracing(logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if logging.verbose {
        "info,farescout=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    if logging.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match AppConfig::load_with_env(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);
    init_tracing(&config.logging);

    match run(&args, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args, mut config: AppConfig) -> anyhow::Result<ExitCode> {
    config.validate().context("invalid configuration")?;

    info!("Starting farescout v{}", env!("CARGO_PKG_VERSION"));

    if config.credentials.cache_dir.is_none() {
        config.credentials.cache_dir = AppConfig::cache_dir().ok();
    }

    let browsers = config.bulk.browser_count;
    let pool = ProfilePool::from_config(&config, browsers, |_| {
        Arc::new(ChromiumExtractor::new()) as Arc<dyn CredentialExtractor>
    })
    .context("failed to set up browser profiles")?;
    let pool = Arc::new(pool);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received, stopping after in-flight requests");
                cancel.cancel();
            }
        }
    });

    if args.extract_cookies || args.cookies_only {
        let ready = pool
            .warm_up(&cancel)
            .await
            .context("credential extraction failed")?;
        info!("{}/{} profile(s) have fresh credentials", ready, browsers);
        if args.cookies_only {
            return Ok(ExitCode::SUCCESS);
        }
    }

    let request = args.bulk_request(&config)?;
    let dates = date_range_info(&request.dates);
    info!(
        "Searching {} origin(s) x {} destination(s) x {} date(s){} = {} task(s)",
        request.origins.len(),
        request.destinations.len(),
        dates.total,
        if dates.consecutive_days > 1 {
            format!(" ({} consecutive days)", dates.consecutive_days)
        } else {
            String::new()
        },
        request.task_count()
    );

    let transport = ReqwestTransport::new(&config.api, config.bulk.request_timeout())
        .context("failed to create HTTP client")?;
    let executor = RequestExecutor::new(Arc::new(transport), &config.retry);
    let orchestrator = BulkOrchestrator::new(Arc::clone(&pool), Arc::new(executor))
        .with_sink(Arc::new(JsonFileSink::new(&args.output)));

    let result = orchestrator.run(&request, cancel).await?;

    for outcome in &result.per_task {
        if outcome.status == TaskStatus::Failed {
            warn!(
                route = %outcome.task,
                "Failed: {}",
                outcome.failure_message().unwrap_or_default()
            );
        }
    }
    info!(
        "Done: {}/{} succeeded in {:.1}s, results in {}",
        result.succeeded,
        result.total(),
        result.duration.as_secs_f64(),
        args.output.display()
    );

    if result.all_failed() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
