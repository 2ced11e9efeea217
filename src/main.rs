use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod args;
mod copier;
mod error;
mod keymap;
mod lister;
mod location;
mod orchestrator;
mod policy;
mod progress;
mod s3_utils;
mod store;
#[cfg(test)]
mod testing;

use args::{Args, CopyConfig};
use copier::StreamingCopier;
use error::{
    CANCELLED_EXIT_CODE, FATAL_EXIT_CODE, PARSE_FAILURE_EXIT_CODE, PARTIAL_FAILURE_EXIT_CODE,
};
use lister::list_objects;
use orchestrator::{CopyOrchestrator, CopyPlan};
use progress::CopySummary;
use store::{BucketAccess, ObjectStore, S3Store};

const DEFAULT_LOG_FILTER: &str = "warn";

/// Initialize the tracing subscriber on stderr.
///
/// Uses `RUST_LOG` if set, otherwise falls back to `warn`.
fn init_tracing() -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(DEFAULT_LOG_FILTER)
            .with_context(|| format!("invalid log level filter: {DEFAULT_LOG_FILTER}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => PARSE_FAILURE_EXIT_CODE,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    if let Err(e) = init_tracing() {
        eprintln!("{e:#}");
    }

    // Validate locations and credentials before any network call
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Error: {}\n", e);
            let _ = Args::command().print_help();
            return ExitCode::from(e.exit_code());
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight objects");
            on_signal.cancel();
        }
    });

    match run(config, cancel.clone()).await {
        Ok(summary) => ExitCode::from(exit_code(&summary, cancel.is_cancelled())),
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            ExitCode::from(FATAL_EXIT_CODE)
        }
    }
}

/// Process status for a finished run.
///
/// An interrupt that left objects unstarted wins over failures of the
/// objects that did run.
fn exit_code(summary: &CopySummary, cancelled: bool) -> u8 {
    if cancelled && summary.skipped > 0 {
        CANCELLED_EXIT_CODE
    } else if !summary.is_success() {
        PARTIAL_FAILURE_EXIT_CODE
    } else {
        0
    }
}

async fn run(config: CopyConfig, cancel: CancellationToken) -> Result<CopySummary> {
    let source_client = config
        .source_policy
        .connect(&config.source.bucket, &config.source_client)
        .await
        .context("Failed to set up the source client")?;
    let dest_client = config
        .dest_policy
        .connect(&config.dest.bucket, &config.dest_client)
        .await
        .context("Failed to set up the destination client")?;

    let source_store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(source_client));
    let dest_store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(dest_client));

    let inventory = list_objects(
        source_store.as_ref(),
        &config.source.bucket,
        &config.source.prefix,
        config.source_policy.request_payer(),
    )
    .await?;
    if inventory.is_empty() {
        warn!(
            "no objects found under s3://{}/{}",
            config.source.bucket, config.source.prefix
        );
    }

    let plan = CopyPlan {
        source: BucketAccess::new(source_store, config.source.bucket, config.source_policy),
        dest: BucketAccess::new(dest_store, config.dest.bucket, config.dest_policy),
        source_prefix: config.source.prefix,
        dest_prefix: config.dest.prefix,
        concurrency: config.concurrency,
        verbose: config.verbose,
    };

    let summary = CopyOrchestrator::new(StreamingCopier::new(config.part_size), cancel)
        .run(inventory, plan)
        .await;

    if summary.failed > 0 {
        eprintln!(
            "\n⚠️  {} of {} object(s) failed to copy",
            summary.failed, summary.objects
        );
    }
    if summary.skipped > 0 {
        eprintln!("⚠️  {} object(s) not started after interrupt", summary.skipped);
    }
    Ok(summary)
}
